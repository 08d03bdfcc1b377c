//! Decision-tree nodes: a shared header plus a leaf/internal variant.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::sample::SampleHandle;
use crate::tree::counts::CountsTable;

/// Reproducible node-id generator.
///
/// The whole generator state is a single `u64` word so it round-trips
/// through the save format; each draw reseeds a Xoshiro generator from the
/// word, takes one output as the id and the next as the new state.
#[derive(Debug, Clone)]
pub struct NodeIdGen {
    state: u64,
}

impl NodeIdGen {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Draw a fresh node id, advancing the state.
    pub fn next_id(&mut self) -> u64 {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.state);
        let id = rng.next_u64();
        self.state = rng.next_u64();
        id
    }

    /// Current state word, as persisted by the save format.
    #[inline]
    pub fn state(&self) -> u64 {
        self.state
    }
}

/// A decision-tree node.
///
/// The header (`id`, class totals, decision-counts table) is common to both
/// shapes; the payload distinguishes leaves from internal nodes. The `id` is
/// assigned at creation, drives the node's feature ranking, and survives
/// every structural reshape of the node in place.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable tag; input to the per-node feature ranking.
    pub id: u64,
    /// Class-0 samples currently subsumed by this node.
    pub c0: u32,
    /// Class-1 samples currently subsumed by this node.
    pub c1: u32,
    /// Bounded per-feature sufficient statistics.
    pub counts: CountsTable,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf {
        /// Cached class-1 probability served by [`crate::Forest::classify`].
        value: f32,
        /// The samples stored at this leaf, in insertion order.
        samples: Vec<SampleHandle>,
    },
    Internal {
        /// Splitting feature: samples with the feature present descend into
        /// `positive`, the rest into `negative`.
        code: i32,
        negative: Box<Node>,
        positive: Box<Node>,
    },
}

impl Node {
    /// Fresh empty leaf with the given cached value.
    pub fn leaf(ids: &mut NodeIdGen, value: f32) -> Self {
        Self::leaf_with_samples(ids, value, Vec::new())
    }

    /// Fresh leaf holding `samples`; counters start at zero and are filled
    /// in by a recount.
    pub fn leaf_with_samples(ids: &mut NodeIdGen, value: f32, samples: Vec<SampleHandle>) -> Self {
        Self {
            id: ids.next_id(),
            c0: 0,
            c1: 0,
            counts: CountsTable::default(),
            kind: NodeKind::Leaf { value, samples },
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Total samples subsumed by this node.
    #[inline]
    pub fn total(&self) -> u32 {
        self.c0 + self.c1
    }

    /// Nodes in this subtree, including self.
    pub fn n_nodes(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf { .. } => 1,
            NodeKind::Internal {
                negative, positive, ..
            } => 1 + negative.n_nodes() + positive.n_nodes(),
        }
    }

    /// Leaves in this subtree.
    pub fn n_leaves(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf { .. } => 1,
            NodeKind::Internal {
                negative, positive, ..
            } => negative.n_leaves() + positive.n_leaves(),
        }
    }

    /// Depth of this subtree; a lone leaf has depth 1.
    pub fn depth(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf { .. } => 1,
            NodeKind::Internal {
                negative, positive, ..
            } => 1 + negative.depth().max(positive.depth()),
        }
    }
}

/// Cached prediction of a leaf holding `c1` positives out of `c0 + c1`.
///
/// An empty leaf reports 1.0; that state only occurs transiently during
/// construction and in freshly created forests, but it is preserved by the
/// save format and must stay put for round-trip fidelity.
pub fn leaf_value(c0: u32, c1: u32) -> f32 {
    let n = c0 + c1;
    if n == 0 {
        1.0
    } else {
        c1 as f32 / n as f32
    }
}
