//! The forest: an ordered ensemble of incrementally maintained trees.

use std::collections::btree_map;
use std::io::{self, Read, Write};

use serde::Serialize;

use crate::hash::sample_in_tree;
use crate::sample::{Sample, SampleHandle};
use crate::store::SampleStore;
use crate::tree::audit::audit_tree;
use crate::tree::node::{Node, NodeIdGen, NodeKind};
use crate::tree::update::update_tree;

/// Seed of a freshly created forest's node-id generator.
const DEFAULT_SEED: u64 = 1;

/// An incremental random forest for binary classification.
///
/// The tree count is fixed at construction. Each committed sample is
/// routed to a deterministic ~2/3 subset of the trees, keyed by suid, so
/// the ensemble members train on overlapping but distinct populations.
///
/// A forest exclusively owns its trees, its sample store and its id
/// generator. It is a single-threaded structure: no operation suspends,
/// and concurrent mutation is not supported.
#[derive(Debug)]
pub struct Forest {
    pub(crate) trees: Vec<Node>,
    pub(crate) store: SampleStore,
    pub(crate) ids: NodeIdGen,
}

impl Forest {
    /// Create a forest of `n_trees` empty trees.
    pub fn new(n_trees: usize) -> Self {
        let mut ids = NodeIdGen::new(DEFAULT_SEED);
        let trees = (0..n_trees).map(|_| Node::leaf(&mut ids, 0.0)).collect();
        Self {
            trees,
            store: SampleStore::new(),
            ids,
        }
    }

    pub(crate) fn from_parts(trees: Vec<Node>, store: SampleStore, ids: NodeIdGen) -> Self {
        Self { trees, store, ids }
    }

    /// Number of trees, fixed at construction.
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Stage a sample for insertion; see [`SampleStore::add`].
    ///
    /// Takes ownership of the sample. Returns `true` iff this was a fresh
    /// insertion rather than the replacement of a pending add.
    pub fn add(&mut self, sample: Sample) -> bool {
        self.store.add(sample)
    }

    /// Stage a removal; see [`SampleStore::remove`].
    pub fn remove(&mut self, suid: &str) -> bool {
        self.store.remove(suid)
    }

    /// Reconcile all pending additions and removals into the trees.
    ///
    /// Routes each pending sample to its trees, applies the per-tree
    /// batches through the update engine, then updates the committed
    /// sample map. A commit with nothing pending is a no-op.
    pub fn commit(&mut self) {
        if !self.store.has_changes() {
            return;
        }

        for (index, tree) in self.trees.iter_mut().enumerate() {
            let batch_remove: Vec<SampleHandle> = self
                .store
                .pending_remove()
                .values()
                .filter(|s| sample_in_tree(&s.suid, index))
                .cloned()
                .collect();
            let batch_add: Vec<SampleHandle> = self
                .store
                .pending_add()
                .values()
                .filter(|s| sample_in_tree(&s.suid, index))
                .cloned()
                .collect();
            update_tree(&mut self.ids, tree, &batch_add, &batch_remove);
        }

        self.store.finish_commit();
    }

    /// Average class-1 probability across all trees, in `[0, 1]`.
    ///
    /// Commits pending changes first.
    pub fn classify(&mut self, sample: &Sample) -> f32 {
        self.classify_partial(sample, usize::MAX)
    }

    /// Average of the first `n` trees' outputs; `n` is clamped to the tree
    /// count. Commits pending changes first.
    pub fn classify_partial(&mut self, sample: &Sample, n: usize) -> f32 {
        self.commit();
        let n = n.min(self.trees.len());
        let sum: f64 = self.trees[..n]
            .iter()
            .map(|tree| f64::from(classify_tree(tree, sample)))
            .sum();
        (sum / n as f64) as f32
    }

    /// Run the structural audit over every tree. Commits pending changes
    /// first. Findings are reported through `tracing::error!`.
    pub fn validate(&mut self) -> bool {
        self.commit();
        self.trees.iter().all(audit_tree)
    }

    /// Write the forest as nested JSON arrays, one element per tree: a
    /// leaf is its value, an internal node is `[code, negative, positive]`.
    /// Commits pending changes first.
    pub fn as_json<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.commit();
        out.write_all(b"[")?;
        for (i, tree) in self.trees.iter().enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write_tree_json(tree, out)?;
        }
        out.write_all(b"]")
    }

    /// Aggregate per-tree statistics. Commits pending changes first.
    pub fn stats(&mut self) -> ForestStats {
        self.commit();
        ForestStats {
            n_samples: self.store.committed().len(),
            trees: self
                .trees
                .iter()
                .map(|tree| TreeStats {
                    nodes: tree.n_nodes(),
                    leaves: tree.n_leaves(),
                    depth: tree.depth(),
                    samples: tree.total(),
                })
                .collect(),
        }
    }

    /// Write the aggregate statistics as JSON.
    pub fn stats_json<W: Write>(&mut self, out: W) -> serde_json::Result<()> {
        let stats = self.stats();
        serde_json::to_writer(out, &stats)
    }

    /// Persist the forest in the stable ASCII format of [`crate::io`].
    /// Commits pending changes first.
    pub fn save<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.commit();
        crate::io::save_forest(self, out)
    }

    /// Load a forest previously written by [`Forest::save`].
    pub fn load<R: Read>(input: R) -> Result<Self, crate::io::LoadError> {
        crate::io::load_forest(input)
    }

    /// Iterate the committed samples in ascending suid order.
    ///
    /// Commits pending changes first. The iterator is finite and
    /// non-restartable.
    pub fn samples(&mut self) -> Samples<'_> {
        self.commit();
        Samples {
            inner: self.store.committed().values(),
        }
    }
}

/// Walk a tree root-to-leaf by feature presence.
fn classify_tree(tree: &Node, sample: &Sample) -> f32 {
    let mut node = tree;
    loop {
        match &node.kind {
            NodeKind::Leaf { value, .. } => return *value,
            NodeKind::Internal {
                code,
                negative,
                positive,
            } => {
                node = if sample.has_code(*code) {
                    positive
                } else {
                    negative
                };
            }
        }
    }
}

fn write_tree_json<W: Write>(node: &Node, out: &mut W) -> io::Result<()> {
    match &node.kind {
        NodeKind::Leaf { value, .. } => write!(out, "{value}"),
        NodeKind::Internal {
            code,
            negative,
            positive,
        } => {
            write!(out, "[{code},")?;
            write_tree_json(negative, out)?;
            out.write_all(b",")?;
            write_tree_json(positive, out)?;
            out.write_all(b"]")
        }
    }
}

/// Iterator over the committed samples of a forest.
pub struct Samples<'a> {
    inner: btree_map::Values<'a, String, SampleHandle>,
}

impl<'a> Iterator for Samples<'a> {
    type Item = &'a Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|handle| handle.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Aggregate statistics over a forest, as exported by
/// [`Forest::stats_json`].
#[derive(Debug, Clone, Serialize)]
pub struct ForestStats {
    /// Committed samples in the store.
    pub n_samples: usize,
    /// Per-tree shape measures, in tree order.
    pub trees: Vec<TreeStats>,
}

/// Shape of one tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub depth: usize,
    /// Samples subsumed by the root (each tree sees ~2/3 of the stream).
    pub samples: u32,
}
