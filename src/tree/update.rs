//! The batched tree update engine.
//!
//! [`update_tree`] reconciles one tree with a batch of additions and
//! removals in two passes. Pass 1 pushes the batches down to the leaf
//! sample vectors. Pass 2 walks the same paths updating the per-node
//! counters and re-checks each affected node's split decision, reshaping
//! the tree in place where the decision changed:
//!
//! - a leaf whose counters now justify a split becomes an internal node
//!   (and the fresh children may split further),
//! - an internal node with no justified split collapses back to a leaf,
//! - an internal node whose best code changed re-partitions its whole
//!   population against the new code.
//!
//! Structural reshapes preserve the node's identity (and therefore its
//! feature ranking); only genuinely new child leaves draw fresh ids.

use std::mem;
use std::rc::Rc;

use crate::sample::{count_by_class, SampleHandle};
use crate::tree::counts::compute_counters;
use crate::tree::node::{leaf_value, Node, NodeIdGen, NodeKind};
use crate::tree::split::best_split_code;
use crate::tree::walk::collect_samples;
use crate::tree::MAX_CODES_SCORED;

/// Apply one add/remove batch to a tree.
///
/// # Panics
///
/// Panics if a sample appears in both batches; the staging layer guarantees
/// disjointness, so an overlap means the caller is corrupt.
pub fn update_tree(
    ids: &mut NodeIdGen,
    root: &mut Node,
    batch_add: &[SampleHandle],
    batch_remove: &[SampleHandle],
) {
    for sample in batch_add {
        if batch_remove.iter().any(|r| Rc::ptr_eq(sample, r)) {
            panic!(
                "sample {:?} appears in both the add and remove batch",
                sample.suid
            );
        }
    }

    propagate_samples(root, batch_add, batch_remove);
    reshape(ids, root, batch_add, batch_remove);
}

/// Split a batch against a code: `(absent, present)`.
fn partition_by_code(
    samples: &[SampleHandle],
    code: i32,
) -> (Vec<SampleHandle>, Vec<SampleHandle>) {
    let (present, absent) = samples
        .iter()
        .cloned()
        .partition(|s: &SampleHandle| s.has_code(code));
    (absent, present)
}

/// Pass 1: route the batches to the leaf sample vectors.
fn propagate_samples(node: &mut Node, add: &[SampleHandle], remove: &[SampleHandle]) {
    match &mut node.kind {
        NodeKind::Leaf { samples, .. } => {
            for target in remove {
                match samples.iter().position(|s| Rc::ptr_eq(s, target)) {
                    Some(i) => {
                        samples.remove(i);
                    }
                    None => tracing::warn!(
                        suid = %target.suid,
                        "sample scheduled for removal not present at its leaf; skipping"
                    ),
                }
            }
            samples.extend(add.iter().cloned());
        }
        NodeKind::Internal {
            code,
            negative,
            positive,
        } => {
            let code = *code;
            let (add_n, add_p) = partition_by_code(add, code);
            let (rem_n, rem_p) = partition_by_code(remove, code);
            if !add_n.is_empty() || !rem_n.is_empty() {
                propagate_samples(negative, &add_n, &rem_n);
            }
            if !add_p.is_empty() || !rem_p.is_empty() {
                propagate_samples(positive, &add_p, &rem_p);
            }
        }
    }
}

/// Pass 2: counter maintenance and structural reshape, root downwards.
fn reshape(ids: &mut NodeIdGen, node: &mut Node, add: &[SampleHandle], remove: &[SampleHandle]) {
    let node_id = node.id;

    for sample in remove {
        node.counts.apply_remove(sample);
    }
    let (r0, r1) = count_by_class(remove);
    node.c0 -= r0;
    node.c1 -= r1;

    for sample in add {
        node.counts.apply_add(sample, node_id);
    }
    let (a0, a1) = count_by_class(add);
    node.c0 += a0;
    node.c1 += a1;

    // An under-filled table behind a non-zero watermark may be missing
    // codes the population still uses; only a full recount can re-admit
    // them.
    if node.counts.len() < MAX_CODES_SCORED && node.counts.watermark() != (0, 0) {
        let population = collect_samples(node);
        let (counts, c0, c1) = compute_counters(node_id, &population);
        node.counts = counts;
        node.c0 = c0;
        node.c1 = c1;
    }

    match best_split_code(&node.counts, node.c0, node.c1) {
        Some(code) => {
            if node.is_leaf() {
                let samples = match &mut node.kind {
                    NodeKind::Leaf { samples, .. } => mem::take(samples),
                    NodeKind::Internal { .. } => unreachable!(),
                };
                split_node(ids, node, code, samples);
                return;
            }

            let current = match &node.kind {
                NodeKind::Internal { code, .. } => *code,
                NodeKind::Leaf { .. } => unreachable!(),
            };
            if current != code {
                let population = collect_samples(node);
                split_node(ids, node, code, population);
                return;
            }

            let (add_n, add_p) = partition_by_code(add, code);
            let (rem_n, rem_p) = partition_by_code(remove, code);
            if let NodeKind::Internal {
                negative, positive, ..
            } = &mut node.kind
            {
                if !add_n.is_empty() || !rem_n.is_empty() {
                    reshape(ids, negative, &add_n, &rem_n);
                }
                if !add_p.is_empty() || !rem_p.is_empty() {
                    reshape(ids, positive, &add_p, &rem_p);
                }
            }
        }
        None => {
            if node.is_leaf() {
                let value = leaf_value(node.c0, node.c1);
                if let NodeKind::Leaf { value: v, .. } = &mut node.kind {
                    *v = value;
                }
            } else {
                // Collapse: gather the population in walk order and start
                // over as a leaf. The subtree is dropped wholesale.
                let population = collect_samples(node);
                node.kind = NodeKind::Leaf {
                    value: 0.0,
                    samples: population,
                };
                rebuild_leaf(node);
            }
        }
    }
}

/// Turn `node` into an internal node split on `code`, distributing
/// `samples` into two fresh child leaves (which may split further).
///
/// Any previous children are replaced wholesale. The node keeps its id,
/// totals and counts table.
fn split_node(ids: &mut NodeIdGen, node: &mut Node, code: i32, samples: Vec<SampleHandle>) {
    if !node.counts.contains(code) {
        panic!("split code {code} is not tracked by the node's decision counts");
    }

    let (neg, pos) = partition_by_code(&samples, code);

    let mut negative = Box::new(Node::leaf_with_samples(ids, 0.0, neg));
    rebuild_leaf(&mut negative);
    let mut positive = Box::new(Node::leaf_with_samples(ids, 0.0, pos));
    rebuild_leaf(&mut positive);

    try_split(ids, &mut negative);
    try_split(ids, &mut positive);

    node.kind = NodeKind::Internal {
        code,
        negative,
        positive,
    };
}

/// Split a freshly built leaf if its counters already justify it.
fn try_split(ids: &mut NodeIdGen, node: &mut Node) {
    if !node.is_leaf() {
        return;
    }
    if let Some(code) = best_split_code(&node.counts, node.c0, node.c1) {
        let samples = match &mut node.kind {
            NodeKind::Leaf { samples, .. } => mem::take(samples),
            NodeKind::Internal { .. } => unreachable!(),
        };
        split_node(ids, node, code, samples);
    }
}

/// Recount a leaf's counters and cached value from its sample vector.
fn rebuild_leaf(node: &mut Node) {
    let (counts, c0, c1) = match &node.kind {
        NodeKind::Leaf { samples, .. } => compute_counters(node.id, samples),
        NodeKind::Internal { .. } => unreachable!(),
    };
    node.counts = counts;
    node.c0 = c0;
    node.c1 = c1;

    let value = leaf_value(c0, c1);
    if let NodeKind::Leaf { value: v, .. } = &mut node.kind {
        *v = value;
    }
}
