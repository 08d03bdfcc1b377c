//! Recursive structural audit of a tree.
//!
//! The counters a tree maintains incrementally are redundant with its
//! sample population, which is what makes drift detectable: the audit
//! recomputes everything derivable from the samples and cross-checks it
//! against the stored state. It is the tool of last resort for catching
//! counter bugs, and deliberately favors completeness over speed.

use std::collections::HashSet;
use std::rc::Rc;

use thiserror::Error;

use crate::sample::Sample;
use crate::tree::counts::{compute_counters, CountsTable, DecisionCounts};
use crate::tree::node::{Node, NodeKind};
use crate::tree::walk::{collect_samples, SampleWalk};

/// One audit finding. The audit keeps going after a finding so a single
/// run reports everything that is wrong with the tree.
#[derive(Debug, Error)]
pub enum AuditIssue {
    #[error("duplicate sample id {suid:?} at a leaf")]
    DuplicateSuid { suid: String },

    #[error("leaf stores {stored} samples but counters account for {expected}")]
    LeafSizeMismatch { stored: usize, expected: u32 },

    #[error("counts for code {code} exceed the node totals: c0p={c0p}/{c0}, c1p={c1p}/{c1}")]
    CountsExceedTotals {
        code: i32,
        c0p: u32,
        c1p: u32,
        c0: u32,
        c1: u32,
    },

    #[error("recomputed class totals ({c0}, {c1}) disagree with stored ({stored_c0}, {stored_c1})")]
    TotalsMismatch {
        stored_c0: u32,
        stored_c1: u32,
        c0: u32,
        c1: u32,
    },

    #[error("non-zero {side} counts for code {code} missing from the {other} table")]
    MissingCounts {
        code: i32,
        side: &'static str,
        other: &'static str,
    },

    #[error("counts for code {code} disagree: stored {stored:?}, recomputed {computed:?}")]
    CountsMismatch {
        code: i32,
        stored: DecisionCounts,
        computed: DecisionCounts,
    },

    #[error("split code {code} is missing from the node's decision counts")]
    SplitCodeMissing { code: i32 },

    #[error(
        "child totals ({neg_c0}, {neg_c1}) / ({pos_c0}, {pos_c1}) disagree with \
         the split counts of code {code}"
    )]
    ChildSplitMismatch {
        code: i32,
        neg_c0: u32,
        neg_c1: u32,
        pos_c0: u32,
        pos_c1: u32,
    },

    #[error(
        "children totals ({neg_c0} + {pos_c0}, {neg_c1} + {pos_c1}) do not sum \
         to the parent's ({c0}, {c1})"
    )]
    ChildSumMismatch {
        neg_c0: u32,
        neg_c1: u32,
        pos_c0: u32,
        pos_c1: u32,
        c0: u32,
        c1: u32,
    },

    #[error("in-order walk disagrees with the recursive sample collection")]
    WalkOrderMismatch,
}

/// Audit a whole tree. Returns `true` when every invariant holds; every
/// finding is reported through `tracing::error!` before returning.
pub fn audit_tree(root: &Node) -> bool {
    let mut issues = Vec::new();
    audit_node(root, &mut issues);
    for issue in &issues {
        tracing::error!("tree audit: {issue}");
    }
    issues.is_empty()
}

fn audit_node(node: &Node, issues: &mut Vec<AuditIssue>) {
    check_walk_order(node, issues);

    if let NodeKind::Leaf { samples, .. } = &node.kind {
        let mut seen = HashSet::new();
        for sample in samples {
            if !seen.insert(sample.suid.as_str()) {
                issues.push(AuditIssue::DuplicateSuid {
                    suid: sample.suid.clone(),
                });
            }
        }
        if samples.len() != node.total() as usize {
            issues.push(AuditIssue::LeafSizeMismatch {
                stored: samples.len(),
                expected: node.total(),
            });
        }
    }

    for (code, dc) in node.counts.iter() {
        if dc.c0p > node.c0 || dc.c1p > node.c1 {
            issues.push(AuditIssue::CountsExceedTotals {
                code,
                c0p: dc.c0p,
                c1p: dc.c1p,
                c0: node.c0,
                c1: node.c1,
            });
        }
    }

    check_against_recount(node, issues);

    if let NodeKind::Internal {
        code,
        negative,
        positive,
    } = &node.kind
    {
        match node.counts.get(*code) {
            Some(dc) => {
                let c0n = node.c0.saturating_sub(dc.c0p);
                let c1n = node.c1.saturating_sub(dc.c1p);
                if negative.c0 != c0n
                    || negative.c1 != c1n
                    || positive.c0 != dc.c0p
                    || positive.c1 != dc.c1p
                {
                    issues.push(AuditIssue::ChildSplitMismatch {
                        code: *code,
                        neg_c0: negative.c0,
                        neg_c1: negative.c1,
                        pos_c0: positive.c0,
                        pos_c1: positive.c1,
                    });
                }
            }
            None => issues.push(AuditIssue::SplitCodeMissing { code: *code }),
        }

        if negative.c0 + positive.c0 != node.c0 || negative.c1 + positive.c1 != node.c1 {
            issues.push(AuditIssue::ChildSumMismatch {
                neg_c0: negative.c0,
                neg_c1: negative.c1,
                pos_c0: positive.c0,
                pos_c1: positive.c1,
                c0: node.c0,
                c1: node.c1,
            });
        }

        audit_node(negative, issues);
        audit_node(positive, issues);
    }
}

/// The in-order walk and an explicit recursive collection must agree
/// sample-for-sample, by identity.
fn check_walk_order(node: &Node, issues: &mut Vec<AuditIssue>) {
    fn collect_recursive(node: &Node, out: &mut Vec<*const Sample>) {
        match &node.kind {
            NodeKind::Leaf { samples, .. } => {
                out.extend(samples.iter().map(Rc::as_ptr));
            }
            NodeKind::Internal {
                negative, positive, ..
            } => {
                collect_recursive(negative, out);
                collect_recursive(positive, out);
            }
        }
    }

    let mut recursive = Vec::new();
    collect_recursive(node, &mut recursive);
    let walked: Vec<*const Sample> = SampleWalk::new(node).map(Rc::as_ptr).collect();
    if walked != recursive {
        issues.push(AuditIssue::WalkOrderMismatch);
    }
}

/// Recompute the node's counters from its live population and compare
/// against the stored state, on the codes both tables score.
fn check_against_recount(node: &Node, issues: &mut Vec<AuditIssue>) {
    let population = collect_samples(node);
    let (computed, c0, c1) = compute_counters(node.id, &population);

    if c0 != node.c0 || c1 != node.c1 {
        issues.push(AuditIssue::TotalsMismatch {
            stored_c0: node.c0,
            stored_c1: node.c1,
            c0,
            c1,
        });
    }

    compare_tables(&node.counts, &computed, "stored", "recomputed", issues);
    compare_tables(&computed, &node.counts, "recomputed", "stored", issues);
}

/// One-directional comparison: every non-zero entry of `a` above `a`'s
/// scored threshold must appear in `b`, with equal counts wherever the
/// code also clears `b`'s threshold. Codes below either threshold are out
/// of the agreement's scope: a table that has lived above the capacity
/// cap tracks a deliberately lossy top slice, and only the intersection
/// of the two scored slices is required to match. Zero entries are
/// allowed to be missing from the other side.
fn compare_tables(
    a: &CountsTable,
    b: &CountsTable,
    a_tag: &'static str,
    b_tag: &'static str,
    issues: &mut Vec<AuditIssue>,
) {
    let min_a = a.min_rank_to_consider();
    let min_b = b.min_rank_to_consider();

    for (code, dc) in a.iter() {
        if (dc.rank, code) < min_a {
            continue;
        }
        match b.get(code) {
            None => {
                if !dc.is_zero() {
                    issues.push(AuditIssue::MissingCounts {
                        code,
                        side: a_tag,
                        other: b_tag,
                    });
                }
            }
            Some(other) => {
                if (other.rank, code) < min_b {
                    continue;
                }
                if dc.c0p != other.c0p || dc.c1p != other.c1p {
                    // Report each disagreement once, from the stored side.
                    if a_tag == "stored" {
                        issues.push(AuditIssue::CountsMismatch {
                            code,
                            stored: *dc,
                            computed: *other,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use crate::tree::node::NodeIdGen;
    use crate::tree::update::update_tree;
    use crate::sample::SampleHandle;

    fn handle(suid: &str, present: &[i32], y: f32) -> SampleHandle {
        Rc::new(Sample::new(suid, present.iter().map(|&c| (c, 1.0)), y))
    }

    fn grown_tree() -> Node {
        let mut ids = NodeIdGen::new(1);
        let mut root = Node::leaf(&mut ids, 0.0);
        let batch = vec![
            handle("p1", &[1], 1.0),
            handle("p2", &[1], 1.0),
            handle("p3", &[1, 2], 1.0),
            handle("n1", &[2], 0.0),
            handle("n2", &[], 0.0),
            handle("n3", &[], 0.0),
        ];
        update_tree(&mut ids, &mut root, &batch, &[]);
        root
    }

    #[test]
    fn healthy_trees_pass() {
        let mut ids = NodeIdGen::new(1);
        let empty = Node::leaf(&mut ids, 0.0);
        assert!(audit_tree(&empty));

        let grown = grown_tree();
        assert!(!grown.is_leaf());
        assert!(audit_tree(&grown));
    }

    #[test]
    fn corrupted_totals_are_detected() {
        let mut tree = grown_tree();
        tree.c1 += 1;
        assert!(!audit_tree(&tree));
    }

    #[test]
    fn corrupted_split_counts_are_detected() {
        let mut tree = grown_tree();
        // Damage a tracked counter without touching the totals.
        let entries: Vec<(i32, DecisionCounts)> = tree
            .counts
            .iter()
            .map(|(c, dc)| {
                let mut dc = *dc;
                if c == 1 {
                    dc.c0p += 1;
                }
                (c, dc)
            })
            .collect();
        tree.counts = CountsTable::from_parts(entries, tree.counts.watermark());
        assert!(!audit_tree(&tree));
    }

    #[test]
    fn duplicate_suids_are_detected() {
        let mut ids = NodeIdGen::new(1);
        let dup = handle("same", &[], 0.0);
        let mut leaf = Node::leaf_with_samples(
            &mut ids,
            0.0,
            vec![Rc::clone(&dup), handle("other", &[], 1.0), dup],
        );
        leaf.c0 = 2;
        leaf.c1 = 1;
        assert!(!audit_tree(&leaf));
    }

    #[test]
    fn leaf_cardinality_mismatch_is_detected() {
        let mut ids = NodeIdGen::new(1);
        let mut leaf = Node::leaf_with_samples(&mut ids, 0.0, vec![handle("a", &[], 0.0)]);
        // Claims two samples, stores one.
        leaf.c0 = 2;
        assert!(!audit_tree(&leaf));
    }

    #[test]
    fn swapped_children_are_detected() {
        let mut tree = grown_tree();
        if let NodeKind::Internal {
            negative, positive, ..
        } = &mut tree.kind
        {
            std::mem::swap(negative, positive);
        }
        assert!(!audit_tree(&tree));
    }

    /// Fabricated ranks equal to the code make the thresholds transparent.
    fn ranked_table(codes: std::ops::RangeInclusive<i32>) -> CountsTable {
        CountsTable::from_parts(
            codes
                .map(|c| (c, DecisionCounts { c0p: 1, c1p: 0, rank: c as u32 }))
                .collect(),
            (0, 0),
        )
    }

    #[test]
    fn codes_below_the_other_tables_threshold_are_out_of_scope() {
        // Stored scores codes 2..=31; the larger recomputed table scores
        // 6..=35. Codes 2..=5 sit in stored's slice but below the
        // recomputed threshold: agreement is only required on the
        // intersection, so a healthy pair raises nothing.
        let stored = ranked_table(1..=31);
        let recomputed = ranked_table(1..=35);

        let mut issues = Vec::new();
        compare_tables(&stored, &recomputed, "stored", "recomputed", &mut issues);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn disagreements_above_both_thresholds_are_still_reported() {
        let stored = ranked_table(1..=31);
        let entries: Vec<(i32, DecisionCounts)> = (1..=35)
            .map(|c| {
                let c0p = if c == 20 { 2 } else { 1 };
                (c, DecisionCounts { c0p, c1p: 0, rank: c as u32 })
            })
            .collect();
        let recomputed = CountsTable::from_parts(entries, (0, 0));

        let mut issues = Vec::new();
        compare_tables(&stored, &recomputed, "stored", "recomputed", &mut issues);
        assert!(matches!(
            issues.as_slice(),
            [AuditIssue::CountsMismatch { code: 20, .. }]
        ));
    }
}
