//! Entropy, evidence, and split selection.

use crate::tree::counts::{CountsTable, DecisionCounts};
use crate::tree::MIN_EVIDENCE;

/// Natural-log binary entropy of the class counts `(c0, c1)`.
///
/// Follows the convention `0 * ln 0 = 0`; an empty population has entropy 0.
pub fn entropy_binary(c0: u32, c1: u32) -> f32 {
    let n = (c0 + c1) as f32;
    let mut h = 0.0f32;
    if c0 > 0 {
        let p0 = c0 as f32 / n;
        h -= p0 * p0.ln();
    }
    if c1 > 0 {
        let p1 = c1 as f32 / n;
        h -= p1 * p1.ln();
    }
    h
}

/// Whether both sides of the candidate split carry enough samples.
pub fn enough_evidence(dc: &DecisionCounts, c0: u32, c1: u32) -> bool {
    let c0n = c0 - dc.c0p;
    let c1n = c1 - dc.c1p;
    c0n + c1n >= MIN_EVIDENCE && dc.c0p + dc.c1p >= MIN_EVIDENCE
}

/// Weighted entropy of the two partitions induced by a candidate code.
pub fn split_entropy(dc: &DecisionCounts, c0: u32, c1: u32) -> f32 {
    let c0n = c0 - dc.c0p;
    let c1n = c1 - dc.c1p;
    let hn = entropy_binary(c0n, c1n);
    let hp = entropy_binary(dc.c0p, dc.c1p);
    let cn = c0n + c1n;
    let cp = dc.c0p + dc.c1p;
    (hn * cn as f32 + hp * cp as f32) / (cn + cp) as f32
}

/// Pick the split code for a node with totals `(c0, c1)`, if any.
///
/// Scores the eligible codes (enough evidence on both sides, at or above
/// the per-search rank threshold) and returns the one with the lowest
/// weighted split entropy, provided that entropy strictly improves on the
/// node's own. Ties are broken deterministically: the table iterates in
/// ascending code order and the comparison is strict, so the lowest code
/// wins.
pub fn best_split_code(counts: &CountsTable, c0: u32, c1: u32) -> Option<i32> {
    let threshold = counts.min_rank_to_consider();

    let mut best: Option<(f32, i32)> = None;
    for (code, dc) in counts.iter() {
        if (dc.rank, code) < threshold || !enough_evidence(dc, c0, c1) {
            continue;
        }
        let h = split_entropy(dc, c0, c1);
        match best {
            Some((best_h, _)) if h >= best_h => {}
            _ => best = Some((h, code)),
        }
    }

    let current = entropy_binary(c0, c1);
    best.and_then(|(h, code)| if h < current { Some(code) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dc(c0p: u32, c1p: u32) -> DecisionCounts {
        DecisionCounts { c0p, c1p, rank: 1 }
    }

    fn table_of(entries: Vec<(i32, DecisionCounts)>) -> CountsTable {
        CountsTable::from_parts(entries, (0, 0))
    }

    #[test]
    fn entropy_of_pure_and_mixed_populations() {
        assert_eq!(entropy_binary(0, 0), 0.0);
        assert_eq!(entropy_binary(5, 0), 0.0);
        assert_eq!(entropy_binary(0, 5), 0.0);
        assert_abs_diff_eq!(entropy_binary(1, 1), std::f32::consts::LN_2, epsilon = 1e-6);
        assert_abs_diff_eq!(entropy_binary(50, 50), std::f32::consts::LN_2, epsilon = 1e-6);
        // Skew lowers entropy.
        assert!(entropy_binary(9, 1) < entropy_binary(6, 4));
    }

    #[test]
    fn split_entropy_of_perfect_separator_is_zero() {
        // 4 class-0 absent, 4 class-1 present.
        assert_abs_diff_eq!(split_entropy(&dc(0, 4), 4, 4), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn evidence_requires_two_samples_per_side() {
        assert!(!enough_evidence(&dc(0, 1), 1, 1));
        assert!(!enough_evidence(&dc(0, 2), 1, 2));
        assert!(enough_evidence(&dc(0, 2), 2, 2));
    }

    #[test]
    fn perfect_separator_is_selected() {
        let table = table_of(vec![(7, dc(0, 4))]);
        assert_eq!(best_split_code(&table, 4, 4), Some(7));
    }

    #[test]
    fn pure_node_never_splits() {
        // Current entropy is already 0; nothing can strictly improve it.
        let table = table_of(vec![(7, dc(0, 4))]);
        assert_eq!(best_split_code(&table, 0, 8), None);
    }

    #[test]
    fn underpowered_candidates_are_ignored() {
        let table = table_of(vec![(7, dc(0, 1))]);
        assert_eq!(best_split_code(&table, 1, 1), None);
    }

    #[test]
    fn uninformative_split_is_rejected() {
        // The candidate splits 4/4 into two 2/2 halves: no gain.
        let table = table_of(vec![(7, dc(2, 2))]);
        assert_eq!(best_split_code(&table, 4, 4), None);
    }

    #[test]
    fn lowest_code_wins_ties() {
        // Two identical perfect separators.
        let table = table_of(vec![(9, dc(0, 4)), (3, dc(0, 4))]);
        assert_eq!(best_split_code(&table, 4, 4), Some(3));
    }

    #[test]
    fn better_separator_beats_earlier_code() {
        // Code 2 splits 4/4 into (3,1)|(1,3); code 5 separates perfectly.
        let table = table_of(vec![(2, dc(1, 3)), (5, dc(0, 4))]);
        assert_eq!(best_split_code(&table, 4, 4), Some(5));
    }

    #[test]
    fn rank_threshold_excludes_low_ranked_codes() {
        // 31 candidates, ranks equal to the code; the lowest-ranked entry is
        // outside the scored slice even though it separates perfectly.
        let mut entries: Vec<(i32, DecisionCounts)> = (1..=30)
            .map(|c| (c, DecisionCounts { c0p: 2, c1p: 2, rank: c as u32 }))
            .collect();
        entries.push((0, DecisionCounts { c0p: 0, c1p: 4, rank: 0 }));
        let table = CountsTable::from_parts(entries, (0, 0));

        assert_eq!(best_split_code(&table, 4, 4), None);
    }
}
