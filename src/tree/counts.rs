//! Bounded per-node sufficient statistics ("decision counts").
//!
//! Each node tracks, per feature code, how many of its class-0 and class-1
//! samples have the feature present. The table is sparse and bounded: only
//! the [`MAX_CODES_KEPT`](crate::tree::MAX_CODES_KEPT) highest-ranking codes
//! seen under the node are retained, where rank is the deterministic
//! per-node hash of [`code_rank`]. Codes evicted for capacity are remembered
//! through a `(rank, code)` watermark and stay suppressed until a full
//! recount rebuilds the table from the node's live population.

use std::collections::BTreeSet;

use crate::hash::code_rank;
use crate::sample::{Sample, SampleHandle};
use crate::tree::MAX_CODES_KEPT;
use crate::tree::MAX_CODES_SCORED;

/// Eviction ordering key: rank first, code as tie-break.
pub type RankKey = (u32, i32);

/// Per-feature counters under one node.
///
/// `c0p`/`c1p` count the class-0/class-1 samples that have the feature
/// present; the complementary absent-side counts are derived from the
/// node's totals. `rank` caches [`code_rank`] for this code in this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionCounts {
    pub c0p: u32,
    pub c1p: u32,
    pub rank: u32,
}

impl DecisionCounts {
    /// No present-side evidence left in either class.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.c0p == 0 && self.c1p == 0
    }
}

/// The bounded decision-counts table of one node.
///
/// Entries are kept sorted by code, which fixes iteration order everywhere
/// it is observable (split tie-breaks, the save format).
#[derive(Debug, Clone, Default)]
pub struct CountsTable {
    entries: Vec<(i32, DecisionCounts)>,
    watermark: RankKey,
}

impl CountsTable {
    /// Rebuild from parts; entries may arrive in any order.
    pub fn from_parts(mut entries: Vec<(i32, DecisionCounts)>, watermark: RankKey) -> Self {
        entries.sort_unstable_by_key(|&(code, _)| code);
        Self { entries, watermark }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &DecisionCounts)> {
        self.entries.iter().map(|(code, dc)| (*code, dc))
    }

    pub fn get(&self, code: i32) -> Option<&DecisionCounts> {
        self.entries
            .binary_search_by_key(&code, |&(c, _)| c)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    fn get_mut(&mut self, code: i32) -> Option<&mut DecisionCounts> {
        self.entries
            .binary_search_by_key(&code, |&(c, _)| c)
            .ok()
            .map(|i| &mut self.entries[i].1)
    }

    #[inline]
    pub fn contains(&self, code: i32) -> bool {
        self.get(code).is_some()
    }

    /// Watermark below which evicted codes must not re-enter.
    #[inline]
    pub fn watermark(&self) -> RankKey {
        self.watermark
    }

    /// Withdraw one sample's contribution.
    ///
    /// Entries whose present-side counts drop to zero in both classes are
    /// evicted on the spot.
    pub fn apply_remove(&mut self, sample: &Sample) {
        let positive = sample.is_positive();
        for (code, dc) in self.entries.iter_mut() {
            if sample.has_code(*code) {
                if positive {
                    dc.c1p -= 1;
                } else {
                    dc.c0p -= 1;
                }
            }
        }
        self.entries.retain(|(_, dc)| !dc.is_zero());
    }

    /// Fold one sample's contribution in.
    ///
    /// Codes already tracked are bumped. Codes new to this node are admitted
    /// only at or above the watermark; note that a sample *mentioning* a
    /// code admits it even when the value marks the feature absent. If the
    /// table overflows, the lowest-ranked entry is evicted and the watermark
    /// raised past it.
    pub fn apply_add(&mut self, sample: &Sample, node_id: u64) {
        let positive = sample.is_positive();

        for (code, dc) in self.entries.iter_mut() {
            if sample.has_code(*code) {
                if positive {
                    dc.c1p += 1;
                } else {
                    dc.c0p += 1;
                }
            }
        }

        for (&code, &value) in &sample.x_codes {
            if self.contains(code) {
                continue;
            }
            let rank = code_rank(code, node_id);
            if (rank, code) < self.watermark {
                continue;
            }
            let mut dc = DecisionCounts { c0p: 0, c1p: 0, rank };
            if value > 0.5 {
                if positive {
                    dc.c1p = 1;
                } else {
                    dc.c0p = 1;
                }
            }
            self.insert_sorted(code, dc);
            if self.entries.len() > MAX_CODES_KEPT {
                self.evict_lowest_ranked();
            }
        }
    }

    fn insert_sorted(&mut self, code: i32, dc: DecisionCounts) {
        match self.entries.binary_search_by_key(&code, |&(c, _)| c) {
            Ok(i) => self.entries[i].1 = dc,
            Err(i) => self.entries.insert(i, (code, dc)),
        }
    }

    fn evict_lowest_ranked(&mut self) {
        let lowest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, (code, dc))| (dc.rank, *code))
            .map(|(i, (code, dc))| (i, (dc.rank, *code)));
        if let Some((i, (rank, code))) = lowest {
            self.entries.remove(i);
            self.watermark = self.watermark.max((rank, code + 1));
        }
    }

    /// Per-search rank threshold: with more than
    /// [`MAX_CODES_SCORED`](crate::tree::MAX_CODES_SCORED) entries, only the
    /// top-ranked slice of that size is scored; the threshold is the lowest
    /// key inside it. Smaller tables score everything.
    pub fn min_rank_to_consider(&self) -> RankKey {
        if self.entries.len() <= MAX_CODES_SCORED {
            return (0, 0);
        }
        let mut keys: Vec<RankKey> = self
            .entries
            .iter()
            .map(|(code, dc)| (dc.rank, *code))
            .collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys[MAX_CODES_SCORED - 1]
    }
}

/// Recompute a node's table and class totals from its actual population.
///
/// Resets the watermark and re-ranks every code the population mentions;
/// this is the only path that can re-admit previously evicted codes.
pub fn compute_counters(node_id: u64, samples: &[SampleHandle]) -> (CountsTable, u32, u32) {
    let mut c0 = 0u32;
    let mut c1 = 0u32;
    for s in samples {
        if s.is_positive() {
            c1 += 1;
        } else {
            c0 += 1;
        }
    }

    let used: BTreeSet<i32> = samples
        .iter()
        .flat_map(|s| s.x_codes.keys().copied())
        .collect();

    let mut watermark: RankKey = (0, 0);
    let mut kept: BTreeSet<RankKey> = BTreeSet::new();
    for &code in &used {
        kept.insert((code_rank(code, node_id), code));
        if kept.len() > MAX_CODES_KEPT {
            if let Some((rank, evicted)) = kept.pop_first() {
                watermark = watermark.max((rank, evicted + 1));
            }
        }
    }

    let entries: Vec<(i32, DecisionCounts)> = kept
        .iter()
        .map(|&(rank, code)| (code, DecisionCounts { c0p: 0, c1p: 0, rank }))
        .collect();
    let mut table = CountsTable::from_parts(entries, watermark);

    for s in samples {
        let positive = s.is_positive();
        for (&code, &value) in &s.x_codes {
            if value > 0.5 {
                if let Some(dc) = table.get_mut(code) {
                    if positive {
                        dc.c1p += 1;
                    } else {
                        dc.c0p += 1;
                    }
                }
            }
        }
    }

    (table, c0, c1)
}
