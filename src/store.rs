//! The sample store: committed samples plus the pending staging sets.
//!
//! Mutations do not touch the trees directly. `add` and `remove` stage
//! changes in two pending sets keyed by suid; a commit drains both sets
//! through the tree update engine and then reconciles the committed map.
//! Re-adding a live suid becomes an atomic delete-then-insert at commit
//! time.

use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;

use crate::sample::{Sample, SampleHandle};

/// Committed samples and the pending add/remove sets.
///
/// Keys are suids; `BTreeMap` keeps every observable ordering (commit batch
/// order, sample iteration, the save format) lexicographic and stable.
#[derive(Debug, Default)]
pub struct SampleStore {
    committed: BTreeMap<String, SampleHandle>,
    to_add: BTreeMap<String, SampleHandle>,
    to_remove: BTreeMap<String, SampleHandle>,
    dirty: bool,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a sample for insertion.
    ///
    /// Replaces any same-suid pending add. If the suid is already committed
    /// (and not already scheduled for removal), the committed sample is
    /// scheduled for removal first, so the commit removes-then-adds.
    ///
    /// Returns `true` iff this was a fresh insertion rather than the
    /// replacement of a pending add. An empty suid is rejected: no state
    /// change, `false`.
    pub fn add(&mut self, sample: Sample) -> bool {
        if sample.suid.is_empty() {
            return false;
        }
        self.dirty = true;
        let suid = sample.suid.clone();

        let fresh = if self.to_add.contains_key(&suid) {
            false
        } else {
            if !self.to_remove.contains_key(&suid) {
                if let Some(live) = self.committed.get(&suid) {
                    self.to_remove.insert(suid.clone(), Rc::clone(live));
                }
            }
            true
        };

        self.to_add.insert(suid, Rc::new(sample));
        fresh
    }

    /// Stage a removal.
    ///
    /// Cancels a pending add if one exists; otherwise schedules a committed
    /// sample for removal. Returns `false` when the suid is unknown or its
    /// removal is already scheduled.
    pub fn remove(&mut self, suid: &str) -> bool {
        if self.to_add.remove(suid).is_some() {
            self.dirty = true;
            return true;
        }
        if self.to_remove.contains_key(suid) {
            return false;
        }
        match self.committed.get(suid) {
            Some(live) => {
                self.dirty = true;
                self.to_remove.insert(suid.to_owned(), Rc::clone(live));
                true
            }
            None => false,
        }
    }

    /// Whether any staged change awaits a commit.
    #[inline]
    pub fn has_changes(&self) -> bool {
        self.dirty
    }

    /// Pending insertions, by suid.
    #[inline]
    pub fn pending_add(&self) -> &BTreeMap<String, SampleHandle> {
        &self.to_add
    }

    /// Pending removals, by suid.
    #[inline]
    pub fn pending_remove(&self) -> &BTreeMap<String, SampleHandle> {
        &self.to_remove
    }

    /// Reconcile the committed map after the trees have been updated:
    /// drop removed entries, move added entries in, clear the staging sets.
    pub fn finish_commit(&mut self) {
        let removed = mem::take(&mut self.to_remove);
        for suid in removed.keys() {
            self.committed.remove(suid);
        }
        let added = mem::take(&mut self.to_add);
        self.committed.extend(added);
        self.dirty = false;
    }

    /// The committed samples, by suid.
    #[inline]
    pub fn committed(&self) -> &BTreeMap<String, SampleHandle> {
        &self.committed
    }

    /// Install an already-committed sample. Used when loading a saved model.
    pub(crate) fn insert_committed(&mut self, handle: SampleHandle) {
        self.committed.insert(handle.suid.clone(), handle);
    }
}
