//! Hit-count ordered rule lists.
//!
//! # Responsibilities
//! - Assign ids and keep per-rule hit counters
//! - Probe rules most-hit-first and count matches
//! - Provide hit-count and display-ordered snapshots
//!
//! # Design Decisions
//! - One mutex per list; matching, mutation and snapshots all take it
//! - Counters live in the list entry, rules themselves are plain matchers
//! - Re-sorting is lazy: `refresh_order` only sorts when the order is off

use std::cmp::{Ordering, Reverse};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ordering used for display listings.
pub trait Rule: Clone {
    fn display_cmp(&self, other: &Self) -> Ordering;
}

/// A rule with its list bookkeeping.
#[derive(Debug, Clone)]
pub struct RuleEntry<R> {
    id: u32,
    hits: u32,
    seq: u64,
    rule: R,
}

impl<R> RuleEntry<R> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }
}

#[derive(Debug)]
struct Inner<R> {
    entries: Vec<RuleEntry<R>>,
    next_id: u32,
    next_seq: u64,
}

impl<R> Inner<R> {
    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn push(&mut self, rule: R, hits: u32) -> u32 {
        let id = self.next_id();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(RuleEntry { id, hits, seq, rule });
        id
    }

    fn in_order(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].hits >= w[1].hits)
    }

    fn sort_by_hits(&mut self) {
        self.entries.sort_by_key(|e| (Reverse(e.hits), e.seq));
    }
}

/// Mutex-guarded list of rules, most-hit first.
#[derive(Debug)]
pub struct RuleList<R> {
    inner: Mutex<Inner<R>>,
}

impl<R> Default for RuleList<R> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 0,
                next_seq: 0,
            }),
        }
    }
}

impl<R: Rule> RuleList<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a rule with a zero hit count. Returns its id.
    pub fn add(&self, rule: R) -> u32 {
        let mut inner = self.lock();
        let id = inner.push(rule, 0);
        inner.sort_by_hits();
        id
    }

    pub fn get(&self, id: u32) -> Option<RuleEntry<R>> {
        self.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn remove(&self, id: u32) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        inner.entries.len() != before
    }

    /// Swap in a new rule at the same position with the same hit count.
    ///
    /// The replacement gets a fresh id, which is returned.
    pub fn replace(&self, id: u32, rule: R) -> Option<u32> {
        let mut inner = self.lock();
        let index = inner.entries.iter().position(|e| e.id == id)?;
        let new_id = inner.next_id();
        let old = &mut inner.entries[index];
        old.id = new_id;
        old.rule = rule;
        Some(new_id)
    }

    /// Linear scan in working order. The first rule accepted by `matches`
    /// has its counter bumped; a counter reaching `u32::MAX` resets the list.
    pub fn find<F>(&self, mut matches: F) -> Option<RuleEntry<R>>
    where
        F: FnMut(&R) -> bool,
    {
        let mut inner = self.lock();
        let index = inner.entries.iter().position(|e| matches(&e.rule))?;

        let entry = &mut inner.entries[index];
        entry.hits = entry.hits.saturating_add(1);
        let hit = entry.clone();

        if hit.hits == u32::MAX {
            for entry in inner.entries.iter_mut() {
                entry.hits = 0;
            }
        }
        Some(hit)
    }

    /// Re-sort by hit count if matching has disturbed the order.
    ///
    /// Returns whether a sort happened.
    pub fn refresh_order(&self) -> bool {
        let mut inner = self.lock();
        if inner.in_order() {
            return false;
        }
        inner.sort_by_hits();
        true
    }

    /// Working order as it currently stands.
    pub fn snapshot(&self) -> Vec<RuleEntry<R>> {
        self.lock().entries.clone()
    }

    /// Most-hit first, ties in insertion order.
    pub fn by_hit_count(&self) -> Vec<RuleEntry<R>> {
        let mut entries = self.snapshot();
        entries.sort_by_key(|e| (Reverse(e.hits), e.seq));
        entries
    }

    /// Display order, independent of hit counts.
    pub fn sorted(&self) -> Vec<RuleEntry<R>> {
        let mut entries = self.snapshot();
        entries.sort_by(|a, b| a.rule.display_cmp(&b.rule));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Replace the contents with loaded `(rule, hits)` pairs.
    pub(crate) fn reload(&self, rules: Vec<(R, u32)>) {
        let mut inner = self.lock();
        inner.entries.clear();
        for (rule, hits) in rules {
            inner.push(rule, hits);
        }
        inner.sort_by_hits();
    }
}
