#![forbid(unsafe_code)]

//! Bounded holder for the K largest observed bitrates.
//!
//! Entries decay multiplicatively on every poll tick, so the median of the
//! list tracks the recent sustained peak rather than an all-time high.
//! K is small (20 by default), so linear insertion beats heap bookkeeping
//! and keeps the median lookup O(1).

use std::sync::{PoisonError, RwLock};

pub struct PeakHolder {
    cap: usize,
    entries: RwLock<Vec<u64>>,
}

impl PeakHolder {
    /// `cap` – maximum number of retained peaks (at least 1).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), entries: RwLock::new(Vec::new()) }
    }

    /// Insert a value, keeping the list sorted descending and capped.
    /// A value no larger than the smallest entry of a full list is dropped.
    pub fn add(&self, value: u64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.cap {
            if let Some(&smallest) = entries.last() {
                if value <= smallest {
                    return;
                }
            }
        }
        let pos = entries.iter().position(|&e| e <= value).unwrap_or(entries.len());
        entries.insert(pos, value);
        if entries.len() > self.cap {
            entries.pop();
        }
    }

    /// Multiply every entry by `factor`; order is preserved.
    pub fn shrink(&self, factor: f64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.iter_mut() {
            *entry = (*entry as f64 * factor) as u64;
        }
    }

    /// Middle element of the sorted list, 0 when empty.
    #[must_use]
    pub fn median(&self) -> u64 {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return 0;
        }
        entries[entries.len() / 2]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries, largest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u64> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
