//! Row measurement cache.
//!
//! Each row starts with a seed estimate and is corrected once the host
//! actually materializes and measures it. Rows that are never materialized
//! keep their seed estimate indefinitely — by definition they are off
//! screen, so the error never shows. Backed by a Fenwick tree so offsets
//! and offset→index lookups stay O(log n).

use super::fenwick::FenwickTree;

/// Smallest size a row may report. Bad measurements (zero, negative before
/// the cast, absurdly large casts) clamp here instead of poisoning the
/// position index — a windowing fault must never crash the render loop.
pub const MIN_ROW_PX: u32 = 1;

#[derive(Debug, Clone)]
pub struct RowMeasurements {
    sizes: FenwickTree,
    /// Tracks which rows hold a real measurement vs. the seed estimate.
    measured: Vec<bool>,
    seed: u32,
}

impl RowMeasurements {
    /// `seed` is the per-row estimate used until a row is measured.
    pub fn new(count: usize, seed: u32) -> Self {
        let seed = seed.max(MIN_ROW_PX);
        Self {
            sizes: FenwickTree::from_values(&vec![u64::from(seed); count]),
            measured: vec![false; count],
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.measured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measured.is_empty()
    }

    /// Current size for a row (seed or recorded).
    pub fn estimate(&self, index: usize) -> u32 {
        if index >= self.len() {
            return self.seed;
        }
        self.sizes.get(index) as u32
    }

    /// Record a real measurement. Returns the signed delta against the
    /// previous size so the window can anchor the scroll position.
    pub fn record(&mut self, index: usize, size: u32) -> i64 {
        if index >= self.len() {
            return 0;
        }
        let size = size.max(MIN_ROW_PX);
        let old = self.sizes.get(index);
        self.sizes.set(index, u64::from(size));
        self.measured[index] = true;
        i64::from(size) - old as i64
    }

    /// Whether the row has a real measurement.
    pub fn is_measured(&self, index: usize) -> bool {
        self.measured.get(index).copied().unwrap_or(false)
    }

    /// Pixel offset of the top of a row.
    pub fn offset_of(&self, index: usize) -> u64 {
        if index == 0 || self.is_empty() {
            return 0;
        }
        self.sizes.prefix(index.min(self.len()) - 1)
    }

    /// Total estimated extent of the list.
    pub fn total_extent(&self) -> u64 {
        self.sizes.total()
    }

    /// Index of the row occupying a pixel offset. Offsets at or past the end
    /// clamp to the last row.
    pub fn index_at_offset(&self, offset: u64) -> usize {
        if self.is_empty() {
            return 0;
        }
        match self.sizes.find_prefix(offset) {
            Some(i) => (i + 1).min(self.len() - 1),
            None => 0,
        }
    }

    /// Extend the tail with `count` seed-estimated rows.
    pub fn append(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let new_len = self.len() + count;
        self.sizes.resize(new_len);
        for i in self.len()..new_len {
            self.sizes.set(i, u64::from(self.seed));
        }
        self.measured.resize(new_len, false);
    }

    /// Remove a row (a rolled-back optimistic entry). Returns the extent
    /// removed. Rebuilds the position index; removals are rare enough that
    /// O(n) is acceptable.
    pub fn remove(&mut self, index: usize) -> u32 {
        if index >= self.len() {
            return 0;
        }
        let removed = self.sizes.get(index) as u32;
        let values: Vec<u64> = (0..self.len())
            .filter(|&i| i != index)
            .map(|i| self.sizes.get(i))
            .collect();
        self.sizes = FenwickTree::from_values(&values);
        self.measured.remove(index);
        removed
    }

    /// Insert one seed-estimated row at `index` (a live message landing
    /// before the pending tail). Returns the extent added. Rebuilds the
    /// position index like `remove`.
    pub fn insert(&mut self, index: usize) -> u64 {
        let index = index.min(self.len());
        let mut values: Vec<u64> = (0..self.len()).map(|i| self.sizes.get(i)).collect();
        values.insert(index, u64::from(self.seed));
        self.sizes = FenwickTree::from_values(&values);
        self.measured.insert(index, false);
        u64::from(self.seed)
    }

    /// Insert `count` seed-estimated rows at the front (older page loaded).
    /// Returns the extent added so the window can keep the view anchored.
    pub fn prepend(&mut self, count: usize) -> u64 {
        if count == 0 {
            return 0;
        }
        self.sizes.prepend(count, u64::from(self.seed));
        let mut measured = vec![false; count];
        measured.extend(self.measured.drain(..));
        self.measured = measured;
        u64::from(self.seed) * count as u64
    }
}
