//! Fenwick (binary indexed) tree over row sizes.
//!
//! Backs the row position index: prefix sums give the pixel offset of any
//! row, and `find_prefix` maps a pixel offset back to a row index, both in
//! O(log n). This is what keeps window computation proportional to the
//! visible range instead of the total item count.

/// Prefix-sum tree storing one `u64` value per row.
#[derive(Debug, Clone, Default)]
pub struct FenwickTree {
    tree: Vec<u64>,
    len: usize,
}

impl FenwickTree {
    /// Create a tree of `len` zeroed values.
    pub fn new(len: usize) -> Self {
        Self {
            tree: vec![0; len + 1],
            len,
        }
    }

    /// Build from a slice of values in O(n).
    pub fn from_values(values: &[u64]) -> Self {
        let mut tree = vec![0u64; values.len() + 1];
        for (i, &v) in values.iter().enumerate() {
            let pos = i + 1;
            tree[pos] += v;
            let parent = pos + (pos & pos.wrapping_neg());
            if parent <= values.len() {
                let carried = tree[pos];
                tree[parent] += carried;
            }
        }
        Self {
            tree,
            len: values.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of values `[0..=idx]`.
    pub fn prefix(&self, idx: usize) -> u64 {
        let mut i = idx.min(self.len.saturating_sub(1)) + 1;
        if self.len == 0 {
            return 0;
        }
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    /// Sum of all values.
    pub fn total(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.prefix(self.len - 1)
        }
    }

    /// Value at `idx`.
    pub fn get(&self, idx: usize) -> u64 {
        if idx >= self.len {
            return 0;
        }
        if idx == 0 {
            self.prefix(0)
        } else {
            self.prefix(idx) - self.prefix(idx - 1)
        }
    }

    /// Set the value at `idx`.
    pub fn set(&mut self, idx: usize, value: u64) {
        if idx >= self.len {
            return;
        }
        let current = self.get(idx);
        if value >= current {
            self.add(idx, value - current);
        } else {
            self.sub(idx, current - value);
        }
    }

    fn add(&mut self, idx: usize, delta: u64) {
        let mut i = idx + 1;
        while i <= self.len {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    fn sub(&mut self, idx: usize, delta: u64) {
        let mut i = idx + 1;
        while i <= self.len {
            self.tree[i] -= delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Largest index `i` such that `prefix(i) <= target`, or `None` if even
    /// `prefix(0)` exceeds it.
    pub fn find_prefix(&self, target: u64) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let mut pos = 0usize;
        let mut remaining = target;
        let mut step = self.len.next_power_of_two();
        while step > 0 {
            let next = pos + step;
            if next <= self.len && self.tree[next] <= remaining {
                remaining -= self.tree[next];
                pos = next;
            }
            step >>= 1;
        }
        if pos == 0 {
            None
        } else {
            Some(pos - 1)
        }
    }

    /// Grow the tree to `new_len`, new entries zeroed. Rebuilds in O(n);
    /// fine for append batches, which are infrequent relative to queries.
    pub fn resize(&mut self, new_len: usize) {
        if new_len == self.len {
            return;
        }
        let mut values: Vec<u64> = (0..self.len.min(new_len)).map(|i| self.get(i)).collect();
        values.resize(new_len, 0);
        *self = Self::from_values(&values);
    }

    /// Shift all values right by `count`, filling the front with `fill`.
    /// Used when older pages are prepended.
    pub fn prepend(&mut self, count: usize, fill: u64) {
        if count == 0 {
            return;
        }
        let mut values = Vec::with_capacity(self.len + count);
        values.resize(count, fill);
        for i in 0..self.len {
            values.push(self.get(i));
        }
        *self = Self::from_values(&values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sums() {
        let t = FenwickTree::from_values(&[5, 3, 7, 2]);
        assert_eq!(t.prefix(0), 5);
        assert_eq!(t.prefix(1), 8);
        assert_eq!(t.prefix(2), 15);
        assert_eq!(t.prefix(3), 17);
        assert_eq!(t.total(), 17);
    }

    #[test]
    fn test_get_and_set() {
        let mut t = FenwickTree::from_values(&[5, 3, 7]);
        assert_eq!(t.get(1), 3);
        t.set(1, 10);
        assert_eq!(t.get(1), 10);
        assert_eq!(t.total(), 22);
        t.set(1, 1);
        assert_eq!(t.get(1), 1);
        assert_eq!(t.total(), 13);
    }

    #[test]
    fn test_find_prefix() {
        let t = FenwickTree::from_values(&[10, 10, 10]);
        // prefix(0)=10, prefix(1)=20, prefix(2)=30
        assert_eq!(t.find_prefix(5), None);
        assert_eq!(t.find_prefix(10), Some(0));
        assert_eq!(t.find_prefix(19), Some(0));
        assert_eq!(t.find_prefix(20), Some(1));
        assert_eq!(t.find_prefix(1000), Some(2));
    }

    #[test]
    fn test_resize_preserves_values() {
        let mut t = FenwickTree::from_values(&[1, 2, 3]);
        t.resize(5);
        assert_eq!(t.len(), 5);
        assert_eq!(t.get(2), 3);
        assert_eq!(t.get(4), 0);
        assert_eq!(t.total(), 6);
    }

    #[test]
    fn test_prepend_shifts_values() {
        let mut t = FenwickTree::from_values(&[7, 8]);
        t.prepend(2, 5);
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(0), 5);
        assert_eq!(t.get(1), 5);
        assert_eq!(t.get(2), 7);
        assert_eq!(t.get(3), 8);
        assert_eq!(t.total(), 25);
    }

    #[test]
    fn test_empty_tree() {
        let t = FenwickTree::new(0);
        assert_eq!(t.total(), 0);
        assert_eq!(t.find_prefix(10), None);
    }
}
