//! Windowed renderer core.
//!
//! This module handles:
//! - Computing the visible index range for a scroll position (O(log n))
//! - Overscan and the materialized-row mount/unmount plan
//! - The stick-to-bottom policy for appended messages
//! - Scroll anchoring across prepends and measurement corrections
//!
//! The window is a pure function of (scroll offset, measurements) and is
//! memoized: callers may invoke `visible_range` every frame, recomputation
//! only happens after an actual delta.

use std::ops::Range;

use super::measure::RowMeasurements;

/// Rows to mount and unmount after a window change. `unmount` is applied
/// first so stale rows never coexist with rows outside the overscan band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub unmount: Vec<usize>,
    pub mount: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ListWindow {
    rows: RowMeasurements,
    scroll_offset: u64,
    viewport_px: u32,
    overscan: usize,
    stick_threshold_px: u64,
    mounted: Range<usize>,
    cached_visible: Option<Range<usize>>,
}

impl ListWindow {
    pub fn new(count: usize, seed_row_px: u32, overscan: usize, stick_threshold_px: u64) -> Self {
        Self {
            rows: RowMeasurements::new(count, seed_row_px),
            scroll_offset: 0,
            viewport_px: 0,
            overscan,
            stick_threshold_px,
            mounted: 0..0,
            cached_visible: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn scroll_offset(&self) -> u64 {
        self.scroll_offset
    }

    pub fn total_extent(&self) -> u64 {
        self.rows.total_extent()
    }

    fn max_scroll(&self) -> u64 {
        self.rows
            .total_extent()
            .saturating_sub(u64::from(self.viewport_px))
    }

    /// Set the viewport height in pixels.
    pub fn set_viewport(&mut self, px: u32) {
        if px != self.viewport_px {
            self.viewport_px = px;
            self.scroll_offset = self.scroll_offset.min(self.max_scroll());
            self.cached_visible = None;
        }
    }

    /// Set the absolute scroll offset, clamped to the valid range.
    pub fn set_scroll_offset(&mut self, px: u64) {
        let clamped = px.min(self.max_scroll());
        if clamped != self.scroll_offset {
            self.scroll_offset = clamped;
            self.cached_visible = None;
        }
    }

    /// Scroll by a signed pixel delta.
    pub fn scroll_by(&mut self, delta: i64) {
        let next = if delta >= 0 {
            self.scroll_offset.saturating_add(delta as u64)
        } else {
            self.scroll_offset.saturating_sub(delta.unsigned_abs())
        };
        self.set_scroll_offset(next);
    }

    pub fn scroll_to_bottom(&mut self) {
        let max = self.max_scroll();
        if max != self.scroll_offset {
            self.scroll_offset = max;
            self.cached_visible = None;
        }
    }

    /// Whether the viewport bottom is within the stick threshold of the
    /// list end. Short lists that fit entirely in the viewport count as
    /// at-bottom.
    pub fn is_near_bottom(&self) -> bool {
        let viewed = self.scroll_offset + u64::from(self.viewport_px);
        self.rows.total_extent().saturating_sub(viewed) <= self.stick_threshold_px
    }

    /// The indices whose estimated position intersects the viewport.
    /// Memoized; recomputed only after a scroll/measurement/content delta.
    pub fn visible_range(&mut self) -> Range<usize> {
        if let Some(cached) = &self.cached_visible {
            return cached.clone();
        }
        let range = if self.rows.is_empty() || self.viewport_px == 0 {
            0..0
        } else {
            let start = self.rows.index_at_offset(self.scroll_offset);
            let bottom = self.scroll_offset + u64::from(self.viewport_px) - 1;
            let last = self.rows.index_at_offset(bottom);
            start..last + 1
        };
        self.cached_visible = Some(range.clone());
        range
    }

    /// Visible range widened by the overscan margin, clamped to the list.
    pub fn materialize_range(&mut self) -> Range<usize> {
        let visible = self.visible_range();
        if visible.is_empty() {
            return 0..0;
        }
        let start = visible.start.saturating_sub(self.overscan);
        let end = (visible.end + self.overscan).min(self.rows.len());
        start..end
    }

    /// Diff the materialized range against what is currently mounted.
    /// Rows leaving the overscan band are listed for unmount first.
    pub fn mount_plan(&mut self) -> MountPlan {
        let next = self.materialize_range();
        let prev = self.mounted.clone();
        let unmount = prev.clone().filter(|i| !next.contains(i)).collect();
        let mount = next.clone().filter(|i| !prev.contains(i)).collect();
        self.mounted = next;
        MountPlan { unmount, mount }
    }

    /// Pixel offset of a row's top edge relative to the viewport top.
    pub fn row_viewport_offset(&self, index: usize) -> i64 {
        self.rows.offset_of(index) as i64 - self.scroll_offset as i64
    }

    /// Append `count` rows at the tail. If the viewport was already near the
    /// bottom the view follows the new tail; otherwise the scroll offset is
    /// left untouched — a user reading history is never yanked down.
    pub fn append(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let stick = self.is_near_bottom();
        self.rows.append(count);
        if stick {
            self.scroll_offset = self.max_scroll();
        }
        self.cached_visible = None;
    }

    /// Insert `count` rows at the front (an older page arrived). The scroll
    /// offset shifts by the added extent so the rows on screen stay put.
    pub fn prepend(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let added = self.rows.prepend(count);
        self.scroll_offset += added;
        self.mounted = (self.mounted.start + count)..(self.mounted.end + count);
        self.cached_visible = None;
    }

    /// Insert one row at `index` (a live message landing before the pending
    /// tail). A tail insert follows the append stick-to-bottom policy;
    /// otherwise an insert at or above the viewport top shifts the scroll
    /// offset down by the added extent so on-screen content stays put.
    pub fn insert_at(&mut self, index: usize) {
        if index >= self.rows.len() {
            self.append(1);
            return;
        }
        let stick = self.is_near_bottom();
        let top = self.rows.offset_of(index);
        let added = self.rows.insert(index);
        if stick {
            self.scroll_offset = self.max_scroll();
        } else if top <= self.scroll_offset {
            self.scroll_offset += added;
        }
        self.mounted = 0..0;
        self.cached_visible = None;
    }

    /// Remove a row (a rolled-back send). Removal above the viewport
    /// shifts the scroll offset up by the removed extent so on-screen
    /// content stays put. Mounted-row bookkeeping resets since every index
    /// after the removal shifts.
    pub fn remove(&mut self, index: usize) {
        if index >= self.rows.len() {
            return;
        }
        let top = self.rows.offset_of(index);
        let removed = u64::from(self.rows.remove(index));
        if top < self.scroll_offset {
            self.scroll_offset = self.scroll_offset.saturating_sub(removed);
        }
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        self.mounted = 0..0;
        self.cached_visible = None;
    }

    /// Record a real measurement for a row. Corrections for rows fully
    /// above the viewport shift the scroll offset by the delta, so content
    /// already on screen does not jump; rows at or below the viewport only
    /// move content below it.
    pub fn record_measurement(&mut self, index: usize, size_px: u32) {
        if index >= self.rows.len() {
            return;
        }
        let bottom_before = self.rows.offset_of(index) + u64::from(self.rows.estimate(index));
        let delta = self.rows.record(index, size_px);
        if delta == 0 {
            return;
        }
        if bottom_before <= self.scroll_offset {
            let shifted = self.scroll_offset as i64 + delta;
            self.scroll_offset = shifted.max(0) as u64;
        }
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        self.cached_visible = None;
    }
}
