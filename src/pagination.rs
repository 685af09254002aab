//! Backward pagination trigger.
//!
//! Watches how close the materialized range sits to the older edge of the
//! loaded list and fires a single "load more" signal per threshold
//! crossing. While a fetch is in flight — and for a settle period after it
//! completes — the trigger stays quiet, so a page that doesn't move the
//! range far enough from the edge cannot cause a tight loop of redundant
//! fetches.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct PaginationTrigger {
    threshold: usize,
    settle: Duration,
    in_flight: bool,
    settled_at: Option<Instant>,
}

impl PaginationTrigger {
    pub fn new(threshold: usize, settle: Duration) -> Self {
        Self {
            threshold,
            settle,
            in_flight: false,
            settled_at: None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Observe the materialized range's distance (in rows) from the older
    /// edge of the `total` loaded rows. Returns true exactly when a fetch
    /// should start; the trigger then holds its in-flight flag until
    /// `complete` + settle delay.
    pub fn observe(&mut self, rows_to_edge: usize, total: usize, now: Instant) -> bool {
        if self.in_flight || total == 0 {
            return false;
        }
        if let Some(settled) = self.settled_at {
            if now.duration_since(settled) < self.settle {
                return false;
            }
        }
        if rows_to_edge <= self.threshold {
            self.in_flight = true;
            self.settled_at = None;
            true
        } else {
            false
        }
    }

    /// Claim the in-flight slot for an explicit fetch (initial history
    /// fill). Bypasses the threshold test but never stacks fetches.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        self.settled_at = None;
        true
    }

    /// A fetch finished (success or failure). Starts the settle delay.
    pub fn complete(&mut self, now: Instant) {
        self.in_flight = false;
        self.settled_at = Some(now);
    }
}
