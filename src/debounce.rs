//! Debounced indicator state machine.
//!
//! One reusable primitive for "don't flash transient UI state": a raw
//! boolean condition becomes visible only after it has held continuously
//! for `show_delay`, and hides again only after it has been clear for
//! `hide_delay`. The connection banner uses show_delay = 500ms with an
//! immediate hide; other flicker-prone state can reuse the same machine
//! instead of scattering ad hoc timers.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DebouncedIndicator {
    show_delay: Duration,
    hide_delay: Duration,
    raw: bool,
    raw_since: Option<Instant>,
    visible: bool,
}

impl DebouncedIndicator {
    pub fn new(show_delay: Duration, hide_delay: Duration) -> Self {
        Self {
            show_delay,
            hide_delay,
            raw: false,
            raw_since: None,
            visible: false,
        }
    }

    /// Feed the raw condition. Call on every underlying state change.
    pub fn set_raw(&mut self, raw: bool, now: Instant) {
        if raw != self.raw {
            self.raw = raw;
            self.raw_since = Some(now);
        }
    }

    /// Debounced visibility at `now`.
    pub fn is_visible(&mut self, now: Instant) -> bool {
        let since = match self.raw_since {
            Some(t) => t,
            None => return self.visible,
        };
        let held = now.duration_since(since);
        if self.raw && !self.visible && held >= self.show_delay {
            self.visible = true;
        } else if !self.raw && self.visible && held >= self.hide_delay {
            self.visible = false;
        }
        self.visible
    }

    /// When the next visibility flip is due, if the raw state holds.
    /// `None` means no transition is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        let since = self.raw_since?;
        if self.raw && !self.visible {
            Some(since + self.show_delay)
        } else if !self.raw && self.visible {
            Some(since + self.hide_delay)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banner() -> DebouncedIndicator {
        // The connection banner: show after 500ms, hide immediately
        DebouncedIndicator::new(Duration::from_millis(500), Duration::ZERO)
    }

    #[test]
    fn test_short_blip_never_shows() {
        let mut d = banner();
        let start = Instant::now();
        d.set_raw(true, start);
        // Resolves after 300ms, under the 500ms debounce
        assert!(!d.is_visible(start + Duration::from_millis(300)));
        d.set_raw(false, start + Duration::from_millis(300));
        assert!(!d.is_visible(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_long_outage_shows_then_hides_on_recovery() {
        let mut d = banner();
        let start = Instant::now();
        d.set_raw(true, start);
        assert!(!d.is_visible(start + Duration::from_millis(499)));
        assert!(d.is_visible(start + Duration::from_millis(500)));
        // Recovery hides immediately (hide_delay = 0)
        d.set_raw(false, start + Duration::from_millis(800));
        assert!(!d.is_visible(start + Duration::from_millis(800)));
    }

    #[test]
    fn test_flapping_restarts_the_show_timer() {
        let mut d = banner();
        let start = Instant::now();
        d.set_raw(true, start);
        d.set_raw(false, start + Duration::from_millis(400));
        d.set_raw(true, start + Duration::from_millis(450));
        // Only 400ms of continuous raw state since the last flip
        assert!(!d.is_visible(start + Duration::from_millis(850)));
        assert!(d.is_visible(start + Duration::from_millis(950)));
    }

    #[test]
    fn test_next_deadline_tracks_pending_transition() {
        let mut d = banner();
        let start = Instant::now();
        assert_eq!(d.next_deadline(), None);
        d.set_raw(true, start);
        assert_eq!(d.next_deadline(), Some(start + Duration::from_millis(500)));
        assert!(d.is_visible(start + Duration::from_millis(500)));
        assert_eq!(d.next_deadline(), None);
    }
}
