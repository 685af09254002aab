//! Typing presence.
//!
//! This module handles:
//! - Remote state: who is typing in this conversation, with debounced expiry
//! - Local throttle: when our own typing broadcasts are worth re-sending
//!
//! Entries expire by timestamp on read, so a peer that never sends an
//! explicit stop event cannot leave a stale indicator behind.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Remote typing state for one conversation.
#[derive(Debug, Default)]
pub struct TypingTracker {
    /// user_id -> expiry. Memory-only, never persisted.
    typists: HashMap<String, Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a remote presence event. A repeat event from the same user
    /// refreshes the expiry rather than duplicating the entry. Returns true
    /// if the set of active typists changed.
    pub fn apply(&mut self, user_id: &str, is_typing: bool, now: Instant, window: Duration) -> bool {
        let before = self.active(now);
        if is_typing {
            self.typists.insert(user_id.to_string(), now + window);
        } else {
            self.typists.remove(user_id);
        }
        self.sweep(now);
        before != self.active(now)
    }

    /// Active (non-expired) typists, sorted for stable display.
    pub fn active(&self, now: Instant) -> Vec<String> {
        let mut active: Vec<String> = self
            .typists
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(user, _)| user.clone())
            .collect();
        active.sort();
        active
    }

    /// Drop expired entries. Also run lazily via `active`, so callers that
    /// only read never see a stale indicator.
    pub fn sweep(&mut self, now: Instant) {
        self.typists.retain(|_, expires| *expires > now);
    }

    /// Earliest pending expiry, if any — lets the session schedule a sweep
    /// instead of polling.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.typists.values().min().copied()
    }

    pub fn clear(&mut self) {
        self.typists.clear();
    }
}

/// Throttle for our own typing broadcasts. The first keystroke broadcasts
/// immediately; further keystrokes refresh silently until the rebroadcast
/// interval has elapsed. Stop always broadcasts and resets the clock.
#[derive(Debug, Default)]
pub struct TypingBroadcast {
    last_sent: Option<Instant>,
}

impl TypingBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a keystroke at `now` should produce a presence broadcast.
    pub fn should_broadcast(&mut self, now: Instant, rebroadcast: Duration) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < rebroadcast => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    /// User stopped typing (or sent); the next keystroke broadcasts again.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
