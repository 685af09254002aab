//! ConversationStream: the ordered message sequence for one conversation.
//!
//! Append-mostly, with prepends for older pages. Invariants:
//! - no duplicate ids (a reconnect replaying a known message is a no-op)
//! - Confirmed messages are ordered by `created_at_ms`
//! - Pending messages sit at the tail in dispatch order
//! - reconciling a Pending entry replaces it, never duplicates

use serde::Serialize;

use crate::message::{DeliveryState, Message};

#[derive(Serialize, Clone, Debug, Default)]
pub struct ConversationStream {
    messages: Vec<Message>,
}

/// Outcome of reconciling a Pending entry against its server confirmation.
#[derive(Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// Pending entry replaced in place with the confirmed record.
    Replaced,
    /// The confirmed id already arrived via the live subscription; the
    /// Pending duplicate at `removed_index` was dropped.
    AlreadyDelivered { removed_index: usize },
    /// No Pending entry with that id exists (already rolled back).
    NotFound,
}

impl ConversationStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Id of the oldest loaded message, used as the pagination cursor.
    pub fn oldest_id(&self) -> Option<&str> {
        self.messages.first().map(|m| m.id.as_str())
    }

    /// Insert a confirmed message in timestamp order, deduplicated by id.
    /// Returns the insertion index so the window can add the matching row,
    /// or `None` if the id was already known.
    ///
    /// Fast paths for the common cases (newest at the tail, oldest at the
    /// head); binary search only for the rare middle insert. Confirmed
    /// entries never sort past the first Pending entry — Pending rows own
    /// the tail until reconciled.
    pub fn insert_confirmed(&mut self, message: Message) -> Option<usize> {
        debug_assert_eq!(message.delivery, DeliveryState::Confirmed);
        if self.contains_id(&message.id) {
            return None;
        }

        // Confirmed region ends where the Pending tail begins
        let confirmed_end = self
            .messages
            .iter()
            .position(|m| m.is_pending())
            .unwrap_or(self.messages.len());
        let confirmed = &self.messages[..confirmed_end];

        let pos = if confirmed.is_empty()
            || message.created_at_ms >= confirmed[confirmed_end - 1].created_at_ms
        {
            confirmed_end
        } else if message.created_at_ms <= confirmed[0].created_at_ms {
            0
        } else {
            confirmed
                .binary_search_by(|m| m.created_at_ms.cmp(&message.created_at_ms))
                .unwrap_or_else(|idx| idx)
        };
        self.messages.insert(pos, message);
        Some(pos)
    }

    /// Append an optimistic Pending entry at the tail (dispatch order).
    pub fn push_pending(&mut self, message: Message) {
        debug_assert!(message.is_pending());
        self.messages.push(message);
    }

    /// Prepend an older page. Pages arrive oldest-first; duplicates are
    /// skipped. Returns how many messages were actually inserted.
    pub fn prepend_page(&mut self, page: Vec<Message>) -> usize {
        let fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| !self.contains_id(&m.id))
            .collect();
        let inserted = fresh.len();
        if inserted > 0 {
            self.messages.splice(0..0, fresh);
        }
        inserted
    }

    /// Replace the Pending entry `pending_id` with its confirmed form.
    pub fn reconcile(&mut self, pending_id: &str, confirmed: Message) -> Reconciled {
        let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.id == pending_id && m.is_pending())
        else {
            return Reconciled::NotFound;
        };
        if self.messages.iter().any(|m| m.id == confirmed.id) {
            // Live subscription beat the send response; drop the duplicate.
            self.messages.remove(pos);
            return Reconciled::AlreadyDelivered { removed_index: pos };
        }
        self.messages[pos] = confirmed;
        Reconciled::Replaced
    }

    /// Remove a Pending entry after dispatch failure. Returns its index and
    /// the removed message so the compose text can be restored.
    pub fn remove_pending(&mut self, pending_id: &str) -> Option<(usize, Message)> {
        let pos = self
            .messages
            .iter()
            .position(|m| m.id == pending_id && m.is_pending())?;
        Some((pos, self.messages.remove(pos)))
    }
}
