//! Message types and outgoing-text validation.

use serde::{Deserialize, Serialize};

use crate::error::SendRejection;

/// Maximum message length in Unicode code points.
pub const MAX_TEXT_CODE_POINTS: usize = 1000;

/// Delivery lifecycle of a message. Confirmed messages are immutable.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Optimistic local entry, not yet acknowledged by the server.
    Pending,
    /// Server-confirmed; carries the server-assigned id and timestamp.
    Confirmed,
    /// Dispatch failed; about to be rolled back out of the stream.
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    /// Unix milliseconds; monotonic per conversation on the server for
    /// Confirmed messages.
    pub created_at_ms: u64,
    pub delivery: DeliveryState,
}

impl Message {
    /// Build a confirmed message (as delivered by the transport).
    pub fn confirmed(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            created_at_ms,
            delivery: DeliveryState::Confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }
}

/// Validate and normalize outgoing text: trimmed, non-empty, within the
/// code-point budget. Runs before any quota check or network dispatch.
pub fn validate_outgoing_text(text: &str) -> Result<String, SendRejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SendRejection::EmptyText);
    }
    let len = trimmed.chars().count();
    if len > MAX_TEXT_CODE_POINTS {
        return Err(SendRejection::TextTooLong {
            len,
            max: MAX_TEXT_CODE_POINTS,
        });
    }
    Ok(trimmed.to_string())
}
