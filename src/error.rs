//! Error types for the conversation engine.
//!
//! Transport failures are never fatal (the connection manager recovers
//! them); send failures roll back the optimistic entry; quota exhaustion is
//! a precondition, not an error path. Nothing here may terminate the host.

use crate::quota::QuotaState;

/// Rejection of a `send()` before any network dispatch happens.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SendRejection {
    #[error("message is empty after trimming")]
    EmptyText,

    #[error("message too long: {len} code points (max {max})")]
    TextTooLong { len: usize, max: usize },

    /// Carries the full quota state so the caller can render the allowance,
    /// not just "failed".
    #[error("send quota exhausted: {}/{} messages this period", .quota.used, .quota.limit.unwrap_or(0))]
    QuotaExhausted { quota: QuotaState },
}

/// Errors surfaced by the session itself. Per-send rejections pass through
/// unchanged; transport failures never appear here (the connection manager
/// recovers them internally).
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("conversation session already closed")]
    Closed,

    #[error(transparent)]
    Rejected(#[from] SendRejection),
}

impl serde::Serialize for SendRejection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
