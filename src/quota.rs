//! Send-rate quota.
//!
//! One authoritative counter per user, shared by every open conversation
//! session — sends in different conversations draw from the same allowance.
//! Counter updates serialize through the handle's lock so two sends
//! resolving in the same tick cannot lose an increment.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::SendRejection;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QuotaState {
    /// `None` means unmetered.
    pub limit: Option<u32>,
    pub used: u32,
    /// Unix milliseconds; end of the current accounting period.
    pub period_end_ms: u64,
}

impl QuotaState {
    fn exhausted(&self) -> bool {
        match self.limit {
            Some(limit) => self.used >= limit,
            None => false,
        }
    }
}

/// Cloneable handle to the per-user quota counter.
#[derive(Clone, Debug)]
pub struct SendQuota {
    inner: Arc<Mutex<QuotaState>>,
}

impl SendQuota {
    pub fn new(limit: Option<u32>, period_end_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QuotaState {
                limit,
                used: 0,
                period_end_ms,
            })),
        }
    }

    /// Unmetered quota (no limit).
    pub fn unmetered() -> Self {
        Self::new(None, 0)
    }

    pub fn snapshot(&self) -> QuotaState {
        self.inner.lock().expect("quota lock poisoned").clone()
    }

    /// Precondition check for a send. Returns the full quota state on
    /// exhaustion so the caller can show the allowance.
    pub fn check(&self) -> Result<(), SendRejection> {
        let state = self.inner.lock().expect("quota lock poisoned");
        if state.exhausted() {
            Err(SendRejection::QuotaExhausted {
                quota: state.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Count one confirmed send. Called only after server confirmation.
    pub fn record_send(&self) -> QuotaState {
        let mut state = self.inner.lock().expect("quota lock poisoned");
        state.used = state.used.saturating_add(1);
        state.clone()
    }

    /// Apply an entitlement update from the billing collaborator. The core
    /// never changes `limit` on its own; `used` resets only when the period
    /// actually rolls forward.
    pub fn set_entitlement(&self, limit: Option<u32>, period_end_ms: u64) {
        let mut state = self.inner.lock().expect("quota lock poisoned");
        if period_end_ms > state.period_end_ms {
            state.used = 0;
        }
        state.limit = limit;
        state.period_end_ms = period_end_ms;
    }
}
