//! Real-time conversation engine: the single source of truth for live chat
//! state in the marketplace client.
//!
//! One [`ConversationSession`] per open conversation owns the ordered
//! message stream, a windowed view over it that materializes only the
//! visible rows, typing presence, backward pagination, and an optimistic
//! send pipeline with quota enforcement. The live subscription reconnects
//! with backoff behind a debounced indicator, so momentary blips never
//! flash UI state.
//!
//! The host supplies a [`ChatTransport`] implementation and drains the
//! [`SessionEvent`] channel on its UI tick; everything else happens inside
//! the session's background tasks. The send quota is the one piece of
//! state shared across sessions — pass the same [`SendQuota`] handle to
//! every `open`.

pub mod config;
pub mod conversation;
pub mod debounce;
pub mod error;
pub mod message;
pub mod pagination;
pub mod quota;
pub mod render;
pub mod sending;
pub mod services;
pub mod session;
pub mod transport;
pub mod typing;

pub use config::SessionConfig;
pub use conversation::ConversationStream;
pub use error::{SendRejection, SessionError};
pub use message::{DeliveryState, Message, MAX_TEXT_CODE_POINTS};
pub use quota::{QuotaState, SendQuota};
pub use render::{ListWindow, MountPlan};
pub use services::ConnectionState;
pub use session::{ConversationSession, SessionEvent};
pub use transport::{ChatTransport, TransportError, TransportEvent};
