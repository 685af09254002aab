//! Transport seam.
//!
//! The engine never talks to a concrete backend; the host injects a
//! `ChatTransport` (websocket, long-poll, whatever) and the engine consumes
//! it through this trait. A live subscription is modeled as a channel of
//! `TransportEvent`s: the channel closing means the connection dropped and
//! the connection manager will resubscribe with backoff.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::message::{DeliveryState, Message};

/// Server-pushed message event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at_ms: u64,
}

impl From<InboundMessage> for Message {
    fn from(inbound: InboundMessage) -> Self {
        Message {
            id: inbound.id,
            conversation_id: inbound.conversation_id,
            sender_id: inbound.sender_id,
            text: inbound.text,
            created_at_ms: inbound.created_at_ms,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// Typing presence signal; fire-and-forget, no acknowledgement.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PresenceEvent {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Events pushed over a live subscription.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Message(InboundMessage),
    Typing(PresenceEvent),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SendRequest {
    pub conversation_id: String,
    pub text: String,
}

/// Server acknowledgement of a send: the authoritative id and timestamp.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SendReceipt {
    pub id: String,
    pub created_at_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PageRequest {
    pub conversation_id: String,
    /// Fetch messages strictly older than this message id; `None` for the
    /// newest page.
    pub before_cursor: Option<String>,
    pub page_size: u32,
}

/// An ordered (oldest-first) page of older messages.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PageResponse {
    pub messages: Vec<InboundMessage>,
    /// Cursor for the next-older page; `None` when history is exhausted.
    pub next_cursor: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("send failed: {0}")]
    Send(String),

    /// Server rejected the request outright (validation, permissions).
    #[error("rejected by server: {code}")]
    Rejected { code: String },

    #[error("page fetch failed: {0}")]
    Page(String),
}

/// Backend connection owned by the host, consumed by the engine.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a live channel for one conversation. The returned receiver
    /// yields events until the underlying connection drops, at which point
    /// it closes and the caller is expected to resubscribe.
    async fn subscribe(
        &self,
        conversation_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    /// Dispatch one message; resolves with the server-assigned identity.
    async fn send_message(&self, request: SendRequest) -> Result<SendReceipt, TransportError>;

    /// Broadcast a typing signal. Callers treat failures as non-events.
    async fn send_presence(&self, event: PresenceEvent) -> Result<(), TransportError>;

    /// Fetch a page of history older than the cursor.
    async fn fetch_page(&self, request: PageRequest) -> Result<PageResponse, TransportError>;
}
