//! Live subscription lifecycle for one conversation.
//!
//! This module handles:
//! - The Disconnected -> Connecting -> Connected state machine
//! - Automatic resubscribe with jittered exponential backoff on drops
//! - Terminal unsubscribe: after it, no event is ever forwarded again
//!
//! Event forwarding happens only inside the owned task, so aborting that
//! task is the no-further-callbacks guarantee — there is no flag to check
//! inside a callback body.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::transport::{ChatTransport, TransportEvent};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Owns the live channel for one open conversation.
pub struct ConnectionManager {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Subscribe and keep the subscription alive until `unsubscribe`.
    /// Events are forwarded to `events`; connection state is published on
    /// the watch channel returned by `state`.
    pub fn spawn(
        transport: Arc<dyn ChatTransport>,
        conversation_id: String,
        events: mpsc::UnboundedSender<TransportEvent>,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let _ = state_tx.send(ConnectionState::Connecting);
                let subscribed = tokio::select! {
                    _ = shutdown_task.notified() => return,
                    result = transport.subscribe(&conversation_id) => result,
                };

                match subscribed {
                    Ok(mut rx) => {
                        attempt = 0;
                        let _ = state_tx.send(ConnectionState::Connected);
                        log::info!("subscribed to conversation {}", conversation_id);
                        loop {
                            tokio::select! {
                                _ = shutdown_task.notified() => return,
                                event = rx.recv() => match event {
                                    Some(event) => {
                                        if events.send(event).is_err() {
                                            // Session gone; nothing left to feed
                                            return;
                                        }
                                    }
                                    None => break,
                                },
                            }
                        }
                        log::warn!("connection dropped for conversation {}", conversation_id);
                        let _ = state_tx.send(ConnectionState::Disconnected);
                    }
                    Err(e) => {
                        log::warn!(
                            "subscribe failed for conversation {}: {}",
                            conversation_id,
                            e
                        );
                        let _ = state_tx.send(ConnectionState::Disconnected);
                    }
                }

                let delay = backoff_delay(attempt, backoff_base, backoff_cap);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = shutdown_task.notified() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        Self {
            state_rx,
            shutdown,
            task,
        }
    }

    /// Watch handle for the raw connection state (not yet debounced).
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Terminal teardown: cancels any pending reconnect and guarantees no
    /// event is forwarded afterwards.
    pub fn unsubscribe(&self) {
        self.shutdown.notify_waiters();
        self.task.abort();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Exponential backoff with jitter: base * 2^attempt, capped, plus up to
/// 25% random slack so reconnect storms spread out.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(cap);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::transport::{
        InboundMessage, PageRequest, PageResponse, PresenceEvent, SendReceipt, SendRequest,
        TransportError,
    };

    /// Transport stub: each subscribe hands out a fresh channel whose
    /// sender the test drives (or drops, to simulate a network drop).
    #[derive(Default)]
    struct StubTransport {
        subscribes: AtomicUsize,
        feeds: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl StubTransport {
        fn feed(&self) -> mpsc::UnboundedSender<TransportEvent> {
            self.feeds.lock().unwrap().last().unwrap().clone()
        }

        fn drop_connection(&self) {
            self.feeds.lock().unwrap().clear();
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for StubTransport {
        async fn subscribe(
            &self,
            _conversation_id: &str,
        ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn send_message(&self, _: SendRequest) -> Result<SendReceipt, TransportError> {
            unimplemented!("not used in connection tests")
        }

        async fn send_presence(&self, _: PresenceEvent) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fetch_page(&self, _: PageRequest) -> Result<PageResponse, TransportError> {
            Ok(PageResponse::default())
        }
    }

    fn message_event(id: &str) -> TransportEvent {
        TransportEvent::Message(InboundMessage {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u2".to_string(),
            text: "hello".to_string(),
            created_at_ms: 1,
        })
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        wanted: ConnectionState,
    ) {
        while *rx.borrow() != wanted {
            rx.changed().await.expect("state channel closed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_events() {
        let transport = Arc::new(StubTransport::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::spawn(
            transport.clone(),
            "c1".to_string(),
            events_tx,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

        let mut state = manager.state();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        transport.feed().send(message_event("m1")).unwrap();
        let forwarded = events_rx.recv().await.unwrap();
        assert!(matches!(forwarded, TransportEvent::Message(m) if m.id == "m1"));

        manager.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let transport = Arc::new(StubTransport::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::spawn(
            transport.clone(),
            "c1".to_string(),
            events_tx,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );

        let mut state = manager.state();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        // Simulate a network drop; paused time fast-forwards the backoff
        transport.drop_connection();
        wait_for_state(&mut state, ConnectionState::Disconnected).await;
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert!(transport.subscribes.load(Ordering::SeqCst) >= 2);

        // The fresh subscription still delivers
        transport.feed().send(message_event("m2")).unwrap();
        let forwarded = events_rx.recv().await.unwrap();
        assert!(matches!(forwarded, TransportEvent::Message(m) if m.id == "m2"));

        manager.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_unsubscribe() {
        let transport = Arc::new(StubTransport::default());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::spawn(
            transport.clone(),
            "c1".to_string(),
            events_tx,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

        let mut state = manager.state();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        let feed = transport.feed();

        manager.unsubscribe();
        // Give the aborted task a chance to (not) forward
        tokio::task::yield_now().await;
        let _ = feed.send(message_event("late"));
        tokio::task::yield_now().await;

        assert!(events_rx.try_recv().is_err());
    }
}
