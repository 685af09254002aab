//! Optimistic send pipeline.
//!
//! A send runs in two phases. The synchronous phase validates the text,
//! checks the quota, and appends an optimistic Pending entry so the UI
//! updates on the same tick; any rejection here happens before a single
//! byte reaches the network. The async phase runs on a single worker task
//! that dispatches sends one at a time, so reconciliation order always
//! matches dispatch order even when the server responds out of order.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::conversation::{ConversationStream, Reconciled};
use crate::error::SessionError;
use crate::message::{validate_outgoing_text, DeliveryState, Message};
use crate::quota::SendQuota;
use crate::render::ListWindow;
use crate::session::SessionEvent;
use crate::transport::{ChatTransport, SendRequest};

struct Dispatch {
    pending_id: String,
    request: SendRequest,
}

pub struct SendPipeline {
    conversation_id: String,
    sender_id: String,
    quota: SendQuota,
    stream: Arc<Mutex<ConversationStream>>,
    window: Arc<Mutex<ListWindow>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    // None once shut down; dropping the sender closes the worker's queue
    queue: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
}

impl SendPipeline {
    pub fn spawn(
        transport: Arc<dyn ChatTransport>,
        conversation_id: String,
        sender_id: String,
        quota: SendQuota,
        stream: Arc<Mutex<ConversationStream>>,
        window: Arc<Mutex<ListWindow>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(
            transport,
            conversation_id.clone(),
            sender_id.clone(),
            quota.clone(),
            Arc::clone(&stream),
            Arc::clone(&window),
            events.clone(),
            queue_rx,
        ));
        Self {
            conversation_id,
            sender_id,
            quota,
            stream,
            window,
            events,
            queue: Mutex::new(Some(queue_tx)),
        }
    }

    /// Attempt to send `text`. On `Ok` the returned id names the Pending
    /// entry already appended to the stream; on `Err` nothing was appended,
    /// nothing was dispatched, and the compose box keeps its draft.
    pub fn send(&self, text: &str) -> Result<String, SessionError> {
        let text = validate_outgoing_text(text)?;
        self.quota.check()?;
        let queue = self.queue.lock().expect("queue lock poisoned");
        let Some(queue) = queue.as_ref() else {
            return Err(SessionError::Closed);
        };

        let pending = Message {
            id: pending_id(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            text: text.clone(),
            created_at_ms: now_ms(),
            delivery: DeliveryState::Pending,
        };
        let id = pending.id.clone();
        self.stream
            .lock()
            .expect("stream lock poisoned")
            .push_pending(pending.clone());
        // Our own message lands at the tail; the window follows it if the
        // viewport was already at the bottom
        self.window
            .lock()
            .expect("window lock poisoned")
            .append(1);
        let _ = self.events.send(SessionEvent::MessageNew { message: pending });

        let _ = queue.send(Dispatch {
            pending_id: id.clone(),
            request: SendRequest {
                conversation_id: self.conversation_id.clone(),
                text,
            },
        });
        Ok(id)
    }

    /// Stop accepting sends. The worker drains what was already queued and
    /// lets a dispatched send resolve in the background; after teardown its
    /// events land in a receiver the host has dropped.
    pub fn shutdown(&self) {
        self.queue.lock().expect("queue lock poisoned").take();
    }
}

async fn dispatch_loop(
    transport: Arc<dyn ChatTransport>,
    conversation_id: String,
    sender_id: String,
    quota: SendQuota,
    stream: Arc<Mutex<ConversationStream>>,
    window: Arc<Mutex<ListWindow>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut queue: mpsc::UnboundedReceiver<Dispatch>,
) {
    while let Some(dispatch) = queue.recv().await {
        let text = dispatch.request.text.clone();
        match transport.send_message(dispatch.request).await {
            Ok(receipt) => {
                let confirmed = Message::confirmed(
                    receipt.id,
                    conversation_id.clone(),
                    sender_id.clone(),
                    text,
                    receipt.created_at_ms,
                );
                let outcome = stream
                    .lock()
                    .expect("stream lock poisoned")
                    .reconcile(&dispatch.pending_id, confirmed.clone());
                let quota_state = quota.record_send();
                let _ = events.send(SessionEvent::QuotaChanged { quota: quota_state });
                match outcome {
                    Reconciled::Replaced => {
                        let _ = events.send(SessionEvent::MessageUpdate {
                            old_id: dispatch.pending_id,
                            message: confirmed,
                        });
                    }
                    Reconciled::AlreadyDelivered { removed_index } => {
                        // Live subscription delivered the server copy first
                        window
                            .lock()
                            .expect("window lock poisoned")
                            .remove(removed_index);
                        let _ = events.send(SessionEvent::MessageRemoved {
                            id: dispatch.pending_id,
                        });
                    }
                    Reconciled::NotFound => {
                        log::warn!(
                            "send receipt for unknown pending entry {}",
                            dispatch.pending_id
                        );
                    }
                }
            }
            Err(e) => {
                log::warn!("send failed for {}: {}", dispatch.pending_id, e);
                let removed = stream
                    .lock()
                    .expect("stream lock poisoned")
                    .remove_pending(&dispatch.pending_id);
                let restored_text = match removed {
                    Some((index, message)) => {
                        window
                            .lock()
                            .expect("window lock poisoned")
                            .remove(index);
                        message.text
                    }
                    None => String::new(),
                };
                let _ = events.send(SessionEvent::SendFailed {
                    pending_id: dispatch.pending_id,
                    restored_text,
                    reason: e.to_string(),
                });
            }
        }
    }
}

fn pending_id() -> String {
    // Nanos alone can collide for back-to-back sends on a coarse clock
    static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("pending-{}-{}", nanos, seq)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use crate::error::SendRejection;
    use crate::transport::{
        PageRequest, PageResponse, PresenceEvent, SendReceipt, TransportError, TransportEvent,
    };

    /// Transport stub with a scripted queue of (delay, response) pairs.
    struct ScriptedTransport {
        script: Mutex<VecDeque<(Duration, Result<SendReceipt, TransportError>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<(Duration, Result<SendReceipt, TransportError>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn subscribe(
            &self,
            _: &str,
        ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
            unimplemented!("not used in send tests")
        }

        async fn send_message(
            &self,
            request: SendRequest,
        ) -> Result<SendReceipt, TransportError> {
            self.calls.lock().unwrap().push(request.text);
            let (delay, response) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted send");
            tokio::time::sleep(delay).await;
            response
        }

        async fn send_presence(&self, _: PresenceEvent) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fetch_page(&self, _: PageRequest) -> Result<PageResponse, TransportError> {
            Ok(PageResponse::default())
        }
    }

    fn receipt(id: &str, at: u64) -> Result<SendReceipt, TransportError> {
        Ok(SendReceipt {
            id: id.to_string(),
            created_at_ms: at,
        })
    }

    fn pipeline(
        transport: Arc<ScriptedTransport>,
        quota: SendQuota,
    ) -> (
        SendPipeline,
        Arc<Mutex<ConversationStream>>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let stream = Arc::new(Mutex::new(ConversationStream::new()));
        let window = Arc::new(Mutex::new(ListWindow::new(0, 48, 3, 72)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pipeline = SendPipeline::spawn(
            transport,
            "c1".to_string(),
            "me".to_string(),
            quota,
            Arc::clone(&stream),
            window,
            events_tx,
        );
        (pipeline, stream, events_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_before_dispatch() {
        let transport = ScriptedTransport::new(vec![]);
        let (pipeline, stream, _events) = pipeline(transport.clone(), SendQuota::unmetered());

        assert!(matches!(
            pipeline.send("   "),
            Err(SessionError::Rejected(SendRejection::EmptyText))
        ));
        let long = "x".repeat(1001);
        assert!(matches!(
            pipeline.send(&long),
            Err(SessionError::Rejected(SendRejection::TextTooLong { .. }))
        ));

        tokio::task::yield_now().await;
        assert!(stream.lock().unwrap().is_empty());
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhausted_blocks_send() {
        let transport = ScriptedTransport::new(vec![]);
        let quota = SendQuota::new(Some(0), 10_000);
        let (pipeline, stream, _events) = pipeline(transport.clone(), quota);

        assert!(matches!(
            pipeline.send("hello"),
            Err(SessionError::Rejected(SendRejection::QuotaExhausted { .. }))
        ));
        tokio::task::yield_now().await;
        assert!(stream.lock().unwrap().is_empty());
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_edge_allows_last_send_then_rejects() {
        let transport = ScriptedTransport::new(vec![(Duration::ZERO, receipt("srv-1", 100))]);
        let quota = SendQuota::new(Some(1), 10_000);
        let (pipeline, _stream, mut events) = pipeline(transport, quota.clone());

        // used = 0 of 1: goes through
        pipeline.send("last one").unwrap();
        loop {
            if let SessionEvent::MessageUpdate { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(quota.snapshot().used, 1);

        // used = 1 of 1: rejected before dispatch, with the full state
        match pipeline.send("one too many") {
            Err(SessionError::Rejected(SendRejection::QuotaExhausted { quota })) => {
                assert_eq!(quota.used, 1);
                assert_eq!(quota.limit, Some(1));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_pending_on_receipt() {
        let transport = ScriptedTransport::new(vec![(Duration::ZERO, receipt("srv-1", 500))]);
        let quota = SendQuota::new(Some(5), 10_000);
        let (pipeline, stream, mut events) = pipeline(transport, quota.clone());

        let pending_id = pipeline.send("hello").unwrap();
        assert!(pending_id.starts_with("pending-"));
        {
            let stream = stream.lock().unwrap();
            assert_eq!(stream.len(), 1);
            assert!(stream.get(0).unwrap().is_pending());
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::MessageNew { .. }
        ));

        // Quota counts on confirmation, then the pending entry is replaced
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::QuotaChanged { quota } if quota.used == 1
        ));
        match events.recv().await.unwrap() {
            SessionEvent::MessageUpdate { old_id, message } => {
                assert_eq!(old_id, pending_id);
                assert_eq!(message.id, "srv-1");
                assert_eq!(message.delivery, DeliveryState::Confirmed);
                assert_eq!(message.created_at_ms, 500);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(quota.snapshot().used, 1);
        assert!(stream.lock().unwrap().contains_id("srv-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rolls_back_and_restores_text() {
        let transport = ScriptedTransport::new(vec![(
            Duration::ZERO,
            Err(TransportError::Send("relay unavailable".to_string())),
        )]);
        let quota = SendQuota::new(Some(5), 10_000);
        let (pipeline, stream, mut events) = pipeline(transport, quota.clone());

        let pending_id = pipeline.send("precious draft").unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::MessageNew { .. }
        ));
        match events.recv().await.unwrap() {
            SessionEvent::SendFailed {
                pending_id: failed,
                restored_text,
                ..
            } => {
                assert_eq!(failed, pending_id);
                assert_eq!(restored_text, "precious draft");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(stream.lock().unwrap().is_empty());
        // A failed send never burns quota
        assert_eq!(quota.snapshot().used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_order_matches_dispatch_order() {
        // First receipt is slow, second would be instant; the worker still
        // confirms them in dispatch order.
        let transport = ScriptedTransport::new(vec![
            (Duration::from_millis(50), receipt("srv-1", 100)),
            (Duration::ZERO, receipt("srv-2", 200)),
        ]);
        let (pipeline, _stream, mut events) =
            pipeline(transport, SendQuota::unmetered());

        pipeline.send("first").unwrap();
        pipeline.send("second").unwrap();

        let mut confirmed = Vec::new();
        while confirmed.len() < 2 {
            if let SessionEvent::MessageUpdate { message, .. } = events.recv().await.unwrap() {
                confirmed.push(message.id);
            }
        }
        assert_eq!(confirmed, vec!["srv-1", "srv-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_send_finish() {
        let transport =
            ScriptedTransport::new(vec![(Duration::from_secs(2), receipt("srv-1", 100))]);
        let (pipeline, stream, mut events) = pipeline(transport.clone(), SendQuota::unmetered());

        pipeline.send("parting words").unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.calls.lock().unwrap().len(), 1);

        // Teardown while the dispatch is mid-flight: no new sends, but the
        // one on the wire still reconciles.
        pipeline.shutdown();
        assert!(matches!(pipeline.send("more"), Err(SessionError::Closed)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(stream.lock().unwrap().contains_id("srv-1"));
        loop {
            if let SessionEvent::MessageUpdate { message, .. } = events.recv().await.unwrap() {
                assert_eq!(message.id, "srv-1");
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_pending_when_live_copy_arrived_first() {
        let transport =
            ScriptedTransport::new(vec![(Duration::from_millis(20), receipt("srv-1", 100))]);
        let (pipeline, stream, mut events) = pipeline(transport, SendQuota::unmetered());

        let pending_id = pipeline.send("hello").unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::MessageNew { .. }
        ));

        // The live subscription delivers the server copy before the receipt
        assert!(stream
            .lock()
            .unwrap()
            .insert_confirmed(Message::confirmed("srv-1", "c1", "me", "hello", 100))
            .is_some());

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::MessageRemoved { id } => {
                    assert_eq!(id, pending_id);
                    break;
                }
                SessionEvent::QuotaChanged { .. } => {}
                other => panic!("unexpected event: {:?}", other),
            }
        }
        let stream = stream.lock().unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.get(0).unwrap().id, "srv-1");
    }
}
