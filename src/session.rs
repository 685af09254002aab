//! One open conversation, end to end.
//!
//! A `ConversationSession` owns every piece of live state for a single
//! conversation: the ordered message stream, the windowed view over it,
//! typing presence, the pagination trigger, the optimistic send pipeline,
//! and the live subscription. Opening a session spawns the background
//! tasks; `close` tears them down so no callback can fire into a view the
//! host has already left. Nothing here is shared between conversations
//! except the send quota, which the host passes in.
//!
//! State changes surface on an unbounded event channel the host drains on
//! its UI tick. Events carry enough payload to update a view without
//! re-querying the session.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::conversation::ConversationStream;
use crate::debounce::DebouncedIndicator;
use crate::error::SessionError;
use crate::message::Message;
use crate::pagination::PaginationTrigger;
use crate::quota::{QuotaState, SendQuota};
use crate::render::{ListWindow, MountPlan};
use crate::sending::SendPipeline;
use crate::services::{ConnectionManager, ConnectionState};
use crate::transport::{ChatTransport, PageRequest, PresenceEvent, TransportEvent};
use crate::typing::{TypingBroadcast, TypingTracker};

/// Everything the host UI needs to react to, in delivery order.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageNew {
        message: Message,
    },
    /// A Pending entry was replaced by its server-confirmed form.
    MessageUpdate {
        old_id: String,
        message: Message,
    },
    /// A Pending entry was dropped because the live subscription already
    /// delivered the confirmed copy.
    MessageRemoved {
        id: String,
    },
    /// A dispatched send failed; the entry was rolled back and the text
    /// should be restored to the compose box.
    SendFailed {
        pending_id: String,
        restored_text: String,
        reason: String,
    },
    TypingChanged {
        users: Vec<String>,
    },
    /// Debounced: only outages longer than the show delay surface.
    ConnectionIndicator {
        reconnecting: bool,
    },
    OlderPageLoaded {
        inserted: usize,
        reached_start: bool,
    },
    QuotaChanged {
        quota: QuotaState,
    },
}

pub struct ConversationSession {
    conversation_id: String,
    local_user_id: String,
    config: SessionConfig,
    transport: Arc<dyn ChatTransport>,
    stream: Arc<Mutex<ConversationStream>>,
    window: Arc<Mutex<ListWindow>>,
    typing: Arc<Mutex<TypingTracker>>,
    broadcast: Mutex<TypingBroadcast>,
    pagination: Arc<Mutex<PaginationTrigger>>,
    reached_start: Arc<AtomicBool>,
    quota: SendQuota,
    pipeline: SendPipeline,
    connection: ConnectionManager,
    events: mpsc::UnboundedSender<SessionEvent>,
    pump: JoinHandle<()>,
    indicator: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl ConversationSession {
    /// Open a conversation: subscribe to its live channel and spawn the
    /// background tasks. The returned receiver is the host's event feed.
    pub fn open(
        transport: Arc<dyn ChatTransport>,
        conversation_id: impl Into<String>,
        local_user_id: impl Into<String>,
        quota: SendQuota,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let conversation_id = conversation_id.into();
        let local_user_id = local_user_id.into();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stream = Arc::new(Mutex::new(ConversationStream::new()));
        let window = Arc::new(Mutex::new(ListWindow::new(
            0,
            config.seed_row_px,
            config.overscan_rows,
            config.stick_to_bottom_px,
        )));
        let typing = Arc::new(Mutex::new(TypingTracker::new()));

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::spawn(
            Arc::clone(&transport),
            conversation_id.clone(),
            transport_tx,
            config.reconnect_base,
            config.reconnect_cap,
        );

        let pipeline = SendPipeline::spawn(
            Arc::clone(&transport),
            conversation_id.clone(),
            local_user_id.clone(),
            quota.clone(),
            Arc::clone(&stream),
            Arc::clone(&window),
            events_tx.clone(),
        );

        let pump = tokio::spawn(pump_loop(
            transport_rx,
            Arc::clone(&stream),
            Arc::clone(&window),
            Arc::clone(&typing),
            events_tx.clone(),
            config.typing_window,
        ));
        let indicator = tokio::spawn(indicator_loop(
            connection.state(),
            events_tx.clone(),
            config.indicator_show_delay,
        ));

        let session = Self {
            conversation_id,
            local_user_id,
            config: config.clone(),
            transport,
            stream,
            window,
            typing,
            broadcast: Mutex::new(TypingBroadcast::new()),
            pagination: Arc::new(Mutex::new(PaginationTrigger::new(
                config.pagination_threshold,
                config.pagination_settle,
            ))),
            reached_start: Arc::new(AtomicBool::new(false)),
            quota,
            pipeline,
            connection,
            events: events_tx,
            pump,
            indicator,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (session, events_rx)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn len(&self) -> usize {
        self.stream.lock().expect("stream lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn message_at(&self, index: usize) -> Option<Message> {
        self.stream
            .lock()
            .expect("stream lock poisoned")
            .get(index)
            .cloned()
    }

    // ---- sending ----------------------------------------------------

    /// Validate, check quota, append an optimistic entry, and dispatch.
    /// Returns the Pending entry's id; on `Err` nothing changed and the
    /// compose box keeps its draft.
    pub fn send_message(&self, text: &str) -> Result<String, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.pipeline.send(text)
    }

    pub fn quota(&self) -> QuotaState {
        self.quota.snapshot()
    }

    /// Entitlement changed (plan upgrade, period rollover).
    pub fn set_entitlement(&self, limit: Option<u32>, period_end_ms: u64) {
        self.quota.set_entitlement(limit, period_end_ms);
        let _ = self.events.send(SessionEvent::QuotaChanged {
            quota: self.quota.snapshot(),
        });
    }

    // ---- typing -----------------------------------------------------

    /// Report the local user's compose activity. Broadcasts are throttled
    /// while typing continues; stop always broadcasts immediately.
    pub fn set_composing(&self, is_typing: bool) {
        let should = {
            let mut broadcast = self.broadcast.lock().expect("broadcast lock poisoned");
            if is_typing {
                broadcast.should_broadcast(Instant::now(), self.config.typing_rebroadcast)
            } else {
                broadcast.reset();
                true
            }
        };
        if !should {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let event = PresenceEvent {
            conversation_id: self.conversation_id.clone(),
            user_id: self.local_user_id.clone(),
            is_typing,
        };
        tokio::spawn(async move {
            // Presence is best-effort; a lost signal just expires remotely
            if let Err(e) = transport.send_presence(event).await {
                log::debug!("typing broadcast failed: {}", e);
            }
        });
    }

    /// Remote users currently typing, expiry applied.
    pub fn typing_users(&self) -> Vec<String> {
        self.typing
            .lock()
            .expect("typing lock poisoned")
            .active(Instant::now())
    }

    // ---- viewport ---------------------------------------------------

    pub fn set_viewport_height(&self, px: u32) {
        self.window
            .lock()
            .expect("window lock poisoned")
            .set_viewport(px);
        self.maybe_paginate();
    }

    pub fn set_scroll_offset(&self, px: u64) {
        self.window
            .lock()
            .expect("window lock poisoned")
            .set_scroll_offset(px);
        self.maybe_paginate();
    }

    pub fn scroll_by(&self, delta_px: i64) {
        self.window
            .lock()
            .expect("window lock poisoned")
            .scroll_by(delta_px);
        self.maybe_paginate();
    }

    pub fn scroll_to_bottom(&self) {
        self.window
            .lock()
            .expect("window lock poisoned")
            .scroll_to_bottom();
    }

    pub fn scroll_offset(&self) -> u64 {
        self.window
            .lock()
            .expect("window lock poisoned")
            .scroll_offset()
    }

    pub fn is_near_bottom(&self) -> bool {
        self.window
            .lock()
            .expect("window lock poisoned")
            .is_near_bottom()
    }

    /// Rows the host should have mounted right now (visible + overscan).
    pub fn materialize_range(&self) -> Range<usize> {
        self.window
            .lock()
            .expect("window lock poisoned")
            .materialize_range()
    }

    /// Mount/unmount delta since the last call.
    pub fn mount_plan(&self) -> MountPlan {
        self.window
            .lock()
            .expect("window lock poisoned")
            .mount_plan()
    }

    /// Pixel offset of a row's top edge relative to the viewport top.
    pub fn row_viewport_offset(&self, index: usize) -> i64 {
        self.window
            .lock()
            .expect("window lock poisoned")
            .row_viewport_offset(index)
    }

    /// Feed back a row's actual rendered height.
    pub fn record_row_size(&self, index: usize, px: u32) {
        self.window
            .lock()
            .expect("window lock poisoned")
            .record_measurement(index, px);
    }

    // ---- pagination -------------------------------------------------

    /// Explicitly fetch an older page (initial history fill). No-op when a
    /// fetch is already in flight or history is exhausted.
    pub fn request_older_page(&self) {
        if self.closed.load(Ordering::SeqCst) || self.reached_start.load(Ordering::SeqCst) {
            return;
        }
        let begun = self
            .pagination
            .lock()
            .expect("pagination lock poisoned")
            .begin();
        if begun {
            self.spawn_page_fetch();
        }
    }

    fn maybe_paginate(&self) {
        if self.closed.load(Ordering::SeqCst) || self.reached_start.load(Ordering::SeqCst) {
            return;
        }
        let (rows_to_edge, total) = {
            let mut window = self.window.lock().expect("window lock poisoned");
            (window.materialize_range().start, window.len())
        };
        let fire = self
            .pagination
            .lock()
            .expect("pagination lock poisoned")
            .observe(rows_to_edge, total, Instant::now());
        if fire {
            self.spawn_page_fetch();
        }
    }

    fn spawn_page_fetch(&self) {
        let transport = Arc::clone(&self.transport);
        let stream = Arc::clone(&self.stream);
        let window = Arc::clone(&self.window);
        let events = self.events.clone();
        let pagination = Arc::clone(&self.pagination);
        let reached_start = Arc::clone(&self.reached_start);
        let closed = Arc::clone(&self.closed);
        let request = PageRequest {
            conversation_id: self.conversation_id.clone(),
            before_cursor: self
                .stream
                .lock()
                .expect("stream lock poisoned")
                .oldest_id()
                .map(str::to_string),
            page_size: self.config.page_size,
        };

        tokio::spawn(async move {
            let result = transport.fetch_page(request).await;
            // A closed session ignores whatever came back
            if closed.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(page) => {
                    let fresh: Vec<Message> =
                        page.messages.into_iter().map(Message::from).collect();
                    let inserted = stream
                        .lock()
                        .expect("stream lock poisoned")
                        .prepend_page(fresh);
                    if inserted > 0 {
                        // Shifts the scroll anchor so the view doesn't jump
                        window
                            .lock()
                            .expect("window lock poisoned")
                            .prepend(inserted);
                    }
                    let exhausted = page.next_cursor.is_none();
                    if exhausted {
                        reached_start.store(true, Ordering::SeqCst);
                    }
                    let _ = events.send(SessionEvent::OlderPageLoaded {
                        inserted,
                        reached_start: exhausted,
                    });
                }
                Err(e) => {
                    log::warn!("older-page fetch failed: {}", e);
                }
            }
            pagination
                .lock()
                .expect("pagination lock poisoned")
                .complete(Instant::now());
        });
    }

    // ---- connection -------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.state().borrow()
    }

    #[cfg(test)]
    fn connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    // ---- teardown ---------------------------------------------------

    /// Terminal teardown: unsubscribe, stop every timer, and guarantee no
    /// further event reaches the host. In-flight pagination results are
    /// ignored; dispatched sends resolve on the server but their UI effect
    /// is discarded. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connection.unsubscribe();
        self.pipeline.shutdown();
        self.pump.abort();
        self.indicator.abort();
        self.typing.lock().expect("typing lock poisoned").clear();
        log::info!("closed conversation {}", self.conversation_id);
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Applies live transport events to the stream, window, and typing state,
/// and owns the typing-expiry timer.
async fn pump_loop(
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    stream: Arc<Mutex<ConversationStream>>,
    window: Arc<Mutex<ListWindow>>,
    typing: Arc<Mutex<TypingTracker>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    typing_window: Duration,
) {
    loop {
        let expiry = typing
            .lock()
            .expect("typing lock poisoned")
            .next_expiry();
        let sleep_at = expiry
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(tokio::time::Instant::now);

        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    TransportEvent::Message(inbound) => {
                        let message = Message::from(inbound);
                        let sender = message.sender_id.clone();
                        let inserted = stream
                            .lock()
                            .expect("stream lock poisoned")
                            .insert_confirmed(message.clone());
                        if let Some(index) = inserted {
                            window
                                .lock()
                                .expect("window lock poisoned")
                                .insert_at(index);
                            let _ = events.send(SessionEvent::MessageNew { message });
                        }
                        // A delivered message supersedes its author's typing state
                        let now = Instant::now();
                        let changed = typing
                            .lock()
                            .expect("typing lock poisoned")
                            .apply(&sender, false, now, typing_window);
                        if changed {
                            emit_typing(&typing, &events, now);
                        }
                    }
                    TransportEvent::Typing(presence) => {
                        let now = Instant::now();
                        let changed = typing
                            .lock()
                            .expect("typing lock poisoned")
                            .apply(&presence.user_id, presence.is_typing, now, typing_window);
                        if changed {
                            emit_typing(&typing, &events, now);
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(sleep_at), if expiry.is_some() => {
                let now = Instant::now();
                typing.lock().expect("typing lock poisoned").sweep(now);
                emit_typing(&typing, &events, now);
            }
        }
    }
}

fn emit_typing(
    typing: &Mutex<TypingTracker>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    now: Instant,
) {
    let users = typing.lock().expect("typing lock poisoned").active(now);
    let _ = events.send(SessionEvent::TypingChanged { users });
}

/// Watches the raw connection state and surfaces it through the debounce
/// machine, so sub-delay blips never flash the banner.
async fn indicator_loop(
    mut state_rx: watch::Receiver<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    show_delay: Duration,
) {
    let mut indicator = DebouncedIndicator::new(show_delay, Duration::ZERO);
    let mut shown = false;
    loop {
        let now = Instant::now();
        let raw = *state_rx.borrow_and_update() != ConnectionState::Connected;
        indicator.set_raw(raw, now);
        let visible = indicator.is_visible(now);
        if visible != shown {
            shown = visible;
            let _ = events.send(SessionEvent::ConnectionIndicator {
                reconnecting: visible,
            });
        }

        let deadline = indicator.next_deadline();
        let sleep_at = deadline
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(tokio::time::Instant::now);
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(sleep_at), if deadline.is_some() => {}
        }
    }
}
