//! WebSocket sync client.
//!
//! Connection lifecycle:
//!
//! ```text
//! disconnected ──► connecting ──► connected ──► disconnected ── …
//!                      │              ▲               │
//!                      └── backoff ───┘  (fixed 1s, forever,
//!                                         until explicit teardown)
//! ```
//!
//! A watchdog fires once after a short grace period (or immediately when
//! the first attempt fails) so callers can stop showing a loading state
//! while the channel keeps retrying underneath. Actions sent while
//! disconnected land in the offline queue; on every (re)connect the queue
//! is drained, compacted and sent as a single `SYNC_WITH_SERVER`
//! reconciliation request.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use cartlist_core::{ItemMap, OfflineQueue, UndoableAction};

use crate::protocol::{ControlMessage, Message, ProtocolError};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the sync server
    pub server_url: String,
    /// Fixed delay between reconnection attempts
    pub reconnect_backoff: Duration,
    /// Grace period before the loading watchdog fires
    pub connect_grace: Duration,
    /// Offline queue capacity
    pub offline_queue_limit: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            reconnect_backoff: Duration::from_secs(1),
            connect_grace: Duration::from_secs(2),
            offline_queue_limit: 10_000,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Channel established; the offline queue has been flushed.
    Connected,
    /// Channel lost; reconnection is scheduled.
    Disconnected,
    /// The watchdog gave up waiting (the channel keeps retrying).
    ConnectTimedOut,
    /// An action another session performed, to be applied with
    /// `Origin::Server`.
    RemoteAction(UndoableAction),
    /// The reconciliation answer: the full authoritative item set.
    FullData(ItemMap),
    /// The server rejected one of our messages.
    ServerError(String),
}

/// The sync client.
///
/// Owns the connection supervisor: one `connect()` call keeps the channel
/// alive (with fixed-backoff retries) until `disconnect()`.
pub struct SyncClient {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    /// Sender bound to the current connection; rebound on every reconnect,
    /// cleared on closure.
    outgoing: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    shutdown_tx: watch::Sender<bool>,
    timed_out: Arc<AtomicBool>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        let queue_limit = config.offline_queue_limit;
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(queue_limit))),
            outgoing: Arc::new(Mutex::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Start the connection supervisor. Call once.
    ///
    /// Spawns the watchdog and a task that connects, runs the channel
    /// until it closes, and retries after the fixed backoff until
    /// [`disconnect`](Self::disconnect).
    pub fn connect(&self) {
        let grace = self.config.connect_grace;
        let wd_state = self.state.clone();
        let wd_events = self.event_tx.clone();
        let wd_timed_out = self.timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if *wd_state.read().await != ConnectionState::Connected
                && !wd_timed_out.swap(true, Ordering::SeqCst)
            {
                let _ = wd_events.send(SyncEvent::ConnectTimedOut).await;
            }
        });

        let config = self.config.clone();
        let state = self.state.clone();
        let queue = self.offline_queue.clone();
        let outgoing = self.outgoing.clone();
        let events = self.event_tx.clone();
        let timed_out = self.timed_out.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                *state.write().await = ConnectionState::Connecting;

                match tokio_tungstenite::connect_async(&config.server_url).await {
                    Ok((ws_stream, _)) => {
                        run_connection(
                            ws_stream, &state, &queue, &outgoing, &events, &mut shutdown,
                        )
                        .await;
                    }
                    Err(e) => {
                        log::debug!("connect to {} failed: {e}", config.server_url);
                        // The client is evidently offline: stop any loading
                        // state right away instead of waiting out the grace.
                        if !timed_out.swap(true, Ordering::SeqCst) {
                            let _ = events.send(SyncEvent::ConnectTimedOut).await;
                        }
                    }
                }

                *state.write().await = ConnectionState::Disconnected;
                let _ = events.send(SyncEvent::Disconnected).await;

                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.reconnect_backoff) => {}
                    _ = shutdown.changed() => break,
                }
            }
            log::debug!("connection supervisor stopped");
        });
    }

    /// Send a user action, or queue it while disconnected.
    ///
    /// The caller has already applied the action locally; this never
    /// blocks on the reply.
    pub async fn send_action(&self, action: UndoableAction) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(action) {
                return Err(ProtocolError::QueueFull);
            }
            return Ok(());
        }

        self.send_text(Message::Action(action).encode()?).await
    }

    /// Send a control message. Silently dropped while disconnected —
    /// subscriptions and signals are not replayed.
    pub async fn send_control(&self, control: ControlMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            log::debug!("dropping control message while disconnected");
            return Ok(());
        }
        self.send_text(Message::Control(control).encode()?).await
    }

    /// Request a lightweight re-sync (empty-queue reconciliation).
    ///
    /// Intended for visibility/focus transitions, to catch up on
    /// broadcasts missed while backgrounded. No-op while disconnected —
    /// the reconnect handshake syncs anyway.
    pub async fn resync(&self) -> Result<(), ProtocolError> {
        self.send_control(ControlMessage::SyncWithServer(Vec::new())).await
    }

    /// Tear the connection down and stop reconnecting.
    ///
    /// Cancels a pending backoff timer if one is running.
    pub async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.outgoing.lock().await = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether the loading watchdog has fired.
    pub fn connect_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    async fn send_text(&self, text: String) -> Result<(), ProtocolError> {
        let guard = self.outgoing.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(text)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

/// Drive one established connection until it closes or teardown.
async fn run_connection(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    state: &Arc<RwLock<ConnectionState>>,
    queue: &Arc<Mutex<OfflineQueue>>,
    outgoing: &Arc<Mutex<Option<mpsc::Sender<String>>>>,
    events: &mpsc::Sender<SyncEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    // Writer task: forward the outgoing channel into the sink.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    *outgoing.lock().await = Some(out_tx);
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    *state.write().await = ConnectionState::Connected;
    let _ = events.send(SyncEvent::Connected).await;

    // Reconciliation: everything performed offline goes out as one
    // compacted request; the answer replaces the local store.
    let compacted = queue.lock().await.drain_compacted();
    if !compacted.is_empty() {
        log::info!("replaying {} compacted offline actions", compacted.len());
    }
    let sync = Message::Control(ControlMessage::SyncWithServer(compacted));
    match sync.encode() {
        Ok(text) => {
            if let Some(tx) = outgoing.lock().await.as_ref() {
                let _ = tx.send(text).await;
            }
        }
        Err(e) => log::error!("failed to encode reconciliation request: {e}"),
    }

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match Message::decode(text.as_str()) {
                            Ok(Message::Action(action)) => {
                                let _ = events.send(SyncEvent::RemoteAction(action)).await;
                            }
                            Ok(Message::Control(ControlMessage::InitialFullData(items))) => {
                                let _ = events.send(SyncEvent::FullData(items)).await;
                            }
                            Ok(Message::Control(ControlMessage::Error { message })) => {
                                let _ = events.send(SyncEvent::ServerError(message)).await;
                            }
                            Ok(_) => {
                                log::debug!("ignoring unexpected server message");
                            }
                            Err(e) => {
                                log::warn!("undecodable server message: {e}");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::warn!("websocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Clear the per-connection dispatch binding.
    *outgoing.lock().await = None;
    writer.abort();
}
