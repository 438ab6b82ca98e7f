//! WebSocket sync server: the single writer of record.
//!
//! ```text
//! Session A ──┐                        ┌── Session A (full data reply)
//!             ├── handler ── ListStore │
//! Session B ──┘       │     (RocksDB)  │
//!                     ▼                │
//!               SessionGroup ──────────┴── Sessions B, C, … (rebroadcast)
//! ```
//!
//! Each connection gets a session id at accept time. Every action a
//! handler applies to the store is rebroadcast individually to all *other*
//! sessions; the reconciliation request (`SYNC_WITH_SERVER`) additionally
//! answers the sender with the full authoritative item set. Messages that
//! fail to decode or to apply are answered with an `ERROR` frame and are
//! neither applied nor rebroadcast.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::broadcast::{SessionGroup, SessionInfo};
use crate::notify::{LogNotifier, Notifier};
use crate::protocol::{ControlMessage, Message};
use crate::storage::{ListStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per session
    pub broadcast_capacity: usize,
    /// Persistence path for the list store
    pub storage_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            storage_path: PathBuf::from("cartlist_data"),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub applied_actions: u64,
    pub rejected_messages: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    group: Arc<SessionGroup>,
    store: Arc<ListStore>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server with a logging notifier.
    pub fn new(config: ServerConfig) -> Result<Self, crate::storage::StoreError> {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    /// Create a server with a custom push notifier.
    pub fn with_notifier(
        config: ServerConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, crate::storage::StoreError> {
        let store = ListStore::open(StoreConfig {
            path: config.storage_path.clone(),
            ..StoreConfig::default()
        })?;
        let group = Arc::new(SessionGroup::new(config.broadcast_capacity));

        Ok(Self {
            config,
            group,
            store: Arc::new(store),
            notifier,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let group = self.group.clone();
            let store = self.store.clone();
            let notifier = self.notifier.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, group, store, notifier, stats).await
                {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        group: Arc<SessionGroup>,
        store: Arc<ListStore>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // The per-connection identity used for broadcast exclusion.
        let session_id = Uuid::new_v4();
        let mut broadcast_rx = group
            .join(SessionInfo {
                session_id,
                remote_addr: addr.to_string(),
            })
            .await;

        log::info!("session {session_id} connected from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }

                            match Message::decode(text.as_str()) {
                                Ok(message) => {
                                    Self::handle_message(
                                        session_id, message, &group, &store, &notifier,
                                        &stats, &mut ws_sender,
                                    )
                                    .await?;
                                }
                                Err(e) => {
                                    log::warn!("rejecting malformed message from {addr}: {e}");
                                    stats.write().await.rejected_messages += 1;
                                    send_error(&mut ws_sender, &format!("invalid message: {e}"))
                                        .await?;
                                }
                            }
                        }

                        Some(Ok(WsMessage::Ping(data))) => {
                            ws_sender.send(WsMessage::Pong(data)).await?;
                        }

                        Some(Ok(WsMessage::Close(_))) | None => {
                            log::info!("session {session_id} closed ({addr})");
                            break;
                        }

                        Some(Err(e)) => {
                            log::warn!("websocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = broadcast_rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            // Never echo a session's own actions back to it.
                            if frame.origin == session_id {
                                continue;
                            }
                            ws_sender
                                .send(WsMessage::Text(frame.payload.as_str().into()))
                                .await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("session {session_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        group.leave(&session_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }

        Ok(())
    }

    /// Apply one decoded message for a session.
    async fn handle_message(
        session_id: Uuid,
        message: Message,
        group: &Arc<SessionGroup>,
        store: &Arc<ListStore>,
        notifier: &Arc<dyn Notifier>,
        stats: &Arc<RwLock<ServerStats>>,
        ws_sender: &mut WsSink,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match message {
            // A live edit from a connected session: persist, then fan out.
            Message::Action(action) => {
                match store.apply(std::slice::from_ref(&action)) {
                    Ok(()) => {
                        stats.write().await.applied_actions += 1;
                        let _ = group.broadcast(session_id, &Message::Action(action));
                    }
                    Err(e) => {
                        log::warn!("session {session_id}: {} rejected: {e}", action.kind());
                        stats.write().await.rejected_messages += 1;
                        send_error(ws_sender, &e.to_string()).await?;
                    }
                }
            }

            // Reconciliation: apply the compacted offline queue in one
            // transaction, rebroadcast each action individually, then
            // answer with the full authoritative state.
            Message::Control(ControlMessage::SyncWithServer(actions)) => {
                match store.apply(&actions) {
                    Ok(()) => {
                        stats.write().await.applied_actions += actions.len() as u64;
                        for action in actions {
                            let _ = group.broadcast(session_id, &Message::Action(action));
                        }
                    }
                    Err(e) => {
                        log::warn!("session {session_id}: reconciliation rejected: {e}");
                        stats.write().await.rejected_messages += 1;
                        send_error(ws_sender, &e.to_string()).await?;
                    }
                }

                // The requester becomes consistent with the store even if
                // its offline actions were rejected.
                let items = store.items()?;
                let reply = Message::Control(ControlMessage::InitialFullData(items));
                ws_sender.send(WsMessage::Text(reply.encode()?.into())).await?;
            }

            Message::Control(ControlMessage::SubscribeUserPushNotifications {
                user_id,
                subscription,
            }) => {
                store.put_subscription(&user_id, &subscription)?;
                log::info!("push subscription stored for user {user_id}");
            }

            Message::Control(ControlMessage::UnsubscribeUserPushNotifications { user_id }) => {
                store.remove_subscription(&user_id)?;
                log::info!("push subscription removed for user {user_id}");
            }

            Message::Control(ControlMessage::SignalFinishedShoppingList { user_id }) => {
                let targets: Vec<String> = store
                    .subscriptions()?
                    .into_iter()
                    .map(|record| record.user_id)
                    .filter(|id| id != &user_id)
                    .collect();
                if !targets.is_empty() {
                    let payload = serde_json::json!({
                        "type": "FINISHED_SHOPPINGLIST",
                        "userId": user_id,
                    })
                    .to_string();
                    notifier.send(&targets, &payload);
                }
            }

            // Server-to-client frames have no business arriving here.
            Message::Control(ControlMessage::InitialFullData(_))
            | Message::Control(ControlMessage::Error { .. }) => {
                stats.write().await.rejected_messages += 1;
                send_error(ws_sender, "unexpected server-originated message type").await?;
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// The session group (fan-out channel).
    pub fn group(&self) -> &Arc<SessionGroup> {
        &self.group
    }

    /// The persistent list store.
    pub fn store(&self) -> &Arc<ListStore> {
        &self.store
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<TcpStream>,
    WsMessage,
>;

async fn send_error(
    ws_sender: &mut WsSink,
    message: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reply = Message::Control(ControlMessage::Error {
        message: message.to_string(),
    });
    ws_sender.send(WsMessage::Text(reply.encode()?.into())).await?;
    Ok(())
}
