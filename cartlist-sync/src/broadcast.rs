//! Fan-out of applied actions to the other live sessions.
//!
//! All connected sessions share one tokio broadcast channel. Every frame
//! carries the session id of its originator, and each receiving connection
//! drops its own frames — the sender never sees an echo of its edit, it
//! already applied it locally before sending.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Message, ProtocolError};

/// One live connection, identified for broadcast exclusion.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub remote_addr: String,
}

/// A pre-encoded frame traveling through the broadcast channel.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Session that produced the frame; excluded from delivery.
    pub origin: Uuid,
    /// Encoded JSON text, shared between all receivers.
    pub payload: Arc<String>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub active_sessions: usize,
}

/// The broadcast group for the single shared list.
///
/// Each session gets an independent receiver buffering up to `capacity`
/// frames; a lagging session drops old frames and catches up through the
/// next reconciliation.
pub struct SessionGroup {
    sender: broadcast::Sender<Frame>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl SessionGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Register a session and return its receiver.
    pub async fn join(&self, info: SessionInfo) -> broadcast::Receiver<Frame> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(info.session_id, info);
        self.sender.subscribe()
    }

    /// Remove a session on disconnect.
    pub async fn leave(&self, session_id: &Uuid) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    /// Encode a message once and fan it out to every receiver.
    ///
    /// Returns the number of receivers the frame reached (including the
    /// originator, which filters it out on its own side).
    pub fn broadcast(&self, origin: Uuid, message: &Message) -> Result<usize, ProtocolError> {
        let encoded = message.encode()?;
        Ok(self.broadcast_raw(Frame {
            origin,
            payload: Arc::new(encoded),
        }))
    }

    /// Send a pre-encoded frame (zero-copy fast path, lock-free).
    pub fn broadcast_raw(&self, frame: Frame) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn has_session(&self, session_id: &Uuid) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            active_sessions: self.sessions.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without registering a session (monitoring).
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }
}
