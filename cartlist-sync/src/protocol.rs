//! JSON wire protocol between list clients and the server.
//!
//! Every frame is a single JSON object `{"type": …, "payload": …}` sent as
//! a WebSocket text message. Undoable list actions travel verbatim in both
//! directions: client → server when the user edits, server → other
//! sessions as rebroadcasts. Control messages handle reconciliation and
//! the push-notification side channel:
//!
//! ```text
//! client ── UndoableAction ─────────────► server ──► other sessions
//! client ── SYNC_WITH_SERVER [actions] ─► server
//! client ◄─ INITIAL_FULL_DATA {items} ─── server      (reconciliation answer)
//! client ◄─ ERROR {message} ───────────── server      (rejected input)
//! ```

use serde::{Deserialize, Serialize};

use cartlist_core::{ItemMap, UndoableAction};

/// A browser push subscription, passed through to the notifier untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub auth: String,
    pub p256dh: String,
}

/// Non-undoable protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ControlMessage {
    /// Client → server: the compacted offline queue (possibly empty, for a
    /// lightweight re-sync). Answered with `InitialFullData`.
    SyncWithServer(Vec<UndoableAction>),
    /// Server → client: the full authoritative item set.
    InitialFullData(ItemMap),
    /// Client → server: this user is done shopping; notify the others.
    #[serde(rename = "SIGNAL_FINISHED_SHOPPINGLIST")]
    SignalFinishedShoppingList { user_id: String },
    SubscribeUserPushNotifications {
        user_id: String,
        subscription: PushSubscription,
    },
    UnsubscribeUserPushNotifications { user_id: String },
    /// Server → client: the previous message was rejected.
    Error { message: String },
}

/// Any frame that can appear on the wire.
///
/// Untagged: the two inner enums carry disjoint `type` tags, so decoding
/// is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Action(UndoableAction),
    Control(ControlMessage),
}

impl Message {
    /// Serialize to the JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl From<UndoableAction> for Message {
    fn from(action: UndoableAction) -> Self {
        Message::Action(action)
    }
}

impl From<ControlMessage> for Message {
    fn from(control: ControlMessage) -> Self {
        Message::Control(control)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// The offline queue rejected a new action (bounded capacity).
    QueueFull,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::QueueFull => write!(f, "Offline queue is full"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
