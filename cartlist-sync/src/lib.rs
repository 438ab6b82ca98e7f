//! # cartlist-sync — real-time reconciliation for the shared list
//!
//! WebSocket transport, reconciliation protocol and durable server
//! storage around the `cartlist-core` engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      WebSocket      ┌─────────────┐
//! │ ListSession │ ◄─────────────────► │ SyncServer  │
//! │  SyncClient │     JSON frames     │  (central)  │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ ListState   │                     │ ListStore   │
//! │ + LocalStore│                     │ (RocksDB)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ SessionGroup  │
//!                                    │ (fan-out)     │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire frames (`{type, payload}`)
//! - [`client`] — connection lifecycle, offline queue, fixed-backoff retry
//! - [`session`] — local state + transport + local persistence glue
//! - [`broadcast`] — session fan-out with sender exclusion
//! - [`server`] — accept loop and reconciliation handshake
//! - [`storage`] — RocksDB store of record with transactional applies
//! - [`notify`] — push-notification seam

pub mod broadcast;
pub mod client;
pub mod notify;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use broadcast::{BroadcastStats, Frame, SessionGroup, SessionInfo};
pub use client::{ClientConfig, ConnectionState, SyncClient, SyncEvent};
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use protocol::{
    ControlMessage, Message, ProtocolError, PushSubscription, SubscriptionKeys,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{ListSession, LocalStore, MemoryStore, SessionError};
pub use storage::{ListStore, StoreConfig, StoreError, StoredSubscription};
