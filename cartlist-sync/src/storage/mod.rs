//! Durable server-side storage for the shared list.
//!
//! ```text
//! ┌────────────┐   actions    ┌──────────────────────────────────┐
//! │ SyncServer │ ───────────► │ ListStore (RocksDB)              │
//! └────────────┘              │   CF "items"         — records   │
//!                             │   CF "subscriptions" — push subs │
//!                             │   CF "wal"           — action log│
//!                             └──────────────────────────────────┘
//! ```
//!
//! Every action maps to record-level operations collected into one atomic
//! write batch; `BATCH` and `SYNC_WITH_SERVER` land entirely or not at all.

pub mod rocks;

pub use rocks::{ListStore, StoreConfig, StoreError, StoredSubscription};
