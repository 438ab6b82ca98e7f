//! The client session: local state, transport and local persistence glued
//! together.
//!
//! Dispatch order is the heart of the local-first model: a user action is
//! applied to the in-memory state synchronously, mirrored to the local
//! store, and only then handed to the transport (which queues it while
//! offline). The UI never waits on the network. Inbound server events run
//! through the same reducer with `Origin::Server`, so they are neither
//! recorded as undoable nor forwarded back out.

use log::warn;

use cartlist_core::{
    ApplyError, Item, ItemId, ItemMap, ItemRef, ListState, Origin, UndoableAction,
};

use crate::client::{SyncClient, SyncEvent};
use crate::protocol::ProtocolError;

/// The persistent local key-value store (the IndexedDB seam).
///
/// Implementations only need whole-map snapshots: the session rewrites the
/// stored items after every applied action once the initial load is done.
pub trait LocalStore: Send {
    /// The previously persisted items, if any.
    fn get_items(&self) -> Option<ItemMap>;
    /// Persist the current items.
    fn update_items(&mut self, items: &ItemMap);
}

/// In-memory [`LocalStore`], for tests and storage-less clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Option<ItemMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get_items(&self) -> Option<ItemMap> {
        self.items.clone()
    }

    fn update_items(&mut self, items: &ItemMap) {
        self.items = Some(items.clone());
    }
}

/// Session errors.
#[derive(Debug)]
pub enum SessionError {
    Apply(ApplyError),
    Protocol(ProtocolError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Apply(e) => write!(f, "Apply error: {e}"),
            SessionError::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ApplyError> for SessionError {
    fn from(e: ApplyError) -> Self {
        SessionError::Apply(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        SessionError::Protocol(e)
    }
}

/// One user's live view of the shared list.
pub struct ListSession {
    state: ListState,
    client: SyncClient,
    local: Box<dyn LocalStore>,
    local_loaded: bool,
    connected: bool,
}

impl ListSession {
    pub fn new(client: SyncClient, local: Box<dyn LocalStore>) -> Self {
        Self {
            state: ListState::new(),
            client,
            local,
            local_loaded: false,
            connected: false,
        }
    }

    /// Load previously persisted items.
    ///
    /// Called once at startup, before connecting; until then nothing is
    /// written back to the local store.
    pub fn load_local(&mut self) {
        if let Some(items) = self.local.get_items() {
            self.state.replace_items(items);
        }
        self.local_loaded = true;
    }

    /// Apply a user action locally and forward it.
    pub async fn dispatch(&mut self, action: UndoableAction) -> Result<(), SessionError> {
        self.state.dispatch(action.clone(), Origin::User)?;
        self.persist_local();
        self.client.send_action(action).await?;
        Ok(())
    }

    /// Undo the last user action; the inverse travels like a user action.
    pub async fn undo(&mut self) -> Result<(), SessionError> {
        if let Some(inverse) = self.state.undo()? {
            self.persist_local();
            self.client.send_action(inverse).await?;
        }
        Ok(())
    }

    /// Redo the last undone action.
    pub async fn redo(&mut self) -> Result<(), SessionError> {
        if let Some(action) = self.state.redo()? {
            self.persist_local();
            self.client.send_action(action).await?;
        }
        Ok(())
    }

    /// Feed one event from the client's event channel into the state.
    pub async fn handle_event(&mut self, event: SyncEvent) -> Result<(), SessionError> {
        match event {
            SyncEvent::RemoteAction(action) => {
                self.state.dispatch(action, Origin::Server)?;
                self.persist_local();
            }
            SyncEvent::FullData(items) => {
                self.state.replace_items(items);
                self.persist_local();
            }
            SyncEvent::Connected => self.connected = true,
            SyncEvent::Disconnected => self.connected = false,
            SyncEvent::ConnectTimedOut => {}
            SyncEvent::ServerError(message) => {
                warn!("server rejected a message: {message}");
            }
        }
        Ok(())
    }

    // ─── Convenience constructors for the usual gestures ──────────────

    /// Add a fresh item after `prev` and dispatch it.
    pub async fn add_item(
        &mut self,
        value: impl Into<String>,
        prev: ItemRef,
    ) -> Result<ItemId, SessionError> {
        let item = Item::new(value, prev);
        let id = item.id.clone();
        self.dispatch(UndoableAction::AddListItem(item)).await?;
        Ok(id)
    }

    pub async fn remove_item(&mut self, id: ItemId) -> Result<(), SessionError> {
        self.dispatch(UndoableAction::RemoveListItem { id }).await
    }

    pub async fn update_value(
        &mut self,
        id: ItemId,
        new_value: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.dispatch(UndoableAction::UpdateListItemValue {
            id,
            new_value: new_value.into(),
        })
        .await
    }

    pub async fn update_checked(
        &mut self,
        id: ItemId,
        new_checked: bool,
    ) -> Result<(), SessionError> {
        self.dispatch(UndoableAction::UpdateListItemChecked { id, new_checked })
            .await
    }

    pub async fn clear(&mut self) -> Result<(), SessionError> {
        self.dispatch(UndoableAction::ClearList).await
    }

    /// Remove every checked item — or clear outright when everything is
    /// checked — as one undoable step.
    pub async fn clear_checked(&mut self) -> Result<(), SessionError> {
        let displayed = self.state.project();
        let checked_ids: Vec<ItemId> = displayed
            .iter()
            .filter(|item| item.checked)
            .map(|item| item.id.clone())
            .collect();

        if checked_ids.is_empty() {
            return Ok(());
        }
        if checked_ids.len() == displayed.len() {
            return self.clear().await;
        }

        let removes = checked_ids
            .into_iter()
            .map(|id| UndoableAction::RemoveListItem { id })
            .collect();
        self.dispatch(UndoableAction::Batch(removes)).await
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn items(&self) -> &ItemMap {
        self.state.items()
    }

    pub fn project(&self) -> Vec<&Item> {
        self.state.project()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    pub fn take_focus_target(&mut self) -> Option<ItemId> {
        self.state.take_focus_target()
    }

    fn persist_local(&mut self) {
        if self.local_loaded {
            self.local.update_items(self.state.items());
        }
    }
}
