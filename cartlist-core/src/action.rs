//! Undoable actions and their origins.
//!
//! `UndoableAction` is the closed set of list mutations shared by the
//! client reducer, the offline queue, the wire protocol and the server
//! persistence adapter. The serde representation is the wire shape:
//! `{"type": "ADD_LIST_ITEM", "payload": {…}}` with SCREAMING_SNAKE tags
//! and camelCase payload fields.

use serde::{Deserialize, Serialize};

use crate::item::{Item, ItemId, ItemMap};

/// Where an action came from.
///
/// The origin gates two things: only `User` actions are recorded on the
/// undo stack, and only `User` actions are forwarded to the transport.
/// Actions received from the server or replayed from local storage are
/// applied silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Initiated by the local user; recorded and forwarded.
    User,
    /// Received from the server (a rebroadcast or reconciliation answer).
    Server,
    /// Replayed from the persistent local store at startup.
    LocalStorage,
    /// Internal state management; never leaves the process.
    Internal,
}

impl Origin {
    /// Whether actions of this origin are recorded on the undo stack.
    pub fn records_undo(self) -> bool {
        matches!(self, Origin::User)
    }

    /// Whether actions of this origin are forwarded to the transport.
    pub fn forwards(self) -> bool {
        matches!(self, Origin::User)
    }
}

/// A list mutation whose effect can be exactly reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum UndoableAction {
    /// Insert an item (the payload carries its predecessor link).
    AddListItem(Item),
    /// Tombstone an item.
    RemoveListItem { id: ItemId },
    UpdateListItemValue { id: ItemId, new_value: String },
    UpdateListItemChecked { id: ItemId, new_checked: bool },
    /// Reset the list to just the sentinel.
    ClearList,
    /// Replace the whole item map. Only produced as the inverse of
    /// `ClearList`; it has no inverse of its own.
    SetList(ItemMap),
    /// Apply several actions as one undoable unit.
    Batch(Vec<UndoableAction>),
}

impl UndoableAction {
    /// The item this action targets, if it targets exactly one.
    pub fn target_id(&self) -> Option<&ItemId> {
        match self {
            UndoableAction::AddListItem(item) => Some(&item.id),
            UndoableAction::RemoveListItem { id }
            | UndoableAction::UpdateListItemValue { id, .. }
            | UndoableAction::UpdateListItemChecked { id, .. } => Some(id),
            UndoableAction::ClearList
            | UndoableAction::SetList(_)
            | UndoableAction::Batch(_) => None,
        }
    }

    /// Wire tag of this action, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            UndoableAction::AddListItem(_) => "ADD_LIST_ITEM",
            UndoableAction::RemoveListItem { .. } => "REMOVE_LIST_ITEM",
            UndoableAction::UpdateListItemValue { .. } => "UPDATE_LIST_ITEM_VALUE",
            UndoableAction::UpdateListItemChecked { .. } => "UPDATE_LIST_ITEM_CHECKED",
            UndoableAction::ClearList => "CLEAR_LIST",
            UndoableAction::SetList(_) => "SET_LIST",
            UndoableAction::Batch(_) => "BATCH",
        }
    }
}
