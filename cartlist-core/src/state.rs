//! Client-side list state: items plus the undo/redo stacks.
//!
//! The stacks are plain owned vectors on the state value — there is no
//! module-level history. Each undo entry pairs the recorded inverse with
//! the original action that produced it, so undo can hand the original to
//! the redo stack without a back-pointer inside the action itself.

use log::debug;

use crate::action::{Origin, UndoableAction};
use crate::item::{initial_items, project, Item, ItemId, ItemMap};
use crate::reducer::{apply, ApplyError};

/// One recorded step of history.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    /// The action that reverses the original.
    pub inverse: UndoableAction,
    /// The action that was applied; re-dispatched on redo.
    pub original: UndoableAction,
}

/// The local list state.
///
/// Dispatching applies an action synchronously through the reducer —
/// callers forward user actions to the transport *after* the local apply,
/// so the UI never waits on the network.
#[derive(Debug)]
pub struct ListState {
    items: ItemMap,
    undo_list: Vec<UndoEntry>,
    redo_list: Vec<UndoableAction>,
    focus_target: Option<ItemId>,
}

impl ListState {
    /// A fresh state containing only the sentinel item.
    pub fn new() -> Self {
        Self::from_items(initial_items())
    }

    pub fn from_items(items: ItemMap) -> Self {
        Self {
            items,
            undo_list: Vec::new(),
            redo_list: Vec::new(),
            focus_target: None,
        }
    }

    pub fn items(&self) -> &ItemMap {
        &self.items
    }

    /// The displayed (ordered, tombstone-free, checked-last) list.
    pub fn project(&self) -> Vec<&Item> {
        project(&self.items)
    }

    /// Replace the item map wholesale without touching history.
    ///
    /// Used for the server's reconciliation answer and the initial load
    /// from local storage.
    pub fn replace_items(&mut self, items: ItemMap) {
        self.items = items;
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_list.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_list.is_empty()
    }

    /// Id of the most recently added item, for the UI to focus. Cleared
    /// once taken.
    pub fn take_focus_target(&mut self) -> Option<ItemId> {
        self.focus_target.take()
    }

    /// Apply an action through the reducer.
    ///
    /// Only `Origin::User` actions are recorded on the undo stack; server
    /// rebroadcasts and local-storage replays pass through unrecorded.
    pub fn dispatch(
        &mut self,
        action: UndoableAction,
        origin: Origin,
    ) -> Result<(), ApplyError> {
        let inverse = apply(&mut self.items, &action)?;

        if let Some(id) = added_id(&action) {
            self.focus_target = Some(id.clone());
        }

        if origin.records_undo() {
            if let Some(inverse) = inverse {
                self.undo_list.push(UndoEntry {
                    inverse,
                    original: action,
                });
            }
        }
        Ok(())
    }

    /// Undo the most recent user action.
    ///
    /// Applies the recorded inverse without re-recording it, moves the
    /// original onto the redo stack, and returns the inverse so the caller
    /// can forward it to the server like any other user action.
    pub fn undo(&mut self) -> Result<Option<UndoableAction>, ApplyError> {
        let Some(entry) = self.undo_list.pop() else {
            return Ok(None);
        };
        apply(&mut self.items, &entry.inverse)?;
        debug!("undo: reversed {}", entry.original.kind());
        self.redo_list.push(entry.original);
        Ok(Some(entry.inverse))
    }

    /// Redo the most recently undone action.
    ///
    /// The action goes back through the normal user dispatch path, so a
    /// fresh inverse is recorded and the caller forwards the returned
    /// action to the server.
    pub fn redo(&mut self) -> Result<Option<UndoableAction>, ApplyError> {
        let Some(action) = self.redo_list.pop() else {
            return Ok(None);
        };
        self.dispatch(action.clone(), Origin::User)?;
        Ok(Some(action))
    }
}

impl Default for ListState {
    fn default() -> Self {
        Self::new()
    }
}

/// The id focus should move to after `action`, if it adds an item.
fn added_id(action: &UndoableAction) -> Option<&ItemId> {
    match action {
        UndoableAction::AddListItem(item) => Some(&item.id),
        UndoableAction::Batch(actions) => actions.iter().rev().find_map(added_id),
        _ => None,
    }
}
