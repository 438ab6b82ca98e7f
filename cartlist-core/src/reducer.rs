//! The deterministic state-transition table.
//!
//! [`apply`] mutates an item map in place and returns the inverse action
//! when one exists. The same table runs on the client (against the local
//! store) and on the server (against durable storage), so replaying a
//! queue of actions is deterministic on both sides.
//!
//! | action                 | effect                    | inverse            |
//! |------------------------|---------------------------|--------------------|
//! | add(item)              | insert keyed by id        | remove(id)         |
//! | remove(id)             | set `deleted = true`      | add(undeleted snap)|
//! | update_value(id, v)    | set `value = v`           | update_value(old)  |
//! | update_checked(id, b)  | set `checked = b`         | update_checked(old)|
//! | clear                  | reset to `{INITIAL}`      | set_list(old map)  |
//! | set_list(items)        | replace map wholesale     | —                  |
//! | batch(actions)         | apply each in order       | batch(rev inverses)|

use std::fmt;

use crate::action::UndoableAction;
use crate::item::{initial_items, Item, ItemId, ItemMap};

/// Errors from applying an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// The action referenced an id that is not in the map. Ids from a
    /// trusted upstream are guaranteed by causal ordering of the prior
    /// `add`, so this is a contract violation by the caller: the
    /// operation is aborted, the process keeps running.
    UnknownItem(ItemId),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::UnknownItem(id) => write!(f, "Unknown item id: {id}"),
        }
    }
}

impl std::error::Error for ApplyError {}

/// Apply `action` to `items`, returning the inverse action if one exists.
///
/// `SetList` is the only undoable action without an inverse: it is only
/// ever produced as the undo target of `ClearList`.
pub fn apply(
    items: &mut ItemMap,
    action: &UndoableAction,
) -> Result<Option<UndoableAction>, ApplyError> {
    match action {
        UndoableAction::AddListItem(item) => {
            items.insert(item.id.clone(), item.clone());
            Ok(Some(UndoableAction::RemoveListItem { id: item.id.clone() }))
        }
        UndoableAction::RemoveListItem { id } => {
            let item = lookup(items, id)?;
            let snapshot = Item {
                deleted: false,
                ..item.clone()
            };
            item.deleted = true;
            Ok(Some(UndoableAction::AddListItem(snapshot)))
        }
        UndoableAction::UpdateListItemValue { id, new_value } => {
            let item = lookup(items, id)?;
            let old_value = std::mem::replace(&mut item.value, new_value.clone());
            Ok(Some(UndoableAction::UpdateListItemValue {
                id: id.clone(),
                new_value: old_value,
            }))
        }
        UndoableAction::UpdateListItemChecked { id, new_checked } => {
            let item = lookup(items, id)?;
            let old_checked = std::mem::replace(&mut item.checked, *new_checked);
            Ok(Some(UndoableAction::UpdateListItemChecked {
                id: id.clone(),
                new_checked: old_checked,
            }))
        }
        UndoableAction::ClearList => {
            let old_items = std::mem::replace(items, initial_items());
            Ok(Some(UndoableAction::SetList(old_items)))
        }
        UndoableAction::SetList(new_items) => {
            *items = new_items.clone();
            Ok(None)
        }
        UndoableAction::Batch(actions) => {
            let mut inverses = Vec::with_capacity(actions.len());
            for action in actions {
                if let Some(inverse) = apply(items, action)? {
                    inverses.push(inverse);
                }
            }
            inverses.reverse();
            Ok(Some(UndoableAction::Batch(inverses)))
        }
    }
}

fn lookup<'a>(items: &'a mut ItemMap, id: &ItemId) -> Result<&'a mut Item, ApplyError> {
    items
        .get_mut(id)
        .ok_or_else(|| ApplyError::UnknownItem(id.clone()))
}
