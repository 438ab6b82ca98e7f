//! Offline queue and pre-replay compaction.
//!
//! While the client is disconnected, every locally-originated undoable
//! action is buffered here. At reconnect the queue is drained exactly
//! once, compacted to an equivalent smaller sequence, and sent to the
//! server as a single reconciliation request.

use std::collections::VecDeque;
use std::mem::discriminant;

use log::debug;

use crate::action::UndoableAction;

/// Bounded buffer of actions performed while disconnected.
pub struct OfflineQueue {
    queue: VecDeque<UndoableAction>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an action for later replay. Returns false when full.
    pub fn enqueue(&mut self, action: UndoableAction) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(action);
        true
    }

    /// Drain the queue and return its compacted form.
    pub fn drain_compacted(&mut self) -> Vec<UndoableAction> {
        let raw: Vec<UndoableAction> = self.queue.drain(..).collect();
        let queued = raw.len();
        let compacted = compact(raw);
        if queued > 0 {
            debug!("compacted {queued} offline actions into {}", compacted.len());
        }
        compacted
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Fold a queue of actions into an equivalent, smaller queue.
///
/// - Value/checked updates targeting the same id merge last-write-wins:
///   the earliest occurrence keeps its position, the latest keeps its
///   payload.
/// - A remove cancels an earlier add of the same id entirely (the item
///   lived and died offline), along with any updates to it; without an
///   earlier add, the remove supersedes the updates and stays.
/// - Everything else passes through in order.
pub fn compact(actions: Vec<UndoableAction>) -> Vec<UndoableAction> {
    let mut acc: Vec<UndoableAction> = Vec::with_capacity(actions.len());

    for action in actions {
        match &action {
            UndoableAction::UpdateListItemValue { id, .. }
            | UndoableAction::UpdateListItemChecked { id, .. } => {
                let merged = acc.iter().position(|earlier| {
                    discriminant(earlier) == discriminant(&action)
                        && earlier.target_id() == Some(id)
                });
                match merged {
                    Some(index) => acc[index] = action,
                    None => acc.push(action),
                }
            }
            UndoableAction::RemoveListItem { id } => {
                let added_offline = acc.iter().any(|earlier| {
                    matches!(earlier, UndoableAction::AddListItem(item) if item.id == *id)
                });
                let id = id.clone();
                acc.retain(|earlier| earlier.target_id() != Some(&id));
                if !added_offline {
                    acc.push(action);
                }
            }
            _ => acc.push(action),
        }
    }

    acc
}
