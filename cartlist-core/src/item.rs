//! List entries and the ordered projection.
//!
//! Items form a singly-linked list through `prev_item_id`: each item names
//! its predecessor, and `ItemRef::Head` marks the front of the list. Deleted
//! items stay in the map as tombstones so that a successor still pointing at
//! them can be relinked at projection time instead of requiring a
//! destructive rewrite of the chain.
//!
//! The sentinel item `INITIAL` is always present (`prev_item_id = HEAD`),
//! which keeps the list structurally non-empty and makes "insert after
//! nothing" and "undo the removal of the last item" uniform cases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Id of the always-present sentinel item.
pub const INITIAL_ID: &str = "INITIAL";

/// Wire marker for "first item" in `prev_item_id`.
const HEAD_MARKER: &str = "HEAD";

/// Identifier of a single list entry.
///
/// Generated ids are UUIDv7 strings (time-ordered, so the descending-id
/// tie-break in [`project`] favors the most recently created item). The
/// sentinel uses the literal id `"INITIAL"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered item id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The sentinel item's id.
    pub fn initial() -> Self {
        Self(INITIAL_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Predecessor reference: either the head of the list or another item's id.
///
/// Serialized as the plain string `"HEAD"` or the referenced id, matching
/// the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemRef {
    Head,
    Id(ItemId),
}

impl From<String> for ItemRef {
    fn from(s: String) -> Self {
        if s == HEAD_MARKER {
            ItemRef::Head
        } else {
            ItemRef::Id(ItemId(s))
        }
    }
}

impl From<ItemRef> for String {
    fn from(r: ItemRef) -> Self {
        match r {
            ItemRef::Head => HEAD_MARKER.to_string(),
            ItemRef::Id(id) => id.0,
        }
    }
}

impl From<ItemId> for ItemRef {
    fn from(id: ItemId) -> Self {
        ItemRef::Id(id)
    }
}

/// A single list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub value: String,
    pub checked: bool,
    /// Tombstone flag. Deleted items are kept in the map but excluded from
    /// the projection.
    pub deleted: bool,
    pub prev_item_id: ItemRef,
}

impl Item {
    /// Create a fresh, unchecked item after the given predecessor.
    pub fn new(value: impl Into<String>, prev_item_id: ItemRef) -> Self {
        Self {
            id: ItemId::generate(),
            value: value.into(),
            checked: false,
            deleted: false,
            prev_item_id,
        }
    }

    /// The sentinel item anchoring the list.
    pub fn initial() -> Self {
        Self {
            id: ItemId::initial(),
            value: String::new(),
            checked: false,
            deleted: false,
            prev_item_id: ItemRef::Head,
        }
    }
}

/// The item collection, keyed by id.
pub type ItemMap = HashMap<ItemId, Item>;

/// A fresh item map containing only the sentinel.
pub fn initial_items() -> ItemMap {
    let item = Item::initial();
    let mut items = ItemMap::new();
    items.insert(item.id.clone(), item);
    items
}

/// Project the item map into its displayed order.
///
/// Two phases:
/// 1. Structural order: an adjacency map `prev_item_id -> [ids]` is walked
///    depth-first from `HEAD` with an explicit stack, visiting siblings in
///    descending-id order. The tie-break is arbitrary but stable, so
///    concurrent inserts after the same predecessor resolve
///    deterministically without discarding either item.
/// 2. Tombstones are filtered out and the survivors are stably partitioned
///    so all checked items come after all unchecked ones.
///
/// Both phases are stable, so projecting the same unmodified map twice
/// yields identical output.
pub fn project(items: &ItemMap) -> Vec<&Item> {
    let mut children: HashMap<&ItemRef, Vec<&ItemId>> = HashMap::new();
    for item in items.values() {
        children.entry(&item.prev_item_id).or_default().push(&item.id);
    }
    for ids in children.values_mut() {
        ids.sort_unstable_by(|a, b| b.cmp(a));
    }

    let mut ordered: Vec<&Item> = Vec::with_capacity(items.len());
    let mut stack: Vec<&ItemId> = Vec::new();
    if let Some(roots) = children.get(&ItemRef::Head) {
        // Reversed so the greatest id is popped (and visited) first.
        stack.extend(roots.iter().rev());
    }
    while let Some(id) = stack.pop() {
        let Some(item) = items.get(id) else { continue };
        ordered.push(item);
        let child_ref = ItemRef::Id(id.clone());
        if let Some(kids) = children.get(&child_ref) {
            stack.extend(kids.iter().rev());
        }
    }

    let (unchecked, checked): (Vec<&Item>, Vec<&Item>) = ordered
        .into_iter()
        .filter(|item| !item.deleted)
        .partition(|item| !item.checked);
    unchecked.into_iter().chain(checked).collect()
}
