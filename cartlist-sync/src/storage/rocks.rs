//! RocksDB-backed list store.
//!
//! Column families:
//! - `items`         — one bincode-encoded record per list entry, keyed by id
//! - `subscriptions` — push subscriptions, keyed by user id
//! - `wal`           — LZ4-compressed JSON of every applied top-level
//!                     action, keyed by sequence number
//!
//! The action semantics mirror the client reducer: add is an
//! insert-or-overwrite, remove a soft-delete patch, the update actions are
//! field patches, clear truncates and reseeds the sentinel, set-list
//! truncates and bulk-inserts. All operations of one `apply` call go into
//! a single `WriteBatch`, so a failing constituent aborts the whole
//! request with prior state intact.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cartlist_core::{initial_items, Item, ItemId, ItemMap, UndoableAction};

use crate::protocol::PushSubscription;

const CF_ITEMS: &str = "items";
const CF_SUBSCRIPTIONS: &str = "subscriptions";
const CF_WAL: &str = "wal";

const COLUMN_FAMILIES: &[&str] = &[CF_ITEMS, CF_SUBSCRIPTIONS, CF_WAL];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cartlist_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// A persisted push subscription.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredSubscription {
    pub user_id: String,
    pub subscription: PushSubscription,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// An action referenced an id with no record
    UnknownItem(ItemId),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::UnknownItem(id) => write!(f, "Unknown item id: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed store of record for the shared list.
pub struct ListStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Sequence number for WAL entries
    sequence: AtomicU64,
    /// Serializes read-modify-write cycles: a write batch alone does not
    /// serialize the reads that precede it.
    write_lock: Mutex<()>,
}

impl ListStore {
    /// Open the store at the configured path, creating it if needed.
    ///
    /// The items table is seeded with the `INITIAL` sentinel on first open
    /// so the list is never structurally empty.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(name, &config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequence = Self::recover_sequence(&db);

        let store = Self {
            db,
            config,
            sequence: AtomicU64::new(sequence),
            write_lock: Mutex::new(()),
        };
        store.ensure_seeded()?;
        Ok(store)
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_ITEMS | CF_SUBSCRIPTIONS => {
                // Small records, point lookups
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_WAL => {
                // Entries are LZ4-compressed already; sequential access
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// Recover the next WAL sequence number from the highest stored key.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> u64 {
        let cf = match db.cf_handle(CF_WAL) {
            Some(cf) => cf,
            None => return 0,
        };

        let mut iter = db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => {
                if key.len() >= 8 {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&key[..8]);
                    u64::from_be_bytes(buf) + 1
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Insert the sentinel if the items table is empty.
    fn ensure_seeded(&self) -> Result<(), StoreError> {
        let cf = self.cf(CF_ITEMS)?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        if iter.next().is_none() {
            let sentinel = Item::initial();
            self.db
                .put_cf(&cf, sentinel.id.as_str(), encode_item(&sentinel)?)?;
            log::info!("seeded empty item table with the sentinel");
        }
        Ok(())
    }

    // ─── Items ────────────────────────────────────────────────────────

    /// Load the full item map, tombstones included.
    pub fn items(&self) -> Result<ItemMap, StoreError> {
        let cf = self.cf(CF_ITEMS)?;
        let mut items = ItemMap::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for entry in iter {
            let (_, value) = entry.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let item = decode_item(&value)?;
            items.insert(item.id.clone(), item);
        }
        Ok(items)
    }

    /// Load a single item record.
    pub fn get_item(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let cf = self.cf(CF_ITEMS)?;
        match self.db.get_cf(&cf, id.as_str())? {
            Some(bytes) => Ok(Some(decode_item(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply a sequence of actions as one transaction.
    ///
    /// The actions are staged against an in-memory view of the table and
    /// collected into a single write batch together with their WAL
    /// entries. Any error drops the batch: nothing is written.
    pub fn apply(&self, actions: &[UndoableAction]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let cf_items = self.cf(CF_ITEMS)?;
        let cf_wal = self.cf(CF_WAL)?;

        let mut view = self.items()?;
        let mut batch = WriteBatch::default();

        for action in actions {
            self.stage(action, &mut view, &mut batch, &cf_items)?;

            // One WAL entry per top-level action, inside the same batch.
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            batch.put_cf(&cf_wal, seq.to_be_bytes(), encode_wal_entry(action)?);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    /// Stage one action into the batch, updating the in-memory view so
    /// later actions in the same transaction observe its effect.
    fn stage(
        &self,
        action: &UndoableAction,
        view: &mut ItemMap,
        batch: &mut WriteBatch,
        cf_items: &rocksdb::ColumnFamily,
    ) -> Result<(), StoreError> {
        match action {
            UndoableAction::AddListItem(item) => {
                view.insert(item.id.clone(), item.clone());
                batch.put_cf(cf_items, item.id.as_str(), encode_item(item)?);
            }
            UndoableAction::RemoveListItem { id } => {
                let item = view
                    .get_mut(id)
                    .ok_or_else(|| StoreError::UnknownItem(id.clone()))?;
                item.deleted = true;
                batch.put_cf(cf_items, id.as_str(), encode_item(item)?);
            }
            UndoableAction::UpdateListItemValue { id, new_value } => {
                let item = view
                    .get_mut(id)
                    .ok_or_else(|| StoreError::UnknownItem(id.clone()))?;
                item.value = new_value.clone();
                batch.put_cf(cf_items, id.as_str(), encode_item(item)?);
            }
            UndoableAction::UpdateListItemChecked { id, new_checked } => {
                let item = view
                    .get_mut(id)
                    .ok_or_else(|| StoreError::UnknownItem(id.clone()))?;
                item.checked = *new_checked;
                batch.put_cf(cf_items, id.as_str(), encode_item(item)?);
            }
            UndoableAction::ClearList => {
                for id in view.keys() {
                    batch.delete_cf(cf_items, id.as_str());
                }
                *view = initial_items();
                let sentinel = &view[&ItemId::initial()];
                batch.put_cf(cf_items, sentinel.id.as_str(), encode_item(sentinel)?);
            }
            UndoableAction::SetList(new_items) => {
                for id in view.keys() {
                    batch.delete_cf(cf_items, id.as_str());
                }
                for item in new_items.values() {
                    batch.put_cf(cf_items, item.id.as_str(), encode_item(item)?);
                }
                *view = new_items.clone();
            }
            UndoableAction::Batch(nested) => {
                for action in nested {
                    self.stage(action, view, batch, cf_items)?;
                }
            }
        }
        Ok(())
    }

    // ─── Push subscriptions ───────────────────────────────────────────

    pub fn put_subscription(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_SUBSCRIPTIONS)?;
        let record = StoredSubscription {
            user_id: user_id.to_string(),
            subscription: subscription.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        self.db.put_cf(&cf, user_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn remove_subscription(&self, user_id: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_SUBSCRIPTIONS)?;
        self.db.delete_cf(&cf, user_id.as_bytes())?;
        Ok(())
    }

    pub fn subscription(&self, user_id: &str) -> Result<Option<StoredSubscription>, StoreError> {
        let cf = self.cf(CF_SUBSCRIPTIONS)?;
        match self.db.get_cf(&cf, user_id.as_bytes())? {
            Some(bytes) => {
                let (record, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn subscriptions(&self) -> Result<Vec<StoredSubscription>, StoreError> {
        let cf = self.cf(CF_SUBSCRIPTIONS)?;
        let mut records = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for entry in iter {
            let (_, value) = entry.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let (record, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    // ─── WAL ──────────────────────────────────────────────────────────

    /// Read back applied actions since a sequence number, in order.
    pub fn wal_entries_since(
        &self,
        since_seq: u64,
    ) -> Result<Vec<(u64, UndoableAction)>, StoreError> {
        let cf = self.cf(CF_WAL)?;
        let start_key = since_seq.to_be_bytes();

        let mut entries = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );
        for entry in iter {
            let (key, value) = entry.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 8 {
                continue;
            }
            let mut seq_buf = [0u8; 8];
            seq_buf.copy_from_slice(&key[..8]);
            entries.push((u64::from_be_bytes(seq_buf), decode_wal_entry(&value)?));
        }
        Ok(entries)
    }

    /// Drop WAL entries up to and including a sequence number.
    pub fn wal_truncate(&self, up_to_seq: u64) -> Result<u64, StoreError> {
        let cf = self.cf(CF_WAL)?;

        let mut count = 0u64;
        let mut batch = WriteBatch::default();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for entry in iter {
            let (key, _) = entry.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 8 {
                continue;
            }
            let mut seq_buf = [0u8; 8];
            seq_buf.copy_from_slice(&key[..8]);
            if u64::from_be_bytes(seq_buf) > up_to_seq {
                break;
            }
            batch.delete_cf(&cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    /// The next WAL sequence number.
    pub fn wal_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

fn encode_item(item: &Item) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(item, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode_item(bytes: &[u8]) -> Result<Item, StoreError> {
    let (item, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(item)
}

fn encode_wal_entry(action: &UndoableAction) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(action)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

fn decode_wal_entry(bytes: &[u8]) -> Result<UndoableAction, StoreError> {
    let json = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| StoreError::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SubscriptionKeys;
    use cartlist_core::ItemRef;

    fn open_temp() -> (tempfile::TempDir, ListStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ListStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    fn add(id: &str, value: &str) -> UndoableAction {
        UndoableAction::AddListItem(Item {
            id: ItemId::from(id),
            value: value.into(),
            checked: false,
            deleted: false,
            prev_item_id: ItemRef::Id(ItemId::initial()),
        })
    }

    fn subscription(tag: &str) -> PushSubscription {
        PushSubscription {
            endpoint: format!("https://push.example/{tag}"),
            expiration_time: None,
            keys: SubscriptionKeys {
                auth: format!("auth-{tag}"),
                p256dh: format!("p256dh-{tag}"),
            },
        }
    }

    #[test]
    fn test_open_seeds_sentinel() {
        let (_dir, store) = open_temp();
        let items = store.items().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items.contains_key(&ItemId::initial()));
    }

    #[test]
    fn test_apply_add_and_reload() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();

        let item = store.get_item(&ItemId::from("a")).unwrap().unwrap();
        assert_eq!(item.value, "Milk");
        assert!(!item.deleted);
        assert_eq!(store.items().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_is_soft_delete() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();
        store
            .apply(&[UndoableAction::RemoveListItem { id: ItemId::from("a") }])
            .unwrap();

        // The record survives as a tombstone.
        let item = store.get_item(&ItemId::from("a")).unwrap().unwrap();
        assert!(item.deleted);
        assert_eq!(item.value, "Milk");
    }

    #[test]
    fn test_field_patches() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();
        store
            .apply(&[
                UndoableAction::UpdateListItemValue {
                    id: ItemId::from("a"),
                    new_value: "Oat milk".into(),
                },
                UndoableAction::UpdateListItemChecked {
                    id: ItemId::from("a"),
                    new_checked: true,
                },
            ])
            .unwrap();

        let item = store.get_item(&ItemId::from("a")).unwrap().unwrap();
        assert_eq!(item.value, "Oat milk");
        assert!(item.checked);
    }

    #[test]
    fn test_clear_truncates_and_reseeds() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk"), add("b", "Eggs")]).unwrap();
        store.apply(&[UndoableAction::ClearList]).unwrap();

        let items = store.items().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items.contains_key(&ItemId::initial()));
    }

    #[test]
    fn test_set_list_replaces_table() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();

        let mut replacement = initial_items();
        let item = Item {
            id: ItemId::from("z"),
            value: "Tea".into(),
            checked: false,
            deleted: false,
            prev_item_id: ItemRef::Id(ItemId::initial()),
        };
        replacement.insert(item.id.clone(), item);

        store
            .apply(&[UndoableAction::SetList(replacement.clone())])
            .unwrap();
        assert_eq!(store.items().unwrap(), replacement);
    }

    #[test]
    fn test_failed_batch_leaves_state_intact() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();
        let before = store.items().unwrap();
        let seq_before = store.wal_sequence();

        let result = store.apply(&[
            UndoableAction::UpdateListItemValue {
                id: ItemId::from("a"),
                new_value: "Oat milk".into(),
            },
            UndoableAction::RemoveListItem { id: ItemId::from("ghost") },
        ]);
        assert!(matches!(result, Err(StoreError::UnknownItem(_))));

        // Neither the update nor any WAL entry landed.
        assert_eq!(store.items().unwrap(), before);
        assert!(store.wal_entries_since(seq_before).unwrap().is_empty());
    }

    #[test]
    fn test_batch_action_sees_own_adds() {
        let (_dir, store) = open_temp();
        // The update targets an item added earlier in the same batch.
        store
            .apply(&[UndoableAction::Batch(vec![
                add("a", "Milk"),
                UndoableAction::UpdateListItemChecked {
                    id: ItemId::from("a"),
                    new_checked: true,
                },
            ])])
            .unwrap();

        let item = store.get_item(&ItemId::from("a")).unwrap().unwrap();
        assert!(item.checked);
    }

    #[test]
    fn test_wal_records_actions() {
        let (_dir, store) = open_temp();
        store.apply(&[add("a", "Milk")]).unwrap();
        store
            .apply(&[UndoableAction::UpdateListItemChecked {
                id: ItemId::from("a"),
                new_checked: true,
            }])
            .unwrap();

        let entries = store.wal_entries_since(0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, add("a", "Milk"));
        assert!(matches!(
            entries[1].1,
            UndoableAction::UpdateListItemChecked { .. }
        ));
    }

    #[test]
    fn test_wal_sequence_recovery_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = ListStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.apply(&[add("a", "Milk"), add("b", "Eggs")]).unwrap();
            assert_eq!(store.wal_sequence(), 2);
        }

        let store = ListStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(store.wal_sequence(), 2);
        // Items survived the reopen too.
        assert_eq!(store.items().unwrap().len(), 3);
    }

    #[test]
    fn test_wal_truncate() {
        let (_dir, store) = open_temp();
        for i in 0..6 {
            store.apply(&[add(&format!("i{i}"), "x")]).unwrap();
        }

        let removed = store.wal_truncate(2).unwrap();
        assert_eq!(removed, 3);

        let remaining = store.wal_entries_since(0).unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].0, 3);
    }

    #[test]
    fn test_subscription_crud() {
        let (_dir, store) = open_temp();
        store.put_subscription("u1", &subscription("one")).unwrap();
        store.put_subscription("u2", &subscription("two")).unwrap();

        let loaded = store.subscription("u1").unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.subscription.keys.auth, "auth-one");

        assert_eq!(store.subscriptions().unwrap().len(), 2);

        store.remove_subscription("u1").unwrap();
        assert!(store.subscription("u1").unwrap().is_none());
        assert_eq!(store.subscriptions().unwrap().len(), 1);
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.block_cache_size, 64 * 1024 * 1024);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::UnknownItem(ItemId::from("ghost"));
        assert!(err.to_string().contains("ghost"));
        let err = StoreError::DatabaseError("boom".into());
        assert!(err.to_string().contains("Database error"));
    }
}
