//! RocksDB-backed durable room store.
//!
//! Column families:
//! - `rooms` — One record per room ever created (keyed by 6-byte room code)
//! - `chats` — Chat entries (keyed by room code + global sequence number)
//!
//! Room records are never deleted: closing the last connection marks the
//! record inactive, so the history of a room outlives its in-memory life.
//! Draw history is deliberately not persisted — it is session state.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::identity::{RoomCode, ROOM_CODE_LEN};
use crate::protocol::ChatEntry;

/// Column family names.
const CF_ROOMS: &str = "rooms";
const CF_CHATS: &str = "chats";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_CHATS];

/// Chat key layout: room code (6 bytes) + sequence number (8 bytes BE).
const CHAT_KEY_LEN: usize = ROOM_CODE_LEN + 8;

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
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mural_data"),
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Durable record of a room's existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Canonical room code
    pub code: String,
    /// Creation timestamp (milliseconds since epoch)
    pub created_at_ms: u64,
    /// False once the last connection has left
    pub active: bool,
}

impl RoomRecord {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(record)
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Room record not found
    NotFound(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(code) => write!(f, "Room not found: {code}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed room store.
///
/// Chat entries share one monotone sequence so their keys sort in append
/// order within each room; the sequence is recovered on open.
pub struct RoomStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
    /// Global sequence number for chat entries
    chat_sequence: AtomicU64,
}

impl RoomStore {
    /// Open the room store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

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

        let chat_sequence = Self::recover_chat_sequence(&db);

        Ok(Self {
            db,
            config,
            chat_sequence: AtomicU64::new(chat_sequence),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        // Block-based table with bloom filter and cache
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        // LZ4 — fast decompression on the read path
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_ROOMS => {
                // Small records, fetched one at a time
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_CHATS => {
                // Many small appends, prefix-scanned by room code
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(
                    ROOM_CODE_LEN,
                ));
            }
            _ => {}
        }

        opts
    }

    /// Recover the next chat sequence number.
    ///
    /// The sequence is global but keys are prefixed by room code, so the
    /// lexicographically last key is not necessarily the newest entry; a
    /// full scan of the chats CF is required. Chat volume keeps this cheap.
    fn recover_chat_sequence(db: &DBWithThreadMode<SingleThreaded>) -> u64 {
        let cf = match db.cf_handle(CF_CHATS) {
            Some(cf) => cf,
            None => return 0,
        };

        let mut next = 0u64;
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let Ok((key, _)) = item else { break };
            if key.len() == CHAT_KEY_LEN {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key[ROOM_CODE_LEN..]);
                next = next.max(u64::from_be_bytes(buf) + 1);
            }
        }
        next
    }

    // ─── Room Records ─────────────────────────────────────────────────

    /// Record that a room exists and is active.
    ///
    /// Idempotent: re-upserting an existing room keeps its original
    /// creation timestamp and only flips it back to active.
    pub fn upsert_room(&self, code: &RoomCode, created_at_ms: u64) -> Result<(), StoreError> {
        let cf = self.cf(CF_ROOMS)?;

        let record = match self.db.get_cf(&cf, code.as_bytes())? {
            Some(bytes) => {
                let mut existing = RoomRecord::decode(&bytes)?;
                existing.active = true;
                existing
            }
            None => RoomRecord {
                code: code.as_str().to_string(),
                created_at_ms,
                active: true,
            },
        };

        self.put(&cf, code.as_bytes(), &record.encode()?)
    }

    /// Mark a room inactive after its last connection left.
    ///
    /// The record is kept, never deleted; a missing record is a no-op
    /// (the room was created before storage was enabled, or never joined).
    pub fn mark_inactive(&self, code: &RoomCode) -> Result<(), StoreError> {
        let cf = self.cf(CF_ROOMS)?;

        let Some(bytes) = self.db.get_cf(&cf, code.as_bytes())? else {
            log::debug!("No durable record for room {code}, skipping deactivation");
            return Ok(());
        };
        let mut record = RoomRecord::decode(&bytes)?;
        record.active = false;

        self.put(&cf, code.as_bytes(), &record.encode()?)
    }

    /// Load a single room record.
    pub fn room_record(&self, code: &RoomCode) -> Result<RoomRecord, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(&cf, code.as_bytes())? {
            Some(bytes) => RoomRecord::decode(&bytes),
            None => Err(StoreError::NotFound(code.as_str().to_string())),
        }
    }

    /// List every room ever recorded.
    pub fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut records = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            records.push(RoomRecord::decode(&value)?);
        }

        Ok(records)
    }

    /// List rooms whose durable record is marked active.
    pub fn list_active_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(self.list_rooms()?.into_iter().filter(|r| r.active).collect())
    }

    // ─── Chat History ─────────────────────────────────────────────────

    /// Append a chat entry. Returns the sequence number assigned.
    pub fn append_chat(&self, code: &RoomCode, entry: &ChatEntry) -> Result<u64, StoreError> {
        let cf = self.cf(CF_CHATS)?;
        let seq = self.chat_sequence.fetch_add(1, Ordering::SeqCst);
        let key = Self::chat_key(code, seq);

        let value = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        self.put(&cf, &key, &value)?;
        Ok(seq)
    }

    /// Load a room's chat history in append order.
    pub fn chat_history(&self, code: &RoomCode) -> Result<Vec<ChatEntry>, StoreError> {
        let cf = self.cf(CF_CHATS)?;
        let start_key = Self::chat_key(code, 0);

        let mut entries = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            // Stop once past this room's key prefix
            if key.len() != CHAT_KEY_LEN || &key[..ROOM_CODE_LEN] != code.as_bytes() {
                break;
            }

            let (entry, _): (ChatEntry, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Number of chat entries stored for a room.
    pub fn chat_count(&self, code: &RoomCode) -> Result<usize, StoreError> {
        Ok(self.chat_history(code)?.len())
    }

    // ─── Internals ────────────────────────────────────────────────────

    fn put(&self, cf: &rocksdb::ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, key, value, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// Build a chat key: room code (6 bytes) + sequence (8 bytes big-endian).
    fn chat_key(code: &RoomCode, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(CHAT_KEY_LEN);
        key.extend_from_slice(code.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Detect available CPU parallelism for RocksDB background threads.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (RoomStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RoomStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        (store, dir)
    }

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    fn entry(user: &str, text: &str, ts: u64) -> ChatEntry {
        ChatEntry {
            user: user.to_string(),
            text: text.to_string(),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_upsert_and_load_room() {
        let (store, _dir) = test_store();
        let code = code("ROOM01");

        store.upsert_room(&code, 1000).unwrap();
        let record = store.room_record(&code).unwrap();
        assert_eq!(record.code, "ROOM01");
        assert_eq!(record.created_at_ms, 1000);
        assert!(record.active);
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let (store, _dir) = test_store();
        let code = code("ROOM01");

        store.upsert_room(&code, 1000).unwrap();
        store.mark_inactive(&code).unwrap();
        // Re-activation on a later session keeps the original timestamp.
        store.upsert_room(&code, 9999).unwrap();

        let record = store.room_record(&code).unwrap();
        assert_eq!(record.created_at_ms, 1000);
        assert!(record.active);
    }

    #[test]
    fn test_mark_inactive_keeps_record() {
        let (store, _dir) = test_store();
        let code = code("ROOM01");

        store.upsert_room(&code, 1000).unwrap();
        store.mark_inactive(&code).unwrap();

        let record = store.room_record(&code).unwrap();
        assert!(!record.active);
        assert_eq!(store.list_rooms().unwrap().len(), 1);
        assert!(store.list_active_rooms().unwrap().is_empty());
    }

    #[test]
    fn test_mark_inactive_missing_record_is_noop() {
        let (store, _dir) = test_store();
        store.mark_inactive(&code("GHOST1")).unwrap();
    }

    #[test]
    fn test_room_record_not_found() {
        let (store, _dir) = test_store();
        match store.room_record(&code("NOPE00")) {
            Err(StoreError::NotFound(c)) => assert_eq!(c, "NOPE00"),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_chat_history_in_append_order() {
        let (store, _dir) = test_store();
        let code = code("ROOM01");

        for i in 0..10u64 {
            store.append_chat(&code, &entry("SwiftFox", &i.to_string(), i)).unwrap();
        }

        let history = store.chat_history(&code).unwrap();
        assert_eq!(history.len(), 10);
        for (i, e) in history.iter().enumerate() {
            assert_eq!(e.text, i.to_string());
        }
    }

    #[test]
    fn test_chat_history_isolated_per_room() {
        let (store, _dir) = test_store();
        let room_a = code("AAAAAA");
        let room_b = code("AAAAAB");

        store.append_chat(&room_a, &entry("SwiftFox", "in a", 1)).unwrap();
        store.append_chat(&room_b, &entry("NeonOwl", "in b", 2)).unwrap();
        store.append_chat(&room_a, &entry("SwiftFox", "a again", 3)).unwrap();

        let history_a = store.chat_history(&room_a).unwrap();
        assert_eq!(history_a.len(), 2);
        assert_eq!(history_a[0].text, "in a");
        assert_eq!(history_a[1].text, "a again");

        let history_b = store.chat_history(&room_b).unwrap();
        assert_eq!(history_b.len(), 1);
        assert_eq!(history_b[0].text, "in b");
    }

    #[test]
    fn test_chat_history_empty_room() {
        let (store, _dir) = test_store();
        assert!(store.chat_history(&code("EMPTY0")).unwrap().is_empty());
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let room = code("ROOM01");

        {
            let store = RoomStore::open(StoreConfig::for_testing(dir.path())).unwrap();
            let s0 = store.append_chat(&room, &entry("SwiftFox", "one", 1)).unwrap();
            let s1 = store.append_chat(&room, &entry("SwiftFox", "two", 2)).unwrap();
            assert_eq!((s0, s1), (0, 1));
        }

        let store = RoomStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        let s2 = store.append_chat(&room, &entry("SwiftFox", "three", 3)).unwrap();
        assert_eq!(s2, 2);

        let history = store.chat_history(&room).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].text, "three");
    }

    #[test]
    fn test_rooms_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RoomStore::open(StoreConfig::for_testing(dir.path())).unwrap();
            store.upsert_room(&code("ROOM01"), 1).unwrap();
            store.upsert_room(&code("ROOM02"), 2).unwrap();
            store.mark_inactive(&code("ROOM02")).unwrap();
        }

        let store = RoomStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.list_rooms().unwrap().len(), 2);
        let active = store.list_active_rooms().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].code, "ROOM01");
    }
}
