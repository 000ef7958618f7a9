//! Durable key-value persistence for conversations.
//!
//! Each conversation is stored under its id as one binary blob wrapped in a
//! versioned envelope. On hydration, blobs whose `schema_version` differs from
//! `SNAPSHOT_SCHEMA_VERSION` (or that fail to decode) are discarded and the
//! conversation is rebuilt from whatever the session layer delivers next.

use crate::models::Message;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Increment whenever `ConversationSnapshot` or `Message` changes shape.
/// Older blobs are silently dropped on the next hydration.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist {failed} conversation(s); last error: {last}")]
    Flush { failed: usize, last: Box<StoreError> },
}

/// Opaque durable storage keyed by conversation id.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// What gets persisted for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub last_seen: u64,
    /// Messages in index order.
    pub messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    schema_version: u32,
    /// Unix seconds when this blob was written.
    saved_at: u64,
    snapshot: ConversationSnapshot,
}

/// Leading field of every envelope, read before committing to a full decode.
#[derive(Deserialize)]
struct EnvelopeHeader {
    schema_version: u32,
}

pub fn encode_snapshot(snapshot: ConversationSnapshot) -> Result<Vec<u8>, StoreError> {
    let saved_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let envelope = SnapshotEnvelope {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        saved_at,
        snapshot,
    };

    Ok(bincode::serialize(&envelope)?)
}

/// Decode a persisted blob. Returns None for corrupt data or a schema mismatch.
pub fn decode_snapshot(bytes: &[u8]) -> Option<ConversationSnapshot> {
    let header: EnvelopeHeader = bincode::deserialize(bytes).ok()?;
    if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
        tracing::info!(
            "persistence: schema version mismatch (stored={} current={}); discarding",
            header.schema_version,
            SNAPSHOT_SCHEMA_VERSION
        );
        return None;
    }

    match bincode::deserialize::<SnapshotEnvelope>(bytes) {
        Ok(envelope) => Some(envelope.snapshot),
        Err(e) => {
            tracing::warn!("persistence: corrupt conversation blob; discarding: {}", e);
            None
        }
    }
}

/// SQLite-backed key-value store, one row per conversation.
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                blob BLOB NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl KvBackend for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock();
        let blob = conn
            .query_row(
                "SELECT blob FROM conversations WHERE id = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO conversations (id, blob) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET blob = excluded.blob",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM conversations WHERE id = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM conversations ORDER BY id")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn.lock().execute("DELETE FROM conversations", [])?;
        Ok(())
    }
}

/// Volatile backend for tests and `persist = false` configurations.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }
}
