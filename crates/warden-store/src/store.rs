use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use warden_core::{Result, WardenError};

/// Store family names. Each corresponds one-to-one with an entity of the
/// governance core's data model.
pub mod family {
    pub const GOVERNOR_COUNTERS: &str = "governor_counters";
    pub const BREAKER_STATE: &str = "governor_breakers";
    pub const BREACH_WINDOWS: &str = "governor_breaches";
    pub const APPROVALS: &str = "approvals";
    pub const CONFIDENCE_ARTIFACTS: &str = "confidence_artifacts";
    pub const REGRESSION_CHECKS: &str = "regression_checks";
    pub const DELEGATED_CLASSES: &str = "delegated_classes";
    pub const DELEGATION_EVENTS: &str = "delegation_events";
    pub const PROMOTIONS: &str = "promotions";
    pub const SCHEDULER_HISTORY: &str = "scheduler_history";
}

/// One version of an appended record.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Monotonic per-key logical sequence number, assigned by the store.
    pub seq: u64,
    pub body: Value,
}

/// The keyed document store every component persists through.
///
/// Implementations must serialize individual operations; multi-operation
/// read-modify-write sequences are serialized by callers via [`KeyLocks`].
pub trait DocumentStore: Send + Sync {
    /// Read the mutable document at (family, key).
    fn get(&self, family: &str, key: &str) -> Result<Option<Value>>;

    /// Write (insert or replace) the mutable document at (family, key).
    fn put(&self, family: &str, key: &str, body: &Value) -> Result<()>;

    /// Insert the document only if (family, key) is vacant. Returns false
    /// when an existing document was left untouched.
    fn insert(&self, family: &str, key: &str, body: &Value) -> Result<bool>;

    /// Append a new version under (family, key); returns the assigned seq.
    fn append(&self, family: &str, key: &str, body: &Value) -> Result<u64>;

    /// The highest-seq version under (family, key).
    fn latest(&self, family: &str, key: &str) -> Result<Option<VersionedRecord>>;

    /// Every version under (family, key), ascending by seq.
    fn history(&self, family: &str, key: &str) -> Result<Vec<VersionedRecord>>;

    /// All keys present in a family (documents and records combined).
    fn keys(&self, family: &str) -> Result<Vec<String>>;

    /// All mutable documents in a family.
    fn documents(&self, family: &str) -> Result<Vec<(String, Value)>>;

    /// The latest version for every key in a records family.
    fn latest_all(&self, family: &str) -> Result<Vec<(String, VersionedRecord)>>;
}

/// SQLite-backed store. A single connection behind a mutex serializes all
/// statements; WAL keeps concurrent readers cheap.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the store database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening warden store");

        let conn = Connection::open(path).map_err(|e| WardenError::Store(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WardenError::Store(e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                family TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (family, key)
            );

            CREATE TABLE IF NOT EXISTS records (
                family TEXT NOT NULL,
                key TEXT NOT NULL,
                seq INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (family, key, seq)
            );

            CREATE TABLE IF NOT EXISTS receipts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                body TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_key ON records(family, key);
            CREATE INDEX IF NOT EXISTS idx_receipts_execution ON receipts(execution_id);
            CREATE INDEX IF NOT EXISTS idx_receipts_fingerprint ON receipts(fingerprint);
            ",
        )
        .map_err(|e| WardenError::Store(e.to_string()))?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, family: &str, key: &str) -> Result<Option<Value>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT body FROM documents WHERE family = ?1 AND key = ?2")
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let raw: Option<String> = stmt
            .query_row(rusqlite::params![family, key], |row| row.get(0))
            .ok();
        match raw {
            Some(json) => {
                let body =
                    serde_json::from_str(&json).map_err(|e| WardenError::CorruptRecord {
                        family: family.to_string(),
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    fn put(&self, family: &str, key: &str, body: &Value) -> Result<()> {
        let db = self.db.lock();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO documents (family, key, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(family, key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
            rusqlite::params![family, key, body.to_string(), now],
        )
        .map_err(|e| WardenError::Store(e.to_string()))?;
        Ok(())
    }

    fn insert(&self, family: &str, key: &str, body: &Value) -> Result<bool> {
        let db = self.db.lock();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = db
            .execute(
                "INSERT OR IGNORE INTO documents (family, key, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![family, key, body.to_string(), now],
            )
            .map_err(|e| WardenError::Store(e.to_string()))?;
        Ok(changed > 0)
    }

    fn append(&self, family: &str, key: &str, body: &Value) -> Result<u64> {
        let db = self.db.lock();
        let now = chrono::Utc::now().to_rfc3339();
        // seq assignment and insert run in one transaction so two appends
        // can never claim the same number.
        let tx = db
            .unchecked_transaction()
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let next_seq: u64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM records WHERE family = ?1 AND key = ?2",
                rusqlite::params![family, key],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| WardenError::Store(e.to_string()))? as u64;
        tx.execute(
            "INSERT INTO records (family, key, seq, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![family, key, next_seq as i64, body.to_string(), now],
        )
        .map_err(|e| WardenError::Store(e.to_string()))?;
        tx.commit().map_err(|e| WardenError::Store(e.to_string()))?;
        Ok(next_seq)
    }

    fn latest(&self, family: &str, key: &str) -> Result<Option<VersionedRecord>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT seq, body FROM records
                 WHERE family = ?1 AND key = ?2
                 ORDER BY seq DESC LIMIT 1",
            )
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let row: Option<(i64, String)> = stmt
            .query_row(rusqlite::params![family, key], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .ok();
        row.map(|(seq, json)| parse_versioned(family, key, seq, &json))
            .transpose()
    }

    fn history(&self, family: &str, key: &str) -> Result<Vec<VersionedRecord>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT seq, body FROM records
                 WHERE family = ?1 AND key = ?2
                 ORDER BY seq ASC",
            )
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(rusqlite::params![family, key], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        rows.into_iter()
            .map(|(seq, json)| parse_versioned(family, key, seq, &json))
            .collect()
    }

    fn keys(&self, family: &str) -> Result<Vec<String>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT key FROM documents WHERE family = ?1
                 UNION
                 SELECT DISTINCT key FROM records WHERE family = ?1",
            )
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let keys = stmt
            .query_map(rusqlite::params![family], |row| row.get::<_, String>(0))
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }

    fn documents(&self, family: &str) -> Result<Vec<(String, Value)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT key, body FROM documents WHERE family = ?1")
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let rows: Vec<(String, String)> = stmt
            .query_map(rusqlite::params![family], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        rows.into_iter()
            .map(|(key, json)| {
                let body = serde_json::from_str(&json).map_err(|e| WardenError::CorruptRecord {
                    family: family.to_string(),
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
                Ok((key, body))
            })
            .collect()
    }

    fn latest_all(&self, family: &str) -> Result<Vec<(String, VersionedRecord)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT r.key, r.seq, r.body FROM records r
                 JOIN (SELECT key, MAX(seq) AS max_seq FROM records
                       WHERE family = ?1 GROUP BY key) latest
                 ON r.key = latest.key AND r.seq = latest.max_seq
                 WHERE r.family = ?1",
            )
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let rows: Vec<(String, i64, String)> = stmt
            .query_map(rusqlite::params![family], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        rows.into_iter()
            .map(|(key, seq, json)| {
                let record = parse_versioned(family, &key, seq, &json)?;
                Ok((key, record))
            })
            .collect()
    }
}

fn parse_versioned(family: &str, key: &str, seq: i64, json: &str) -> Result<VersionedRecord> {
    let body = serde_json::from_str(json).map_err(|e| WardenError::CorruptRecord {
        family: family.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(VersionedRecord {
        seq: seq as u64,
        body,
    })
}

// ── Typed helpers ──────────────────────────────────────────────

/// Read and deserialize a mutable document.
pub fn get_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(family, key)? {
        Some(body) => Ok(Some(serde_json::from_value(body)?)),
        None => Ok(None),
    }
}

/// Serialize and write a mutable document.
pub fn put_doc<T: Serialize>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
    doc: &T,
) -> Result<()> {
    store.put(family, key, &serde_json::to_value(doc)?)
}

/// Serialize and insert-if-vacant. Returns false when the key was taken.
pub fn insert_doc<T: Serialize>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
    doc: &T,
) -> Result<bool> {
    store.insert(family, key, &serde_json::to_value(doc)?)
}

/// Serialize and append a new version; returns the assigned seq.
pub fn push_record<T: Serialize>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
    record: &T,
) -> Result<u64> {
    store.append(family, key, &serde_json::to_value(record)?)
}

/// The latest version of a record, deserialized, with its seq.
pub fn latest_record<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
) -> Result<Option<(u64, T)>> {
    match store.latest(family, key)? {
        Some(v) => Ok(Some((v.seq, serde_json::from_value(v.body)?))),
        None => Ok(None),
    }
}

/// The full version history of a record key, ascending by seq.
pub fn record_history<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    family: &str,
    key: &str,
) -> Result<Vec<(u64, T)>> {
    store
        .history(family, key)?
        .into_iter()
        .map(|v| Ok((v.seq, serde_json::from_value(v.body)?)))
        .collect()
}
