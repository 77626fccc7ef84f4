use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::warn;

use warden_core::{content_hash, ExecutionId, Receipt, Result, WardenError};

use crate::store::SqliteStore;

/// The append-only receipt ledger — the single source of truth for audit
/// and operator-facing views. There is no update or delete operation;
/// "latest receipt for an execution" is resolved by scanning backward.
#[derive(Clone)]
pub struct ReceiptLedger {
    db: Arc<Mutex<Connection>>,
}

impl ReceiptLedger {
    /// Attach the ledger to an open store. Both share one database so a
    /// receipt and the state change it records commit to the same file.
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            db: store.connection(),
        }
    }

    /// Append one receipt. Returns the ledger line number.
    pub fn append(&self, receipt: &Receipt) -> Result<u64> {
        let body = serde_json::to_string(receipt)?;
        let checksum = content_hash(body.as_bytes());
        let db = self.db.lock();
        db.execute(
            "INSERT INTO receipts (execution_id, fingerprint, body, checksum, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                receipt.execution_id.to_string(),
                receipt.fingerprint,
                body,
                checksum,
                receipt.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WardenError::Store(e.to_string()))?;
        Ok(db.last_insert_rowid() as u64)
    }

    /// Number of lines in the ledger.
    pub fn len(&self) -> Result<u64> {
        let db = self.db.lock();
        db.query_row("SELECT COUNT(*) FROM receipts", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(|e| WardenError::Store(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The most recent `limit` receipts, newest first.
    pub fn tail(&self, limit: usize) -> Result<Vec<Receipt>> {
        self.query(
            "SELECT body FROM receipts ORDER BY id DESC LIMIT ?1",
            rusqlite::params![limit as i64],
        )
    }

    /// Full history, oldest first.
    pub fn scan(&self) -> Result<Vec<Receipt>> {
        self.query("SELECT body FROM receipts ORDER BY id ASC", [])
    }

    /// Latest receipt for one execution, resolved by backward scan.
    pub fn latest_for_execution(&self, execution_id: ExecutionId) -> Result<Option<Receipt>> {
        Ok(self
            .query(
                "SELECT body FROM receipts WHERE execution_id = ?1 ORDER BY id DESC LIMIT 1",
                rusqlite::params![execution_id.to_string()],
            )?
            .into_iter()
            .next())
    }

    /// Receipts for one fingerprint, newest first.
    pub fn for_fingerprint(&self, fingerprint: &str, limit: usize) -> Result<Vec<Receipt>> {
        self.query(
            "SELECT body FROM receipts WHERE fingerprint = ?1 ORDER BY id DESC LIMIT ?2",
            rusqlite::params![fingerprint, limit as i64],
        )
    }

    /// Re-hash every line against its stored checksum. Returns the ids of
    /// lines whose bytes no longer match — any entry here means the ledger
    /// was altered outside the core.
    pub fn verify(&self) -> Result<Vec<u64>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT id, body, checksum FROM receipts ORDER BY id ASC")
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let rows: Vec<(i64, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        let mut bad = Vec::new();
        for (id, body, checksum) in rows {
            if content_hash(body.as_bytes()) != checksum {
                warn!(line = id, "receipt checksum mismatch");
                bad.push(id as u64);
            }
        }
        Ok(bad)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Receipt>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(sql)
            .map_err(|e| WardenError::Store(e.to_string()))?;
        let bodies: Vec<String> = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(|e| WardenError::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        bodies
            .into_iter()
            .map(|json| serde_json::from_str(&json).map_err(WardenError::from))
            .collect()
    }
}
