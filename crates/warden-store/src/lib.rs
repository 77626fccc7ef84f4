//! # warden-store
//!
//! Persistence for the governance core: a keyed document store over SQLite,
//! a per-key lock registry that serializes read-modify-write sequences, and
//! the append-only receipt ledger.
//!
//! Two storage shapes cover every entity:
//! - **documents**: one mutable body per (family, key) — governor counters,
//!   breaker state, approval records, scheduler history.
//! - **records**: versioned by append with a per-key monotonic `seq` —
//!   confidence artifacts, regression checks, delegated class definitions,
//!   delegation events, promotions. "Latest" is always the highest seq,
//!   never a wall-clock timestamp.

pub mod ledger;
pub mod locks;
pub mod store;

pub use ledger::ReceiptLedger;
pub use locks::KeyLocks;
pub use store::{
    family, get_doc, insert_doc, latest_record, put_doc, push_record, record_history,
    DocumentStore, SqliteStore, VersionedRecord,
};
