use thiserror::Error;

/// Unified error type for the entire Warden core.
///
/// Advisory outcomes — throttled, approval required, denied — are NOT
/// errors; they are typed decision values returned by the components that
/// produce them, so callers can branch deterministically and write a
/// receipt. This enum covers the genuinely exceptional paths.
#[derive(Error, Debug)]
pub enum WardenError {
    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    #[error("corrupt record in {family}/{key}: {reason}")]
    CorruptRecord {
        family: String,
        key: String,
        reason: String,
    },

    // ── Approval errors ────────────────────────────────────────
    #[error("plan hash mismatch for execution {execution_id}: approved {expected}, got {got}")]
    PlanHashMismatch {
        execution_id: String,
        expected: String,
        got: String,
    },

    #[error("no approval record for execution {0}")]
    ApprovalNotFound(String),

    #[error("invalid approval transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: String,
        from: String,
        to: String,
    },

    // ── Delegation errors ──────────────────────────────────────
    #[error("unknown delegated class: {0}")]
    UnknownClass(String),

    #[error("missing definition for delegated class: {0}")]
    MissingDefinition(String),

    #[error("invalid delegation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // ── Scheduler errors ───────────────────────────────────────
    #[error("invalid schedule '{schedule}': {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("window {window_id} of job {job_id} already has an executed history entry")]
    DuplicateWindow { job_id: String, window_id: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
