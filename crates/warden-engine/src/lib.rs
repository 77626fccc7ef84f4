//! # warden-engine
//!
//! The synchronous per-command pipeline: fingerprint → governor →
//! delegation (confidence-gated auto-run) → approval state machine, with
//! every outcome appended to the receipt ledger. Also the read side the
//! operator tooling consumes: class statuses, effective confidence,
//! scheduler explanations, and the ranked pending queue.

pub mod pipeline;
pub mod queries;

pub use pipeline::{
    CommandRequest, Decision, OutcomeReport, Pipeline, RunOutcome, ScheduledDecision,
};
pub use queries::{QueueItem, QueueKind};
