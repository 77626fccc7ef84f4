//! # warden-core
//!
//! Core types, errors, and identity primitives for the Warden governance
//! core. This crate defines the shared vocabulary used by every other crate
//! in the workspace: normalized commands, fingerprints, autonomy modes,
//! confidence bands, and the receipt records all components write.

pub mod command;
pub mod error;
pub mod fingerprint;
pub mod receipt;

pub use command::{
    AutonomyMode, Capability, ConfidenceAction, ConfidenceBand, ExecutionId, Fingerprint,
    NormalizedCommand, ThreadId,
};
pub use error::{Result, WardenError};
pub use fingerprint::{command_fingerprint, content_hash, promotion_fingerprint, short_hash};
pub use receipt::{ApprovalCode, ApprovalRequired, Receipt, ReceiptKind, ReceiptStatus};
