//! # warden-approval
//!
//! The approval lifecycle for write-capable plans:
//! `NONE → AWAITING_APPROVAL → {APPROVED, REJECTED}`, both branches
//! terminal. The plan hash is frozen when a record is created and must be
//! reproduced byte-identically on every later approve or resume — the human
//! approved *exactly* this plan, and nothing else ever executes against the
//! approval.

pub mod machine;
pub mod plan;

pub use machine::{ApprovalRecord, ApprovalStatus, Approvals};
pub use plan::{ExecutionPlan, PlanStep, StepPrestate};
