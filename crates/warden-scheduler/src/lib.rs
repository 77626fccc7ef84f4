//! # warden-scheduler
//!
//! Decides whether a recurring job's current time window has already run.
//! A window is one occurrence of the job's cron rule; its id hashes the
//! job id and the window start, so two invocations inside the same window
//! collide on the same id and the second one skips. That id check is the
//! entire idempotency mechanism for recurring jobs.

pub mod window;

pub use window::{
    SchedulerHistoryEntry, SchedulerJob, WindowDecision, WindowEvaluator, WindowExplanation,
    WindowOutcome,
};
