//! # warden-governor
//!
//! The Governor gates everything downstream: a continuously-refilling token
//! bucket per command fingerprint, overridden by a time-boxed circuit
//! breaker while open. Decisions are typed values, never errors, so callers
//! can branch deterministically and record the outcome in a receipt.

pub mod breaker;
pub mod governor;

pub use breaker::{BreachCounts, BreachKind, CircuitBreakerState};
pub use governor::{Governor, GovernorCounter, GovernorDecision, ThrottleCode};
