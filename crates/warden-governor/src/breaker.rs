use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::Fingerprint;

/// A time-boxed hard stop for one fingerprint. Overrides the token bucket
/// while `open_until` lies in the future; expires naturally after that —
/// there is no half-open probe state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub fingerprint: Fingerprint,
    pub open_until: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub reason: String,
    pub breach_counts: BreachCounts,
}

impl CircuitBreakerState {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.open_until
    }
}

/// What tripped (or is accumulating toward tripping) a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
    PolicyDenial,
    Rollback,
    ConfidenceRegression,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachCounts {
    pub policy_denials: u32,
    pub rollbacks: u32,
    pub confidence_regressions: u32,
}

impl BreachCounts {
    pub fn bump(&mut self, kind: BreachKind) {
        match kind {
            BreachKind::PolicyDenial => self.policy_denials += 1,
            BreachKind::Rollback => self.rollbacks += 1,
            BreachKind::ConfidenceRegression => self.confidence_regressions += 1,
        }
    }
}

/// Rolling-hour breach accounting for one fingerprint. The window resets
/// in place once it ages out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachWindow {
    pub fingerprint: Fingerprint,
    pub window_start: DateTime<Utc>,
    pub counts: BreachCounts,
}

impl BreachWindow {
    pub fn fresh(fingerprint: Fingerprint, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            window_start: now,
            counts: BreachCounts::default(),
        }
    }

    /// Reset if `now` has moved past the hour window.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.window_start >= chrono::Duration::hours(1) {
            self.window_start = now;
            self.counts = BreachCounts::default();
        }
    }
}
