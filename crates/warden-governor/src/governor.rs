use chrono::{DateTime, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use warden_config::{BreakerConfig, GovernorConfig};
use warden_core::{Fingerprint, Result};
use warden_store::{family, get_doc, put_doc, DocumentStore, KeyLocks};

use crate::breaker::{BreachCounts, BreachKind, BreachWindow, CircuitBreakerState};

/// Persisted token bucket for one fingerprint. Created lazily on first
/// check; mutated on every check; never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorCounter {
    pub fingerprint: Fingerprint,
    pub hour_bucket_start: DateTime<Utc>,
    pub tokens_remaining: f64,
    pub concurrent_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl GovernorCounter {
    fn full(fingerprint: Fingerprint, capacity: f64, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            hour_bucket_start: hour_start(now),
            tokens_remaining: capacity,
            concurrent_count: 0,
            updated_at: now,
        }
    }
}

/// Outcome of a governor check. Advisory backpressure, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GovernorDecision {
    Allowed,
    Throttled {
        code: ThrottleCode,
        reason: String,
        retry_at: DateTime<Utc>,
    },
}

impl GovernorDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleCode {
    TokenBucketEmpty,
    CircuitBreakerOpen,
}

/// The per-fingerprint rate limiter + circuit breaker.
///
/// Bucket parameters come from deployment config and apply to every
/// fingerprint; only the counters themselves are per key.
pub struct Governor {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyLocks>,
    config: GovernorConfig,
    breaker_config: BreakerConfig,
}

impl Governor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<KeyLocks>,
        config: GovernorConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            breaker_config,
        }
    }

    /// Gate one invocation. Breaker first — while open the token bucket is
    /// never touched; afterwards refill-then-debit against the bucket.
    pub fn check(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<GovernorDecision> {
        self.locks
            .with_lock(family::GOVERNOR_COUNTERS, fingerprint, || {
                if let Some(breaker) = self.breaker_state(fingerprint)
                    && breaker.is_open(now)
                {
                    debug!(fingerprint, until = %breaker.open_until, "circuit breaker open");
                    return Ok(GovernorDecision::Throttled {
                        code: ThrottleCode::CircuitBreakerOpen,
                        reason: breaker.reason.clone(),
                        retry_at: breaker.open_until,
                    });
                }

                let mut counter = self.load_counter(fingerprint, now);

                // Refill for elapsed time; a clock that moved backward is
                // clamped to zero elapsed so skew never inflates tokens.
                let elapsed_ms = (now - counter.updated_at).num_milliseconds().max(0) as f64;
                let refill_per_ms = self.config.refill_per_minute / 60_000.0;
                counter.tokens_remaining = (counter.tokens_remaining + elapsed_ms * refill_per_ms)
                    .min(self.config.capacity);
                counter.hour_bucket_start = hour_start(now);
                counter.updated_at = now;

                if counter.tokens_remaining >= self.config.cost_per_run {
                    counter.tokens_remaining -= self.config.cost_per_run;
                    counter.concurrent_count += 1;
                    put_doc(&*self.store, family::GOVERNOR_COUNTERS, fingerprint, &counter)?;
                    return Ok(GovernorDecision::Allowed);
                }

                // Persist the refilled-but-undebited counter so the next
                // check does not double-refill the same elapsed time.
                let deficit = self.config.cost_per_run - counter.tokens_remaining;
                put_doc(&*self.store, family::GOVERNOR_COUNTERS, fingerprint, &counter)?;

                let retry_ms = if refill_per_ms > 0.0 {
                    (deficit / refill_per_ms).ceil() as i64
                } else {
                    60_000
                };
                let retry_at = now + chrono::Duration::milliseconds(retry_ms);
                debug!(fingerprint, %retry_at, "token bucket empty");
                Ok(GovernorDecision::Throttled {
                    code: ThrottleCode::TokenBucketEmpty,
                    reason: format!(
                        "bucket empty: {:.2} tokens, {} needed",
                        counter.tokens_remaining, self.config.cost_per_run
                    ),
                    retry_at,
                })
            })
    }

    /// Release one concurrent slot after the external adapters finish.
    pub fn release(&self, fingerprint: &str) -> Result<()> {
        self.locks
            .with_lock(family::GOVERNOR_COUNTERS, fingerprint, || {
                let Some(mut counter) =
                    self.load_counter_opt(fingerprint)
                else {
                    return Ok(());
                };
                counter.concurrent_count = counter.concurrent_count.saturating_sub(1);
                put_doc(&*self.store, family::GOVERNOR_COUNTERS, fingerprint, &counter)
            })
    }

    /// Trip the breaker. Explicit, caller-invoked — `check` never opens a
    /// breaker on its own. Replaces any existing breaker state.
    pub fn open_breaker(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        duration: chrono::Duration,
        reason: impl Into<String>,
        breach_counts: BreachCounts,
    ) -> Result<CircuitBreakerState> {
        let state = CircuitBreakerState {
            fingerprint: fingerprint.to_string(),
            open_until: now + duration,
            opened_at: now,
            reason: reason.into(),
            breach_counts,
        };
        warn!(
            fingerprint,
            until = %state.open_until,
            reason = %state.reason,
            "circuit breaker opened"
        );
        put_doc(&*self.store, family::BREAKER_STATE, fingerprint, &state)?;
        Ok(state)
    }

    /// Record one breach in the fingerprint's rolling-hour window and open
    /// the breaker if a configured threshold is crossed. Returns the new
    /// breaker state when it opened.
    pub fn note_breach(
        &self,
        fingerprint: &str,
        kind: BreachKind,
        now: DateTime<Utc>,
    ) -> Result<Option<CircuitBreakerState>> {
        self.locks
            .with_lock(family::BREACH_WINDOWS, fingerprint, || {
                let mut window = match get_doc::<BreachWindow>(
                    &*self.store,
                    family::BREACH_WINDOWS,
                    fingerprint,
                ) {
                    Ok(Some(w)) => w,
                    Ok(None) => BreachWindow::fresh(fingerprint.to_string(), now),
                    Err(e) => {
                        warn!(fingerprint, error = %e, "corrupt breach window, starting fresh");
                        BreachWindow::fresh(fingerprint.to_string(), now)
                    }
                };
                window.roll(now);
                window.counts.bump(kind);
                put_doc(&*self.store, family::BREACH_WINDOWS, fingerprint, &window)?;

                let limits = &self.breaker_config;
                let tripped = window.counts.policy_denials >= limits.max_policy_denials_per_hour
                    || window.counts.rollbacks >= limits.max_rollbacks_per_hour
                    || window.counts.confidence_regressions
                        >= limits.max_confidence_regressions_per_hour;
                if !tripped {
                    return Ok(None);
                }

                let duration =
                    chrono::Duration::seconds(self.breaker_config.open_duration_secs as i64);
                let reason = format!(
                    "breach threshold crossed: {} policy denials, {} rollbacks, {} regressions in the last hour",
                    window.counts.policy_denials,
                    window.counts.rollbacks,
                    window.counts.confidence_regressions
                );
                self.open_breaker(fingerprint, now, duration, reason, window.counts)
                    .map(Some)
            })
    }

    /// Current breaker state, if any was ever recorded. Corrupt state reads
    /// as absent — the governor fails open.
    pub fn breaker_state(&self, fingerprint: &str) -> Option<CircuitBreakerState> {
        match get_doc(&*self.store, family::BREAKER_STATE, fingerprint) {
            Ok(state) => state,
            Err(e) => {
                warn!(fingerprint, error = %e, "corrupt breaker state, assuming closed");
                None
            }
        }
    }

    /// Current counter, if one exists.
    pub fn counter(&self, fingerprint: &str) -> Option<GovernorCounter> {
        self.load_counter_opt(fingerprint)
    }

    fn load_counter(&self, fingerprint: &str, now: DateTime<Utc>) -> GovernorCounter {
        self.load_counter_opt(fingerprint).unwrap_or_else(|| {
            GovernorCounter::full(fingerprint.to_string(), self.config.capacity, now)
        })
    }

    fn load_counter_opt(&self, fingerprint: &str) -> Option<GovernorCounter> {
        match get_doc(&*self.store, family::GOVERNOR_COUNTERS, fingerprint) {
            Ok(counter) => counter,
            Err(e) => {
                warn!(fingerprint, error = %e, "corrupt governor counter, assuming full bucket");
                None
            }
        }
    }
}

fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(chrono::Duration::hours(1)).unwrap_or(now)
}
