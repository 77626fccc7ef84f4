use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — maps to `warden.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub store: StoreConfig,
    pub governor: GovernorConfig,
    pub breaker: BreakerConfig,
    pub confidence: ConfidenceConfig,
    pub logging: LoggingConfig,
    /// Recurring jobs. Read-only to the core; the scheduler evaluates
    /// their windows but never edits the definitions.
    pub jobs: Vec<JobConfig>,
}

impl WardenConfig {
    /// Validate the configuration. Returns warnings on success; an error
    /// message means the config is unusable.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.governor.capacity <= 0.0 {
            return Err("governor.capacity must be positive".into());
        }
        if self.governor.cost_per_run <= 0.0 {
            return Err("governor.cost_per_run must be positive".into());
        }
        if self.governor.refill_per_minute < 0.0 {
            return Err("governor.refill_per_minute must not be negative".into());
        }
        if self.governor.refill_per_minute == 0.0 {
            warnings.push(
                "governor.refill_per_minute is 0 — exhausted buckets will never recover".into(),
            );
        }
        if self.governor.cost_per_run > self.governor.capacity {
            return Err("governor.cost_per_run exceeds capacity; nothing would ever run".into());
        }

        if self.breaker.open_duration_secs == 0 {
            warnings.push("breaker.open_duration_secs is 0 — breaker opens expire instantly".into());
        }

        if self.confidence.half_life_hours <= 0.0 {
            return Err("confidence.half_life_hours must be positive".into());
        }
        if self.confidence.medium_band_min >= self.confidence.high_band_min {
            return Err("confidence.medium_band_min must be below high_band_min".into());
        }
        if self.confidence.minor_regression_delta < 0.0 {
            return Err("confidence.minor_regression_delta must not be negative".into());
        }

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if job.job_id.is_empty() {
                return Err("jobs entry with empty job_id".into());
            }
            if !seen.insert(&job.job_id) {
                return Err(format!("duplicate job_id: {}", job.job_id));
            }
        }

        Ok(warnings)
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding all keyed state and the ledger.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warden.db"),
        }
    }
}

// ── Governor ───────────────────────────────────────────────────

/// Token-bucket parameters, shared by every fingerprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Maximum tokens in a bucket (burst size).
    pub capacity: f64,
    /// Tokens refilled per minute.
    pub refill_per_minute: f64,
    /// Tokens debited per allowed run.
    pub cost_per_run: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_minute: 1.0,
            cost_per_run: 1.0,
        }
    }
}

// ── Circuit breaker ────────────────────────────────────────────

/// Breach thresholds are counted per fingerprint over a rolling hour;
/// crossing any of them opens the breaker for `open_duration_secs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub open_duration_secs: u64,
    pub max_policy_denials_per_hour: u32,
    pub max_rollbacks_per_hour: u32,
    pub max_confidence_regressions_per_hour: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            open_duration_secs: 3600,
            max_policy_denials_per_hour: 5,
            max_rollbacks_per_hour: 3,
            max_confidence_regressions_per_hour: 2,
        }
    }
}

// ── Confidence ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Half-life of the exponential score decay, in hours.
    pub half_life_hours: f64,
    /// Scores at or above this are MEDIUM.
    pub medium_band_min: f64,
    /// Scores at or above this are HIGH.
    pub high_band_min: f64,
    /// Negative deltas smaller than this are noise, not regressions.
    pub minor_regression_delta: f64,
    /// Version tag stamped on every captured artifact.
    pub policy_version: String,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 72.0,
            medium_band_min: 50.0,
            high_band_min: 80.0,
            minor_regression_delta: 5.0,
            policy_version: "policy-v1".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "warden_governor=debug,info".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Scheduled jobs ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: String,
    /// Normalized command text the job submits each window.
    pub command: String,
    #[serde(default)]
    pub domain_scope: String,
    /// Cron expression, e.g. "0 0 0 * * *" for daily at midnight.
    pub schedule: String,
    /// Autonomy mode the job runs under: 0–3 (read_only..auto_run).
    #[serde(default)]
    pub mode: u8,
}
