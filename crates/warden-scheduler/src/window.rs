use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use warden_config::JobConfig;
use warden_core::{
    short_hash, AutonomyMode, NormalizedCommand, Result, WardenError,
};
use warden_store::{family, get_doc, insert_doc, DocumentStore, KeyLocks};

/// Hex length of a window id.
const WINDOW_ID_LEN: usize = 16;

/// A recurring job. Config-supplied and read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerJob {
    pub job_id: String,
    pub command: NormalizedCommand,
    /// Cron expression (seconds-resolution, e.g. "0 0 0 * * *" for daily
    /// at midnight).
    pub schedule: String,
    pub mode: AutonomyMode,
}

impl From<&JobConfig> for SchedulerJob {
    fn from(config: &JobConfig) -> Self {
        Self {
            job_id: config.job_id.clone(),
            command: NormalizedCommand::new(&config.command, &config.domain_scope),
            schedule: config.schedule.clone(),
            mode: AutonomyMode::from_u8(config.mode),
        }
    }
}

/// One executed window. At most one entry exists per (job_id, window_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerHistoryEntry {
    pub job_id: String,
    pub window_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: WindowOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOutcome {
    Success,
    Skipped,
    Failed,
}

/// What the evaluator says about a job right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WindowDecision {
    /// The current window has not run yet.
    Run {
        window_id: String,
        window_start: DateTime<Utc>,
    },
    /// The current window already has an executed entry.
    AlreadyRan { window_id: String },
    /// No occurrence of the rule has come due within the lookback horizon.
    NotDue,
}

/// Operator answer to "would this job run now?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowExplanation {
    pub job_id: String,
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    pub already_ran: bool,
    pub would_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_occurrence: Option<DateTime<Utc>>,
}

/// Compute the most recent occurrence of the rule at or before `at`.
///
/// The cron iterator only walks forward, so we scan from widening
/// lookbacks and keep the last occurrence that is not in the future. A
/// rule whose last occurrence is more than a year old reads as never due.
pub fn window_start(schedule: &str, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let parsed = Schedule::from_str(schedule).map_err(|e| WardenError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason: e.to_string(),
    })?;

    const LOOKBACK_HOURS: [i64; 5] = [1, 24, 24 * 7, 24 * 35, 24 * 366];
    for hours in LOOKBACK_HOURS {
        let from = at - chrono::Duration::hours(hours);
        let mut last = None;
        for occurrence in parsed.after(&from) {
            if occurrence > at {
                break;
            }
            last = Some(occurrence);
        }
        if last.is_some() {
            return Ok(last);
        }
    }
    Ok(None)
}

/// The id for one (job, window start) pair:
/// `hash(job_id + ":" + window_start_rfc3339)[0..16]`.
pub fn window_id(job_id: &str, window_start: DateTime<Utc>) -> String {
    short_hash(&format!("{job_id}:{}", window_start.to_rfc3339()), WINDOW_ID_LEN)
}

/// Evaluates windows and owns the run-once history.
pub struct WindowEvaluator {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyLocks>,
}

impl WindowEvaluator {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// True iff no executed entry exists for this exact (job_id, window_id).
    pub fn should_run(&self, job_id: &str, window_id: &str) -> Result<bool> {
        Ok(self.history_entry(job_id, window_id)?.is_none())
    }

    /// Where does the job stand at `now`?
    pub fn evaluate(&self, job: &SchedulerJob, now: DateTime<Utc>) -> Result<WindowDecision> {
        let Some(start) = window_start(&job.schedule, now)? else {
            return Ok(WindowDecision::NotDue);
        };
        let id = window_id(&job.job_id, start);
        if self.should_run(&job.job_id, &id)? {
            Ok(WindowDecision::Run {
                window_id: id,
                window_start: start,
            })
        } else {
            debug!(job_id = %job.job_id, window_id = %id, "window already ran");
            Ok(WindowDecision::AlreadyRan { window_id: id })
        }
    }

    /// Write the single history entry for an executed window. A second
    /// write for the same pair fails with `DuplicateWindow`.
    pub fn record_run(
        &self,
        job_id: &str,
        window_id: &str,
        started_at: DateTime<Utc>,
        outcome: WindowOutcome,
    ) -> Result<SchedulerHistoryEntry> {
        let entry = SchedulerHistoryEntry {
            job_id: job_id.to_string(),
            window_id: window_id.to_string(),
            started_at,
            outcome,
        };
        let key = history_key(job_id, window_id);
        self.locks
            .with_lock(family::SCHEDULER_HISTORY, &key, || {
                let created = insert_doc(&*self.store, family::SCHEDULER_HISTORY, &key, &entry)?;
                if !created {
                    return Err(WardenError::DuplicateWindow {
                        job_id: job_id.to_string(),
                        window_id: window_id.to_string(),
                    });
                }
                Ok(())
            })?;
        Ok(entry)
    }

    /// The executed entry for a window, if any.
    pub fn history_entry(
        &self,
        job_id: &str,
        window_id: &str,
    ) -> Result<Option<SchedulerHistoryEntry>> {
        get_doc(
            &*self.store,
            family::SCHEDULER_HISTORY,
            &history_key(job_id, window_id),
        )
    }

    /// Operator query: would this job run now, and why / why not?
    pub fn explain(&self, job: &SchedulerJob, now: DateTime<Utc>) -> Result<WindowExplanation> {
        let start = window_start(&job.schedule, now)?;
        let id = start.map(|s| window_id(&job.job_id, s));
        let already_ran = match &id {
            Some(id) => !self.should_run(&job.job_id, id)?,
            None => false,
        };
        let parsed = Schedule::from_str(&job.schedule).map_err(|e| WardenError::InvalidSchedule {
            schedule: job.schedule.clone(),
            reason: e.to_string(),
        })?;
        let next_occurrence = parsed.after(&now).next();
        Ok(WindowExplanation {
            job_id: job.job_id.clone(),
            schedule: job.schedule.clone(),
            window_start: start,
            window_id: id.clone(),
            already_ran,
            would_run: id.is_some() && !already_ran,
            next_occurrence,
        })
    }
}

fn history_key(job_id: &str, window_id: &str) -> String {
    format!("{job_id}:{window_id}")
}
