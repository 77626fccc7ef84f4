use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_confidence::EffectiveConfidence;
use warden_core::{ExecutionId, Fingerprint, Result};
use warden_delegation::ClassStatus;
use warden_scheduler::{SchedulerJob, WindowDecision, WindowExplanation};

use crate::pipeline::Pipeline;

/// One entry in the ranked operator queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub kind: QueueKind,
    pub fingerprint: Fingerprint,
    pub description: String,
    /// Effective (decayed) confidence at query time; the first tie-break.
    pub confidence: f64,
    /// When this item started waiting; the second tie-break (oldest wins).
    pub waiting_since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Fixed priority ordering of the queue, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    UnacknowledgedRegression,
    ApprovalRequired,
    AutoRunnableJob,
    WaitingJob,
}

impl QueueKind {
    fn rank(self) -> u8 {
        match self {
            Self::UnacknowledgedRegression => 0,
            Self::ApprovalRequired => 1,
            Self::AutoRunnableJob => 2,
            Self::WaitingJob => 3,
        }
    }
}

impl Pipeline {
    /// Operator query: every delegated class with its activation state.
    pub fn active_classes(&self) -> Result<Vec<ClassStatus>> {
        self.delegation().class_statuses()
    }

    /// Operator query: decayed confidence for one fingerprint.
    pub fn effective_confidence(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> EffectiveConfidence {
        self.confidence().effective(fingerprint, now)
    }

    /// Operator query: would this job run now, and why / why not?
    pub fn explain_schedule(
        &self,
        job: &SchedulerJob,
        now: DateTime<Utc>,
    ) -> Result<WindowExplanation> {
        self.scheduler().explain(job, now)
    }

    /// Operator query: everything waiting for attention, ranked.
    /// Unacknowledged regressions first, then approvals, then auto-runnable
    /// jobs, then the rest; ties break by confidence descending, then by
    /// oldest wait.
    pub fn pending_queue(
        &self,
        jobs: &[SchedulerJob],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>> {
        let mut items = Vec::new();

        for check in self.confidence().unacknowledged_regressions()? {
            let effective = self.confidence().effective(&check.fingerprint, now);
            items.push(QueueItem {
                kind: QueueKind::UnacknowledgedRegression,
                fingerprint: check.fingerprint.clone(),
                description: format!("confidence regression on {}", check.command),
                confidence: effective.decayed,
                waiting_since: check.evaluated_at,
                execution_id: None,
                job_id: None,
            });
        }

        for record in self.approvals().pending()? {
            let effective = self.confidence().effective(&record.fingerprint, now);
            items.push(QueueItem {
                kind: QueueKind::ApprovalRequired,
                fingerprint: record.fingerprint.clone(),
                description: format!("approval required: {}", record.plan.goal),
                confidence: effective.decayed,
                waiting_since: record.created_at,
                execution_id: Some(record.execution_id),
                job_id: None,
            });
        }

        for job in jobs {
            let WindowDecision::Run { window_start, .. } = self.scheduler().evaluate(job, now)?
            else {
                continue;
            };
            let fingerprint = job.command.fingerprint();
            let effective = self.confidence().effective(&fingerprint, now);
            let auto = self
                .delegation()
                .eligibility(&job.command, now)?
                .is_auto_run();
            items.push(QueueItem {
                kind: if auto {
                    QueueKind::AutoRunnableJob
                } else {
                    QueueKind::WaitingJob
                },
                fingerprint,
                description: format!("scheduled job {}", job.job_id),
                confidence: effective.decayed,
                waiting_since: window_start,
                execution_id: None,
                job_id: Some(job.job_id.clone()),
            });
        }

        items.sort_by(|a, b| {
            a.kind
                .rank()
                .cmp(&b.kind.rank())
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.waiting_since.cmp(&b.waiting_since))
        });
        Ok(items)
    }
}
