use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use warden_approval::{ApprovalRecord, Approvals, ExecutionPlan, StepPrestate};
use warden_config::WardenConfig;
use warden_confidence::{ConfidenceEngine, ConfidenceFeatures};
use warden_core::{
    ApprovalCode, AutonomyMode, ExecutionId, NormalizedCommand, Receipt, ReceiptKind,
    ReceiptStatus, Result, ThreadId,
};
use warden_delegation::{DelegationDecision, DelegationSupervisor};
use warden_governor::{BreachKind, Governor, GovernorDecision, ThrottleCode};
use warden_scheduler::{SchedulerJob, WindowDecision, WindowEvaluator, WindowOutcome};
use warden_store::{KeyLocks, ReceiptLedger, SqliteStore};

/// One command entering the pipeline, already normalized and planned by
/// the external collaborators.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: NormalizedCommand,
    pub plan: ExecutionPlan,
    /// Pre-execution snapshots per write step, captured by the caller.
    pub prestates: BTreeMap<String, StepPrestate>,
    /// The autonomy mode this invocation runs under.
    pub mode: AutonomyMode,
    pub thread_id: Option<ThreadId>,
    /// Command for interactive submissions, ScheduledRun for jobs.
    pub kind: ReceiptKind,
}

/// The pipeline's answer for one command. Exactly one receipt is appended
/// per decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// A live, promoted, confidence-qualified delegated class matched.
    AutoRun {
        execution_id: ExecutionId,
        class_id: String,
    },
    /// Read-only plan, no gate to clear.
    Allowed { execution_id: ExecutionId },
    /// Parked in the approval queue.
    ApprovalRequired {
        execution_id: ExecutionId,
        code: ApprovalCode,
    },
    /// Governor backpressure; retry after `retry_at`.
    Throttled {
        code: ThrottleCode,
        reason: String,
        retry_at: DateTime<Utc>,
    },
    /// Hard policy stop.
    Denied { reason: String },
}

/// What actually happened once the external adapters ran a plan.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub execution_id: ExecutionId,
    pub command: NormalizedCommand,
    pub kind: ReceiptKind,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub thread_id: Option<ThreadId>,
    pub plan_hash: Option<String>,
    /// Post-run policy-evaluation features for the confidence capture.
    pub features: ConfidenceFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    RolledBack,
}

/// Outcome of a scheduled invocation's window evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScheduledDecision {
    /// The window is fresh; the command went through the pipeline.
    Evaluated {
        window_id: String,
        window_start: DateTime<Utc>,
        decision: Decision,
    },
    /// The window already ran; nothing was submitted.
    Skipped { window_id: String },
    /// No occurrence has come due.
    NotDue,
}

/// The governance core, fully wired over one store.
pub struct Pipeline {
    ledger: ReceiptLedger,
    governor: Governor,
    confidence: Arc<ConfidenceEngine>,
    delegation: DelegationSupervisor,
    approvals: Approvals,
    scheduler: WindowEvaluator,
}

impl Pipeline {
    pub fn new(store: Arc<SqliteStore>, config: &WardenConfig) -> Self {
        let locks = Arc::new(KeyLocks::new());
        let ledger = ReceiptLedger::new(&store);
        let confidence = Arc::new(ConfidenceEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&locks),
            config.confidence.clone(),
        ));
        Self {
            governor: Governor::new(
                Arc::clone(&store) as _,
                Arc::clone(&locks),
                config.governor,
                config.breaker,
            ),
            delegation: DelegationSupervisor::new(
                Arc::clone(&store) as _,
                Arc::clone(&locks),
                Arc::clone(&confidence),
            ),
            approvals: Approvals::new(
                Arc::clone(&store) as _,
                Arc::clone(&locks),
                ledger.clone(),
            ),
            scheduler: WindowEvaluator::new(Arc::clone(&store) as _, Arc::clone(&locks)),
            confidence,
            ledger,
        }
    }

    /// Run one command through governor → delegation → approval. Exactly
    /// one receipt is appended for the decision (the approval machine
    /// appends its own on entry to the queue).
    pub fn submit(&self, request: &CommandRequest, now: DateTime<Utc>) -> Result<Decision> {
        let fingerprint = request.command.fingerprint();
        let execution_id = request.plan.execution_id;

        match self.governor.check(&fingerprint, now)? {
            GovernorDecision::Allowed => {}
            GovernorDecision::Throttled {
                code,
                reason,
                retry_at,
            } => {
                self.append(
                    Receipt::new(execution_id, fingerprint.as_str(), request.kind, ReceiptStatus::Throttled, now)
                        .with_detail(format!("{reason}; retry at {retry_at}")),
                    request.thread_id,
                )?;
                return Ok(Decision::Throttled {
                    code,
                    reason,
                    retry_at,
                });
            }
        }

        // A read-only invocation context can never carry a write plan.
        if request.mode == AutonomyMode::ReadOnly && !request.plan.is_read_only() {
            let reason = "write plan under a read-only mode".to_string();
            self.governor
                .note_breach(&fingerprint, BreachKind::PolicyDenial, now)?;
            self.governor.release(&fingerprint)?;
            self.append(
                Receipt::new(execution_id, fingerprint.as_str(), request.kind, ReceiptStatus::Denied, now)
                    .with_detail(&reason),
                request.thread_id,
            )?;
            return Ok(Decision::Denied { reason });
        }

        match self.delegation.eligibility(&request.command, now)? {
            DelegationDecision::AutoRun { class } => {
                info!(
                    execution_id = %execution_id,
                    class_id = %class.definition.class_id,
                    "delegated auto-run"
                );
                self.append(
                    Receipt::new(execution_id, fingerprint.as_str(), request.kind, ReceiptStatus::AutoRun, now)
                        .with_plan_hash(request.plan.hash()?)
                        .with_detail(format!("class {}", class.definition.class_id)),
                    request.thread_id,
                )?;
                return Ok(Decision::AutoRun {
                    execution_id,
                    class_id: class.definition.class_id,
                });
            }
            DelegationDecision::NotEligible { .. } => {}
        }

        if request.plan.is_read_only() {
            self.append(
                Receipt::new(execution_id, fingerprint.as_str(), request.kind, ReceiptStatus::Allowed, now),
                request.thread_id,
            )?;
            return Ok(Decision::Allowed { execution_id });
        }

        // Write-capable and not auto-eligible: park for a human.
        self.approvals.submit(
            &fingerprint,
            &request.plan,
            request.prestates.clone(),
            request.thread_id,
            now,
        )?;
        Ok(Decision::ApprovalRequired {
            execution_id,
            code: ApprovalCode::WriteOperation,
        })
    }

    /// Post-execution bookkeeping: capture confidence, evaluate regression
    /// (auto-suspending any covering delegated class), feed the breach
    /// counters, release the concurrency slot, and append the completion
    /// receipt.
    pub fn record_outcome(&self, report: &OutcomeReport, now: DateTime<Utc>) -> Result<()> {
        let fingerprint = report.command.fingerprint();
        self.governor.release(&fingerprint)?;

        self.confidence
            .capture(&report.command, &report.features, now)?;
        let regression = self.confidence.check_regression(&fingerprint, now)?;
        if let Some(check) = regression
            && check.blocks_auto_run()
        {
            self.governor
                .note_breach(&fingerprint, BreachKind::ConfidenceRegression, now)?;
            if let Some(resolved) = self.delegation.resolve(&report.command.text)? {
                self.delegation
                    .auto_suspend(&resolved.definition.class_id, now)?;
            }
        }

        if report.outcome == RunOutcome::RolledBack {
            self.governor
                .note_breach(&fingerprint, BreachKind::Rollback, now)?;
        }

        let status = match report.outcome {
            RunOutcome::Completed => ReceiptStatus::Completed,
            RunOutcome::Failed => ReceiptStatus::Failed,
            RunOutcome::RolledBack => ReceiptStatus::Failed,
        };
        let mut receipt =
            Receipt::new(report.execution_id, fingerprint.as_str(), report.kind, status, now);
        receipt.started_at = Some(report.started_at);
        receipt.finished_at = Some(report.finished_at);
        if let Some(hash) = &report.plan_hash {
            receipt = receipt.with_plan_hash(hash);
        }
        if report.outcome == RunOutcome::RolledBack {
            receipt = receipt.with_detail("rolled back");
        }
        self.append(receipt, report.thread_id)?;
        Ok(())
    }

    /// Scheduled entry point: evaluate the job's window, then run the
    /// fresh window through the same governed pipeline. A spent window
    /// appends a `skipped` receipt and submits nothing — and writes no
    /// second history entry.
    pub fn run_scheduled(
        &self,
        job: &SchedulerJob,
        plan: ExecutionPlan,
        now: DateTime<Utc>,
    ) -> Result<ScheduledDecision> {
        match self.scheduler.evaluate(job, now)? {
            WindowDecision::NotDue => Ok(ScheduledDecision::NotDue),
            WindowDecision::AlreadyRan { window_id } => {
                self.append(
                    Receipt::new(
                        plan.execution_id,
                        job.command.fingerprint(),
                        ReceiptKind::ScheduledRun,
                        ReceiptStatus::Skipped,
                        now,
                    )
                    .with_detail(format!("window {window_id} already ran")),
                    None,
                )?;
                Ok(ScheduledDecision::Skipped { window_id })
            }
            WindowDecision::Run {
                window_id,
                window_start,
            } => {
                let request = CommandRequest {
                    command: job.command.clone(),
                    plan,
                    prestates: BTreeMap::new(),
                    mode: job.mode,
                    thread_id: None,
                    kind: ReceiptKind::ScheduledRun,
                };
                let decision = self.submit(&request, now)?;
                Ok(ScheduledDecision::Evaluated {
                    window_id,
                    window_start,
                    decision,
                })
            }
        }
    }

    /// Close out an executed scheduled window: write its single history
    /// entry, then the normal outcome bookkeeping. Throttled or parked
    /// windows are not closed — the window stays fresh for a retry.
    pub fn complete_scheduled(
        &self,
        job: &SchedulerJob,
        window_id: &str,
        report: &OutcomeReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = match report.outcome {
            RunOutcome::Completed => WindowOutcome::Success,
            RunOutcome::Failed | RunOutcome::RolledBack => WindowOutcome::Failed,
        };
        self.scheduler
            .record_run(&job.job_id, window_id, report.started_at, outcome)?;
        self.record_outcome(report, now)
    }

    /// Operator approval. Verifies the frozen plan hash; the returned
    /// record is what the caller may now execute.
    pub fn approve(
        &self,
        execution_id: ExecutionId,
        plan: &ExecutionPlan,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord> {
        self.approvals.approve(execution_id, plan, now)
    }

    /// Operator rejection. Terminal for the execution_id; the admission
    /// slot debited when the plan was parked is released.
    pub fn reject(
        &self,
        execution_id: ExecutionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord> {
        let record = self.approvals.reject(execution_id, reason, now)?;
        self.governor.release(&record.fingerprint)?;
        Ok(record)
    }

    // ── Component access for operator actions ──────────────────

    pub fn approvals(&self) -> &Approvals {
        &self.approvals
    }

    pub fn delegation(&self) -> &DelegationSupervisor {
        &self.delegation
    }

    pub fn confidence(&self) -> &ConfidenceEngine {
        &self.confidence
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn scheduler(&self) -> &WindowEvaluator {
        &self.scheduler
    }

    pub fn ledger(&self) -> &ReceiptLedger {
        &self.ledger
    }

    fn append(&self, receipt: Receipt, thread_id: Option<ThreadId>) -> Result<()> {
        let receipt = match thread_id {
            Some(t) => receipt.with_thread(t),
            None => receipt,
        };
        self.ledger.append(&receipt)?;
        Ok(())
    }
}
