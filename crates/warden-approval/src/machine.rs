use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use warden_core::{
    ApprovalCode, ExecutionId, Fingerprint, Receipt, ReceiptKind, ReceiptStatus, Result,
    ThreadId, WardenError,
};
use warden_store::{family, get_doc, insert_doc, put_doc, DocumentStore, KeyLocks, ReceiptLedger};

use crate::plan::{ExecutionPlan, StepPrestate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    AwaitingApproval,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{name}")
    }
}

/// The audited record of a plan's trip through the approval queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub execution_id: ExecutionId,
    pub fingerprint: Fingerprint,
    /// Frozen at creation; every later approve/resume must reproduce it
    /// byte-identically.
    pub plan_hash: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    pub pending_step_ids: Vec<String>,
    /// Pre-execution snapshot + fingerprint per step, for later rollback
    /// comparison.
    pub prestates: BTreeMap<String, StepPrestate>,
    /// Full plan snapshot as submitted.
    pub plan: ExecutionPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
}

/// The approval state machine. Records wait indefinitely — there is no TTL
/// on a pending approval; only an explicit approve or reject moves it.
pub struct Approvals {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyLocks>,
    ledger: ReceiptLedger,
}

impl Approvals {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyLocks>, ledger: ReceiptLedger) -> Self {
        Self {
            store,
            locks,
            ledger,
        }
    }

    /// Park a write-capable plan in the approval queue. Freezes the plan
    /// hash, stores the full snapshot with per-step prestates, and appends
    /// the WRITE_OPERATION receipt.
    pub fn submit(
        &self,
        fingerprint: &str,
        plan: &ExecutionPlan,
        prestates: BTreeMap<String, StepPrestate>,
        thread_id: Option<ThreadId>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord> {
        let plan_hash = plan.hash()?;
        let record = ApprovalRecord {
            execution_id: plan.execution_id,
            fingerprint: fingerprint.to_string(),
            plan_hash: plan_hash.clone(),
            status: ApprovalStatus::AwaitingApproval,
            created_at: now,
            decided_at: None,
            pending_step_ids: plan.step_ids(),
            prestates,
            plan: plan.clone(),
            rejection_reason: None,
            thread_id,
        };

        let key = plan.execution_id.to_string();
        self.locks.with_lock(family::APPROVALS, &key, || {
            let created = insert_doc(&*self.store, family::APPROVALS, &key, &record)?;
            if !created {
                let existing: Option<ApprovalRecord> =
                    get_doc(&*self.store, family::APPROVALS, &key)?;
                let from = existing
                    .map(|r| r.status.to_string())
                    .unwrap_or_else(|| "unknown".into());
                return Err(WardenError::InvalidTransition {
                    execution_id: key.clone(),
                    from,
                    to: ApprovalStatus::AwaitingApproval.to_string(),
                });
            }
            Ok(())
        })?;

        info!(execution_id = %plan.execution_id, plan_hash = %plan_hash, "plan awaiting approval");
        let receipt = Receipt::new(
            plan.execution_id,
            fingerprint,
            ReceiptKind::Approval,
            ReceiptStatus::AwaitingApproval,
            now,
        )
        .with_plan_hash(&plan_hash)
        .requiring_approval(ApprovalCode::WriteOperation);
        let receipt = match thread_id {
            Some(t) => receipt.with_thread(t),
            None => receipt,
        };
        self.ledger.append(&receipt)?;
        Ok(record)
    }

    /// Approve. The supplied plan is re-hashed and must match the frozen
    /// hash exactly — execution never proceeds against an edited plan.
    pub fn approve(
        &self,
        execution_id: ExecutionId,
        plan: &ExecutionPlan,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord> {
        let key = execution_id.to_string();
        self.locks.with_lock(family::APPROVALS, &key, || {
            let mut record = self.load(execution_id)?;
            if record.status != ApprovalStatus::AwaitingApproval {
                return Err(WardenError::InvalidTransition {
                    execution_id: key.clone(),
                    from: record.status.to_string(),
                    to: ApprovalStatus::Approved.to_string(),
                });
            }
            Self::verify_hash(&record, plan)?;

            record.status = ApprovalStatus::Approved;
            record.decided_at = Some(now);
            put_doc(&*self.store, family::APPROVALS, &key, &record)?;

            info!(execution_id = %execution_id, "plan approved");
            self.ledger.append(
                &Receipt::new(
                    execution_id,
                    record.fingerprint.as_str(),
                    ReceiptKind::Approval,
                    ReceiptStatus::Approved,
                    now,
                )
                .with_plan_hash(&record.plan_hash),
            )?;
            Ok(record)
        })
    }

    /// Reject. Terminal — the same execution_id is never retried.
    pub fn reject(
        &self,
        execution_id: ExecutionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord> {
        let key = execution_id.to_string();
        self.locks.with_lock(family::APPROVALS, &key, || {
            let mut record = self.load(execution_id)?;
            if record.status != ApprovalStatus::AwaitingApproval {
                return Err(WardenError::InvalidTransition {
                    execution_id: key.clone(),
                    from: record.status.to_string(),
                    to: ApprovalStatus::Rejected.to_string(),
                });
            }

            record.status = ApprovalStatus::Rejected;
            record.decided_at = Some(now);
            record.rejection_reason = Some(reason.to_string());
            put_doc(&*self.store, family::APPROVALS, &key, &record)?;

            info!(execution_id = %execution_id, reason, "plan rejected");
            self.ledger.append(
                &Receipt::new(
                    execution_id,
                    record.fingerprint.as_str(),
                    ReceiptKind::Approval,
                    ReceiptStatus::Rejected,
                    now,
                )
                .with_plan_hash(&record.plan_hash)
                .with_detail(reason),
            )?;
            Ok(record)
        })
    }

    /// Re-verify an approved plan before (re)execution. The stored hash
    /// must be reproduced from the supplied plan.
    pub fn resume(&self, execution_id: ExecutionId, plan: &ExecutionPlan) -> Result<ApprovalRecord> {
        let record = self.load(execution_id)?;
        if record.status != ApprovalStatus::Approved {
            return Err(WardenError::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: record.status.to_string(),
                to: "resume".into(),
            });
        }
        Self::verify_hash(&record, plan)?;
        Ok(record)
    }

    pub fn get(&self, execution_id: ExecutionId) -> Result<Option<ApprovalRecord>> {
        get_doc(
            &*self.store,
            family::APPROVALS,
            &execution_id.to_string(),
        )
    }

    /// Every record still awaiting a decision.
    pub fn pending(&self) -> Result<Vec<ApprovalRecord>> {
        let mut waiting = Vec::new();
        for (_, body) in self.store.documents(family::APPROVALS)? {
            let record: ApprovalRecord = serde_json::from_value(body)?;
            if record.status == ApprovalStatus::AwaitingApproval {
                waiting.push(record);
            }
        }
        waiting.sort_by_key(|r| r.created_at);
        Ok(waiting)
    }

    fn load(&self, execution_id: ExecutionId) -> Result<ApprovalRecord> {
        self.get(execution_id)?
            .ok_or_else(|| WardenError::ApprovalNotFound(execution_id.to_string()))
    }

    fn verify_hash(record: &ApprovalRecord, plan: &ExecutionPlan) -> Result<()> {
        let got = plan.hash()?;
        if got != record.plan_hash {
            return Err(WardenError::PlanHashMismatch {
                execution_id: record.execution_id.to_string(),
                expected: record.plan_hash.clone(),
                got,
            });
        }
        Ok(())
    }
}
