use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{ExecutionId, Fingerprint, ThreadId};

/// One immutable audit record of an outcome. Receipts are only ever
/// appended; the ledger is the canonical history for every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub fingerprint: Fingerprint,
    pub kind: ReceiptKind,
    pub status: ReceiptStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_required: Option<ApprovalRequired>,
    /// Human-readable reason for operator views (throttle reason,
    /// rejection reason, skip explanation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Receipt {
    pub fn new(
        execution_id: ExecutionId,
        fingerprint: impl Into<Fingerprint>,
        kind: ReceiptKind,
        status: ReceiptStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            thread_id: None,
            fingerprint: fingerprint.into(),
            kind,
            status,
            created_at,
            started_at: None,
            finished_at: None,
            plan_hash: None,
            approval_required: None,
            detail: None,
        }
    }

    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_plan_hash(mut self, plan_hash: impl Into<String>) -> Self {
        self.plan_hash = Some(plan_hash.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn requiring_approval(mut self, code: ApprovalCode) -> Self {
        self.approval_required = Some(ApprovalRequired { code });
        self
    }
}

/// What produced the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Command,
    ScheduledRun,
    Approval,
    Delegation,
}

/// Terminal (or terminal-for-now) status of the recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Allowed,
    AutoRun,
    Throttled,
    AwaitingApproval,
    Approved,
    Rejected,
    Denied,
    Completed,
    Failed,
    Skipped,
}

/// Carried on receipts for plans parked in the approval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequired {
    pub code: ApprovalCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalCode {
    WriteOperation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn approval_code_wire_format() {
        let json = serde_json::to_string(&ApprovalCode::WriteOperation).unwrap();
        assert_eq!(json, "\"WRITE_OPERATION\"");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let receipt = Receipt::new(
            Uuid::new_v4(),
            "fp",
            ReceiptKind::Command,
            ReceiptStatus::Allowed,
            Utc::now(),
        );
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("plan_hash"));
        assert!(!json.contains("approval_required"));
        assert!(!json.contains("thread_id"));
    }

    #[test]
    fn builder_sets_approval() {
        let receipt = Receipt::new(
            Uuid::new_v4(),
            "fp",
            ReceiptKind::Approval,
            ReceiptStatus::AwaitingApproval,
            Utc::now(),
        )
        .requiring_approval(ApprovalCode::WriteOperation)
        .with_plan_hash("abc123");
        assert_eq!(
            receipt.approval_required.unwrap().code,
            ApprovalCode::WriteOperation
        );
        assert_eq!(receipt.plan_hash.as_deref(), Some("abc123"));
    }
}
