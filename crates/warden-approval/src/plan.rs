use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_core::{content_hash, ExecutionId, Result};

/// A proposed execution, produced by the external planner. Immutable once
/// an approval record references it by hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub execution_id: ExecutionId,
    pub goal: String,
    pub required_capabilities: Vec<String>,
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Content hash of the plan. serde_json object keys are ordered, so
    /// equal plans always hash equal and any edit changes the digest.
    pub fn hash(&self) -> Result<String> {
        Ok(content_hash(&serde_json::to_vec(self)?))
    }

    /// A plan with no write step never enters the approval queue.
    pub fn is_read_only(&self) -> bool {
        self.steps.iter().all(|s| s.read_only)
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.step_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub action: String,
    pub adapter: String,
    pub read_only: bool,
    pub payload: Value,
    /// Carried to the adapter so governor/approval retries never
    /// double-apply a side effect.
    pub idempotency_key: String,
}

/// Pre-execution snapshot of the state a step will touch, captured when
/// the plan parks for approval so a later rollback has something to
/// compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPrestate {
    pub snapshot: Value,
    pub fingerprint: String,
}

impl StepPrestate {
    pub fn capture(snapshot: Value) -> Self {
        let fingerprint = content_hash(snapshot.to_string().as_bytes());
        Self {
            snapshot,
            fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            execution_id: Uuid::new_v4(),
            goal: "update page status".into(),
            required_capabilities: vec!["notion.write".into()],
            steps: vec![PlanStep {
                step_id: "s1".into(),
                action: "set_status".into(),
                adapter: "notion".into(),
                read_only: false,
                payload: serde_json::json!({"page": "pg_999", "status": "Done"}),
                idempotency_key: "idem-1".into(),
            }],
        }
    }

    #[test]
    fn equal_plans_hash_equal() {
        let p = plan();
        assert_eq!(p.hash().unwrap(), p.clone().hash().unwrap());
    }

    #[test]
    fn any_edit_changes_the_hash() {
        let p = plan();
        let original = p.hash().unwrap();

        let mut edited = p.clone();
        edited.steps[0].payload = serde_json::json!({"page": "pg_999", "status": "Archived"});
        assert_ne!(edited.hash().unwrap(), original);

        let mut reordered = p;
        reordered.goal = "update page Status".into();
        assert_ne!(reordered.hash().unwrap(), original);
    }

    #[test]
    fn read_only_detection() {
        let mut p = plan();
        assert!(!p.is_read_only());
        p.steps[0].read_only = true;
        assert!(p.is_read_only());
    }

    #[test]
    fn prestate_fingerprint_tracks_snapshot() {
        let a = StepPrestate::capture(serde_json::json!({"status": "Open"}));
        let b = StepPrestate::capture(serde_json::json!({"status": "Open"}));
        let c = StepPrestate::capture(serde_json::json!({"status": "Done"}));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
