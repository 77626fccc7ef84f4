use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{promotion_fingerprint, AutonomyMode, Fingerprint};

/// Recorded evidence that a specific command fingerprint has earned
/// autonomous execution. Keyed independently of any class definition —
/// delegation alone never grants execution, only promotion + active
/// delegation together do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    /// = hash(normalized_command, sorted capability_set, adapter_type).
    pub fingerprint: Fingerprint,
    pub command: String,
    pub criteria: PromotionCriteria,
    pub previous_mode: AutonomyMode,
    pub new_mode: AutonomyMode,
    pub promoted_at: DateTime<Utc>,
}

impl PromotionRecord {
    /// The key a promotion must be stored (and looked up) under.
    pub fn key_for(command: &str, capabilities: &[String], adapter: &str) -> Fingerprint {
        promotion_fingerprint(command, capabilities, adapter)
    }

    /// Whether this promotion actually grants auto-run.
    pub fn grants_auto_run(&self) -> bool {
        self.new_mode.allows_auto_run()
    }
}

/// The evidence a promotion was based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionCriteria {
    pub confidence_avg: f64,
    pub runs_observed: u32,
    pub regressions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_capability_order() {
        let a = PromotionRecord::key_for(
            "/notion set pg_1 Status=Done",
            &["notion.write".into(), "notion.read".into()],
            "notion",
        );
        let b = PromotionRecord::key_for(
            "/notion set pg_1 Status=Done",
            &["notion.read".into(), "notion.write".into()],
            "notion",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn only_auto_run_mode_grants() {
        let record = PromotionRecord {
            fingerprint: "fp".into(),
            command: "/cmd".into(),
            criteria: PromotionCriteria {
                confidence_avg: 92.0,
                runs_observed: 40,
                regressions: 0,
            },
            previous_mode: AutonomyMode::ApprovalGated,
            new_mode: AutonomyMode::AutoRun,
            promoted_at: Utc::now(),
        };
        assert!(record.grants_auto_run());

        let partial = PromotionRecord {
            new_mode: AutonomyMode::ApprovalGated,
            ..record
        };
        assert!(!partial.grants_auto_run());
    }
}
