use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::Fingerprint;

use crate::artifact::ConfidenceArtifact;

/// Comparison of the most recent confidence capture against the one
/// immediately before it. A check that `requires_ack` blocks every
/// downstream auto-run path for the fingerprint until an operator
/// explicitly acknowledges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionCheck {
    pub command: String,
    pub fingerprint: Fingerprint,
    pub baseline: Option<ConfidenceArtifact>,
    pub current: ConfidenceArtifact,
    pub delta: f64,
    pub severity: RegressionSeverity,
    pub requires_ack: bool,
    pub acknowledged: bool,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl RegressionCheck {
    pub fn blocks_auto_run(&self) -> bool {
        self.requires_ack && !self.acknowledged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegressionSeverity {
    None,
    Major,
    Hard,
}

/// Classify a drop. Band drops are HARD regardless of the numeric delta;
/// within a band, negative deltas at or beyond the noise floor are MAJOR.
pub fn classify(
    baseline: Option<&ConfidenceArtifact>,
    current: &ConfidenceArtifact,
    minor_delta: f64,
) -> (f64, RegressionSeverity) {
    let Some(baseline) = baseline else {
        return (0.0, RegressionSeverity::None);
    };
    let delta = current.score - baseline.score;
    if current.band < baseline.band {
        return (delta, RegressionSeverity::Hard);
    }
    if delta < 0.0 && -delta >= minor_delta {
        return (delta, RegressionSeverity::Major);
    }
    (delta, RegressionSeverity::None)
}
