use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_config::ConfidenceConfig;
use warden_core::{AutonomyMode, ConfidenceAction, ConfidenceBand, Fingerprint};

/// One immutable confidence capture for a fingerprint. Superseded by the
/// next capture, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceArtifact {
    pub fingerprint: Fingerprint,
    pub command: String,
    pub policy_version: String,
    pub autonomy_mode: AutonomyMode,
    pub capability_set: Vec<String>,
    /// 0–100.
    pub score: f64,
    pub band: ConfidenceBand,
    pub action: ConfidenceAction,
    pub captured_at: DateTime<Utc>,
}

/// The policy-evaluation features a capture scores from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceFeatures {
    pub autonomy_mode: AutonomyMode,
    pub capability_set: Vec<String>,
    /// Whether every required capability resolved to a known adapter.
    pub capabilities_resolved: bool,
    /// What the policy engine would decide for this command today.
    pub policy_decision: SimulatedPolicyDecision,
    /// Historical signal: completed runs and rollbacks observed so far.
    pub runs_observed: u32,
    pub rollbacks_observed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedPolicyDecision {
    Allow,
    RequireApproval,
    Deny,
}

/// Score the features. Weights: the simulated policy decision dominates,
/// capability resolution adds a fixed bonus, and history contributes up to
/// 25 points scaled by both success ratio and how much evidence exists
/// (20 observed runs count as full evidence).
pub fn score_features(features: &ConfidenceFeatures) -> f64 {
    let base = match features.policy_decision {
        SimulatedPolicyDecision::Allow => 60.0,
        SimulatedPolicyDecision::RequireApproval => 40.0,
        SimulatedPolicyDecision::Deny => 10.0,
    };
    let capability_bonus = if features.capabilities_resolved { 15.0 } else { 0.0 };

    let history = if features.runs_observed > 0 {
        let successes = features
            .runs_observed
            .saturating_sub(features.rollbacks_observed) as f64;
        let ratio = successes / features.runs_observed as f64;
        let evidence = (features.runs_observed.min(20) as f64) / 20.0;
        25.0 * ratio * evidence
    } else {
        0.0
    };

    (base + capability_bonus + history).clamp(0.0, 100.0)
}

/// Band a score using the deployment's thresholds.
pub fn band_for(score: f64, config: &ConfidenceConfig) -> ConfidenceBand {
    if score >= config.high_band_min {
        ConfidenceBand::High
    } else if score >= config.medium_band_min {
        ConfidenceBand::Medium
    } else {
        ConfidenceBand::Low
    }
}

/// What a band entitles the command to.
pub fn action_for(band: ConfidenceBand) -> ConfidenceAction {
    match band {
        ConfidenceBand::High => ConfidenceAction::AutoRun,
        ConfidenceBand::Medium => ConfidenceAction::ProposeForApproval,
        ConfidenceBand::Low => ConfidenceAction::HumanReviewRequired,
    }
}
