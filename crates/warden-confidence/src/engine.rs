use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use warden_config::ConfidenceConfig;
use warden_core::{ConfidenceAction, ConfidenceBand, NormalizedCommand, Result};
use warden_store::{family, latest_record, push_record, record_history, DocumentStore, KeyLocks};

use crate::artifact::{self, ConfidenceArtifact, ConfidenceFeatures};
use crate::regression::{self, RegressionCheck, RegressionSeverity};

/// The decayed read-time view of a fingerprint's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfidence {
    pub raw: f64,
    pub decayed: f64,
    pub age_ms: i64,
    pub band: ConfidenceBand,
    pub action: ConfidenceAction,
}

impl EffectiveConfidence {
    /// Safe minimum used when no artifact exists: no score, no autonomy.
    fn floor() -> Self {
        Self {
            raw: 0.0,
            decayed: 0.0,
            age_ms: 0,
            band: ConfidenceBand::Low,
            action: ConfidenceAction::HumanReviewRequired,
        }
    }
}

/// Confidence capture, decay, and regression tracking.
pub struct ConfidenceEngine {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyLocks>,
    config: ConfidenceConfig,
}

impl ConfidenceEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<KeyLocks>,
        config: ConfidenceConfig,
    ) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Score the features and persist a new artifact. Prior artifacts are
    /// never touched; this capture becomes the new latest.
    pub fn capture(
        &self,
        command: &NormalizedCommand,
        features: &ConfidenceFeatures,
        now: DateTime<Utc>,
    ) -> Result<ConfidenceArtifact> {
        let fingerprint = command.fingerprint();
        let score = artifact::score_features(features);
        let band = artifact::band_for(score, &self.config);
        let record = ConfidenceArtifact {
            fingerprint: fingerprint.clone(),
            command: command.text.clone(),
            policy_version: self.config.policy_version.clone(),
            autonomy_mode: features.autonomy_mode,
            capability_set: features.capability_set.clone(),
            score,
            band,
            action: artifact::action_for(band),
            captured_at: now,
        };
        push_record(
            &*self.store,
            family::CONFIDENCE_ARTIFACTS,
            &fingerprint,
            &record,
        )?;
        info!(fingerprint = %fingerprint, score, band = %band, "confidence captured");
        Ok(record)
    }

    /// The latest artifact with decay applied. Decay is exponential in age
    /// with the configured half-life and never increases a score; missing
    /// or unreadable state yields the LOW floor.
    pub fn effective(&self, fingerprint: &str, now: DateTime<Utc>) -> EffectiveConfidence {
        let latest = match latest_record::<ConfidenceArtifact>(
            &*self.store,
            family::CONFIDENCE_ARTIFACTS,
            fingerprint,
        ) {
            Ok(Some((_, artifact))) => artifact,
            Ok(None) => return EffectiveConfidence::floor(),
            Err(e) => {
                warn!(fingerprint, error = %e, "unreadable confidence artifact, using floor");
                return EffectiveConfidence::floor();
            }
        };

        let age_ms = (now - latest.captured_at).num_milliseconds().max(0);
        let age_hours = age_ms as f64 / 3_600_000.0;
        let decayed = latest.score * 0.5f64.powf(age_hours / self.config.half_life_hours);
        let band = artifact::band_for(decayed, &self.config);
        EffectiveConfidence {
            raw: latest.score,
            decayed,
            age_ms,
            band,
            action: artifact::action_for(band),
        }
    }

    /// Compare the latest artifact against the immediately preceding one
    /// and persist the verdict. Returns None when nothing was ever
    /// captured for the fingerprint.
    pub fn check_regression(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RegressionCheck>> {
        self.locks
            .with_lock(family::REGRESSION_CHECKS, fingerprint, || {
                let history: Vec<(u64, ConfidenceArtifact)> = record_history(
                    &*self.store,
                    family::CONFIDENCE_ARTIFACTS,
                    fingerprint,
                )?;
                let Some((_, current)) = history.last().cloned() else {
                    return Ok(None);
                };
                let baseline = history
                    .len()
                    .checked_sub(2)
                    .map(|i| history[i].1.clone());

                let (delta, severity) = regression::classify(
                    baseline.as_ref(),
                    &current,
                    self.config.minor_regression_delta,
                );
                let check = RegressionCheck {
                    command: current.command.clone(),
                    fingerprint: fingerprint.to_string(),
                    baseline,
                    current,
                    delta,
                    severity,
                    requires_ack: severity != RegressionSeverity::None,
                    acknowledged: false,
                    evaluated_at: now,
                    acknowledged_by: None,
                    acknowledged_at: None,
                };
                if check.requires_ack {
                    warn!(fingerprint, delta, severity = ?severity, "confidence regression detected");
                }
                push_record(&*self.store, family::REGRESSION_CHECKS, fingerprint, &check)?;
                Ok(Some(check))
            })
    }

    /// The most recent regression verdict for a fingerprint.
    pub fn latest_regression(&self, fingerprint: &str) -> Result<Option<RegressionCheck>> {
        Ok(
            latest_record::<RegressionCheck>(&*self.store, family::REGRESSION_CHECKS, fingerprint)?
                .map(|(_, check)| check),
        )
    }

    /// Whether an unacknowledged regression is blocking auto-run.
    pub fn has_unacknowledged(&self, fingerprint: &str) -> Result<bool> {
        Ok(self
            .latest_regression(fingerprint)?
            .is_some_and(|check| check.blocks_auto_run()))
    }

    /// Operator acknowledgement. Appends an acknowledged copy of the latest
    /// verdict; nothing else ever flips the flag. Returns the updated check
    /// or None when there was nothing to acknowledge.
    pub fn acknowledge(
        &self,
        fingerprint: &str,
        by: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RegressionCheck>> {
        self.locks
            .with_lock(family::REGRESSION_CHECKS, fingerprint, || {
                let Some(mut check) = self.latest_regression(fingerprint)? else {
                    return Ok(None);
                };
                if check.acknowledged || !check.requires_ack {
                    return Ok(Some(check));
                }
                check.acknowledged = true;
                check.acknowledged_by = Some(by.to_string());
                check.acknowledged_at = Some(now);
                push_record(&*self.store, family::REGRESSION_CHECKS, fingerprint, &check)?;
                info!(fingerprint, by, "regression acknowledged");
                Ok(Some(check))
            })
    }

    /// Every fingerprint whose latest verdict still blocks auto-run.
    pub fn unacknowledged_regressions(&self) -> Result<Vec<RegressionCheck>> {
        let mut blocked = Vec::new();
        for (_, record) in self.store.latest_all(family::REGRESSION_CHECKS)? {
            let check: RegressionCheck = serde_json::from_value(record.body)?;
            if check.blocks_auto_run() {
                blocked.push(check);
            }
        }
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::AutonomyMode;
    use warden_store::SqliteStore;

    use crate::artifact::SimulatedPolicyDecision;

    fn engine() -> ConfidenceEngine {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        ConfidenceEngine::new(store, Arc::new(KeyLocks::new()), ConfidenceConfig::default())
    }

    fn command() -> NormalizedCommand {
        NormalizedCommand::new("/notion set pg_1 Status=Done", "notion")
    }

    fn features(runs: u32, rollbacks: u32) -> ConfidenceFeatures {
        ConfidenceFeatures {
            autonomy_mode: AutonomyMode::ApprovalGated,
            capability_set: vec!["notion.write".into()],
            capabilities_resolved: true,
            policy_decision: SimulatedPolicyDecision::Allow,
            runs_observed: runs,
            rollbacks_observed: rollbacks,
        }
    }

    #[test]
    fn missing_artifact_reads_as_floor() {
        let eng = engine();
        let effective = eng.effective("unknown", Utc::now());
        assert_eq!(effective.decayed, 0.0);
        assert_eq!(effective.band, ConfidenceBand::Low);
        assert_eq!(effective.action, ConfidenceAction::HumanReviewRequired);
    }

    #[test]
    fn fresh_capture_has_no_decay() {
        let eng = engine();
        let now = Utc::now();
        let artifact = eng.capture(&command(), &features(20, 0), now).unwrap();
        let effective = eng.effective(&command().fingerprint(), now);
        assert_eq!(effective.raw, artifact.score);
        assert_eq!(effective.decayed, artifact.score);
        assert_eq!(effective.age_ms, 0);
    }

    #[test]
    fn decay_halves_at_half_life() {
        let eng = engine();
        let now = Utc::now();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        let later = now + chrono::Duration::hours(72);
        let effective = eng.effective(&command().fingerprint(), later);
        assert!((effective.decayed - effective.raw / 2.0).abs() < 1e-6);
    }

    #[test]
    fn decay_never_increases() {
        let eng = engine();
        let now = Utc::now();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        let fp = command().fingerprint();
        let mut previous = f64::INFINITY;
        for hours in [0i64, 1, 24, 72, 240] {
            let effective = eng.effective(&fp, now + chrono::Duration::hours(hours));
            assert!(effective.decayed <= previous);
            previous = effective.decayed;
        }
    }

    #[test]
    fn first_capture_yields_no_regression() {
        let eng = engine();
        let now = Utc::now();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        let check = eng
            .check_regression(&command().fingerprint(), now)
            .unwrap()
            .unwrap();
        assert!(check.baseline.is_none());
        assert_eq!(check.severity, RegressionSeverity::None);
        assert!(!check.requires_ack);
    }

    #[test]
    fn band_drop_requires_ack_until_acknowledged() {
        let eng = engine();
        let now = Utc::now();
        let fp = command().fingerprint();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        // Rollbacks pile up; the next capture drops out of HIGH.
        eng.capture(&command(), &features(20, 10), now).unwrap();
        let check = eng.check_regression(&fp, now).unwrap().unwrap();
        assert_eq!(check.severity, RegressionSeverity::Hard);
        assert!(check.requires_ack);
        assert!(eng.has_unacknowledged(&fp).unwrap());

        let acked = eng.acknowledge(&fp, "operator", now).unwrap().unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("operator"));
        assert!(!eng.has_unacknowledged(&fp).unwrap());
    }

    #[test]
    fn acknowledge_without_regression_is_noop() {
        let eng = engine();
        assert!(eng.acknowledge("fp", "op", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn artifacts_are_superseded_not_replaced() {
        let eng = engine();
        let now = Utc::now();
        eng.capture(&command(), &features(0, 0), now).unwrap();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        let history: Vec<(u64, ConfidenceArtifact)> = record_history(
            &*eng.store,
            family::CONFIDENCE_ARTIFACTS,
            &command().fingerprint(),
        )
        .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].1.score < history[1].1.score);
    }

    #[test]
    fn unacknowledged_listing_skips_acked() {
        let eng = engine();
        let now = Utc::now();
        let fp = command().fingerprint();
        eng.capture(&command(), &features(20, 0), now).unwrap();
        eng.capture(&command(), &features(20, 10), now).unwrap();
        eng.check_regression(&fp, now).unwrap();
        assert_eq!(eng.unacknowledged_regressions().unwrap().len(), 1);
        eng.acknowledge(&fp, "op", now).unwrap();
        assert!(eng.unacknowledged_regressions().unwrap().is_empty());
    }
}
