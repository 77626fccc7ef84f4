//! # warden-confidence
//!
//! Confidence in automated decisions, per command fingerprint. Each capture
//! appends an immutable [`ConfidenceArtifact`]; reads derive a decayed view
//! as a function of age; consecutive captures are compared for regressions
//! that must be acknowledged before any auto-run path re-opens.

pub mod artifact;
pub mod engine;
pub mod regression;

pub use artifact::{ConfidenceArtifact, ConfidenceFeatures, SimulatedPolicyDecision};
pub use engine::{ConfidenceEngine, EffectiveConfidence};
pub use regression::{RegressionCheck, RegressionSeverity};
