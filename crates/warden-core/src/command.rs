use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::fingerprint;

/// Unique identifier for one execution of a command.
pub type ExecutionId = Uuid;

/// Unique identifier for the conversation/thread a command arrived on.
pub type ThreadId = Uuid;

/// Hex blake3 digest used as the universal join key across all components.
pub type Fingerprint = String;

/// A command after the external normalizer has run: stable text plus the
/// domain it operates in. The core never sees raw operator input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedCommand {
    /// Normalized command text, e.g. `/notion set pg_999 Status=Done`.
    pub text: String,
    /// Domain scope the command belongs to, e.g. "notion" or "email".
    #[serde(default)]
    pub domain_scope: String,
}

impl NormalizedCommand {
    pub fn new(text: impl Into<String>, domain_scope: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain_scope: domain_scope.into(),
        }
    }

    /// The deterministic identity of this command. Never mutated; every
    /// counter, artifact, and receipt keys off this value.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint::command_fingerprint(&self.domain_scope, &self.text)
    }
}

/// A capability a command or delegated class requires, e.g. "notion.write".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Optional scope constraint, e.g. a page-id prefix for notion capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Capability {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }
}

/// The trust level at which a command class may currently run.
///
/// - **ReadOnly**: may only observe; every write proposal is blocked.
/// - **ProposeOnly**: may draft plans, all of them human-gated.
/// - **ApprovalGated**: runs after per-instance approval.
/// - **AutoRun**: runs without per-instance approval while delegation and
///   promotion both hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AutonomyMode {
    ReadOnly = 0,
    ProposeOnly = 1,
    ApprovalGated = 2,
    AutoRun = 3,
}

impl AutonomyMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::ReadOnly,
            1 => Self::ProposeOnly,
            2 => Self::ApprovalGated,
            3 => Self::AutoRun,
            _ => Self::ProposeOnly, // safe default
        }
    }

    /// Whether this mode permits execution without a per-instance approval.
    pub fn allows_auto_run(&self) -> bool {
        *self >= Self::AutoRun
    }

    /// Whether this mode permits any write plan at all.
    pub fn allows_writes(&self) -> bool {
        *self >= Self::ProposeOnly
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadOnly => "read_only",
            Self::ProposeOnly => "propose_only",
            Self::ApprovalGated => "approval_gated",
            Self::AutoRun => "auto_run",
        };
        write!(f, "{name}")
    }
}

/// Confidence band derived from a 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{name}")
    }
}

/// What a confidence band entitles a command to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceAction {
    AutoRun,
    ProposeForApproval,
    HumanReviewRequired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = NormalizedCommand::new("/notion set pg_1 Status=Done", "notion");
        let b = NormalizedCommand::new("/notion set pg_1 Status=Done", "notion");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_scopes_are_distinct() {
        let a = NormalizedCommand::new("/set Status=Done", "notion");
        let b = NormalizedCommand::new("/set Status=Done", "email");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn autonomy_mode_ordering() {
        assert!(AutonomyMode::ReadOnly < AutonomyMode::ProposeOnly);
        assert!(AutonomyMode::ProposeOnly < AutonomyMode::ApprovalGated);
        assert!(AutonomyMode::ApprovalGated < AutonomyMode::AutoRun);
        assert!(AutonomyMode::AutoRun.allows_auto_run());
        assert!(!AutonomyMode::ApprovalGated.allows_auto_run());
        assert!(!AutonomyMode::ReadOnly.allows_writes());
    }

    #[test]
    fn autonomy_mode_from_u8_defaults_safe() {
        assert_eq!(AutonomyMode::from_u8(3), AutonomyMode::AutoRun);
        assert_eq!(AutonomyMode::from_u8(9), AutonomyMode::ProposeOnly);
    }

    #[test]
    fn band_ordering() {
        assert!(ConfidenceBand::Low < ConfidenceBand::Medium);
        assert!(ConfidenceBand::Medium < ConfidenceBand::High);
    }

    #[test]
    fn band_serde_uses_upper() {
        let json = serde_json::to_string(&ConfidenceBand::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }
}
