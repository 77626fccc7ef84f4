use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use warden_core::{AutonomyMode, Result, WardenError};

/// A pre-approved pattern of commands. Versioned by append — the current
/// definition for a class_id is the highest-seq record, never an in-place
/// overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedClassDefinition {
    pub class_id: String,
    /// Glob over normalized command text, e.g. `/notion set pg_* Status=*`.
    pub pattern: String,
    pub capabilities: Vec<String>,
    pub adapter: String,
    pub write: bool,
    pub created_at: DateTime<Utc>,
}

/// Bounds an approval places on a class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelegationScope {
    pub autonomy_mode: AutonomyMode,
    /// Minimum effective (decayed) confidence for auto-run.
    pub confidence_min: f64,
    /// Whether auto-run additionally demands a promotion record. Defaults
    /// on; switching it off is itself an operator decision recorded in the
    /// approval event.
    #[serde(default = "default_true")]
    pub promotion_required: bool,
}

fn default_true() -> bool {
    true
}

/// Append-only event stream per class. A class is active iff its latest
/// event is an approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelegationEvent {
    Approval(DelegatedApprovalRecord),
    Revocation(DelegatedRevocationRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedApprovalRecord {
    pub class_id: String,
    pub by: String,
    pub at: DateTime<Utc>,
    pub scope: DelegationScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedRevocationRecord {
    pub class_id: String,
    pub by: String,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Match normalized command text against a class pattern. `*` is the only
/// wildcard; everything else matches literally. The glob compiles to an
/// anchored regex so a pattern can never match a substring.
pub fn pattern_matches(pattern: &str, text: &str) -> Result<bool> {
    let regex = compile_pattern(pattern)?;
    Ok(regex.is_match(text))
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(|part| regex::escape(part)).collect();
    let source = format!("^{}$", escaped.join(".*"));
    Regex::new(&source).map_err(|e| WardenError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
