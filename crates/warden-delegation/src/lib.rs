//! # warden-delegation
//!
//! Delegated autonomy: operator-approved classes of commands that may run
//! without per-instance approval — but only while a promotion record proves
//! demonstrated reliability, effective confidence clears the class minimum,
//! and no regression is waiting on acknowledgement. The moment an
//! unacknowledged regression is observed for a covered fingerprint, the
//! supervisor revokes the class itself.

pub mod class;
pub mod promotion;
pub mod supervisor;

pub use class::{
    pattern_matches, DelegatedApprovalRecord, DelegatedClassDefinition,
    DelegatedRevocationRecord, DelegationEvent, DelegationScope,
};
pub use promotion::{PromotionCriteria, PromotionRecord};
pub use supervisor::{
    ClassStatus, DelegationDecision, DelegationSupervisor, IneligibleReason, ResolvedClass,
    AUTO_SUSPEND_REASON,
};
