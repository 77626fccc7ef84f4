use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use warden_confidence::ConfidenceEngine;
use warden_core::{NormalizedCommand, Result, WardenError};
use warden_store::{family, latest_record, push_record, DocumentStore, KeyLocks};

use crate::class::{
    pattern_matches, DelegatedApprovalRecord, DelegatedClassDefinition,
    DelegatedRevocationRecord, DelegationEvent, DelegationScope,
};
use crate::promotion::PromotionRecord;

/// Reason written on every automatic suspension.
pub const AUTO_SUSPEND_REASON: &str = "auto_suspended_on_regression";

/// A matched, active class with the approval that activated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedClass {
    pub definition: DelegatedClassDefinition,
    pub approval: DelegatedApprovalRecord,
}

impl ResolvedClass {
    pub fn scope(&self) -> &DelegationScope {
        &self.approval.scope
    }
}

/// Outcome of an eligibility check. Not an error — the pipeline falls back
/// to per-instance approval on every NotEligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DelegationDecision {
    AutoRun { class: ResolvedClass },
    NotEligible { reason: IneligibleReason },
}

impl DelegationDecision {
    pub fn is_auto_run(&self) -> bool {
        matches!(self, Self::AutoRun { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibleReason {
    NoMatchingClass,
    RegressionUnacknowledged,
    NotPromoted,
    ConfidenceBelowMinimum { required: f64, effective: f64 },
}

/// Operator-facing view of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatus {
    pub class_id: String,
    pub pattern: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<DelegationScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

/// The delegation supervisor: resolves commands against active classes and
/// gates auto-run behind promotion, confidence, and regression state.
pub struct DelegationSupervisor {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyLocks>,
    confidence: Arc<ConfidenceEngine>,
}

impl DelegationSupervisor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<KeyLocks>,
        confidence: Arc<ConfidenceEngine>,
    ) -> Self {
        Self {
            store,
            locks,
            confidence,
        }
    }

    /// Register (or re-version) a class definition. The previous version
    /// stays in the history; the new one becomes current.
    pub fn define_class(&self, definition: &DelegatedClassDefinition) -> Result<u64> {
        // Surface bad globs at definition time, not at resolve time.
        pattern_matches(&definition.pattern, "")?;
        let seq = push_record(
            &*self.store,
            family::DELEGATED_CLASSES,
            &definition.class_id,
            definition,
        )?;
        info!(class_id = %definition.class_id, pattern = %definition.pattern, seq, "class defined");
        Ok(seq)
    }

    /// The current definition for a class, resolved by highest seq.
    pub fn current_definition(&self, class_id: &str) -> Result<Option<DelegatedClassDefinition>> {
        Ok(
            latest_record::<DelegatedClassDefinition>(
                &*self.store,
                family::DELEGATED_CLASSES,
                class_id,
            )?
            .map(|(_, def)| def),
        )
    }

    /// Activate a class. After an auto-suspension this is the only path
    /// back to active — re-activation always takes a fresh explicit
    /// approval event.
    pub fn approve_class(
        &self,
        class_id: &str,
        by: &str,
        scope: DelegationScope,
        now: DateTime<Utc>,
    ) -> Result<DelegatedApprovalRecord> {
        if self.current_definition(class_id)?.is_none() {
            return Err(WardenError::MissingDefinition(class_id.to_string()));
        }
        let record = DelegatedApprovalRecord {
            class_id: class_id.to_string(),
            by: by.to_string(),
            at: now,
            scope,
        };
        self.locks
            .with_lock(family::DELEGATION_EVENTS, class_id, || {
                push_record(
                    &*self.store,
                    family::DELEGATION_EVENTS,
                    class_id,
                    &DelegationEvent::Approval(record.clone()),
                )
            })?;
        info!(class_id, by, confidence_min = scope.confidence_min, "class approved");
        Ok(record)
    }

    /// Deactivate a class by operator action.
    pub fn revoke_class(
        &self,
        class_id: &str,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DelegatedRevocationRecord> {
        if self.current_definition(class_id)?.is_none() {
            return Err(WardenError::UnknownClass(class_id.to_string()));
        }
        let record = DelegatedRevocationRecord {
            class_id: class_id.to_string(),
            by: by.to_string(),
            at: now,
            reason: reason.to_string(),
        };
        self.locks
            .with_lock(family::DELEGATION_EVENTS, class_id, || {
                push_record(
                    &*self.store,
                    family::DELEGATION_EVENTS,
                    class_id,
                    &DelegationEvent::Revocation(record.clone()),
                )
            })?;
        info!(class_id, by, reason, "class revoked");
        Ok(record)
    }

    /// The approval currently activating a class, if its latest event is
    /// an approval.
    pub fn active_approval(&self, class_id: &str) -> Result<Option<DelegatedApprovalRecord>> {
        let latest =
            latest_record::<DelegationEvent>(&*self.store, family::DELEGATION_EVENTS, class_id)?;
        Ok(match latest {
            Some((_, DelegationEvent::Approval(approval))) => Some(approval),
            _ => None,
        })
    }

    /// Record a promotion under its reliability fingerprint.
    pub fn record_promotion(&self, record: &PromotionRecord) -> Result<u64> {
        let seq = push_record(&*self.store, family::PROMOTIONS, &record.fingerprint, record)?;
        info!(
            fingerprint = %record.fingerprint,
            previous = %record.previous_mode,
            new = %record.new_mode,
            "promotion recorded"
        );
        Ok(seq)
    }

    /// The current promotion for a reliability fingerprint.
    pub fn promotion(&self, promotion_key: &str) -> Result<Option<PromotionRecord>> {
        Ok(
            latest_record::<PromotionRecord>(&*self.store, family::PROMOTIONS, promotion_key)?
                .map(|(_, record)| record),
        )
    }

    /// Match a command against every active class. If several match, the
    /// most recently approved class wins (patterns should be disjoint, so
    /// this is a tie-break, not a routing rule).
    pub fn resolve(&self, command_text: &str) -> Result<Option<ResolvedClass>> {
        let mut best: Option<ResolvedClass> = None;
        for (class_id, record) in self.store.latest_all(family::DELEGATED_CLASSES)? {
            let definition: DelegatedClassDefinition = serde_json::from_value(record.body)?;
            if !pattern_matches(&definition.pattern, command_text)? {
                continue;
            }
            let Some(approval) = self.active_approval(&class_id)? else {
                continue;
            };
            let candidate = ResolvedClass {
                definition,
                approval,
            };
            let wins = match &best {
                None => true,
                Some(current) => {
                    (candidate.approval.at, &candidate.definition.class_id)
                        > (current.approval.at, &current.definition.class_id)
                }
            };
            if wins {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    /// Full auto-run eligibility for one command. Falls back (and, on an
    /// unacknowledged regression, suspends the covering class) rather than
    /// erroring.
    pub fn eligibility(
        &self,
        command: &NormalizedCommand,
        now: DateTime<Utc>,
    ) -> Result<DelegationDecision> {
        let Some(resolved) = self.resolve(&command.text)? else {
            return Ok(DelegationDecision::NotEligible {
                reason: IneligibleReason::NoMatchingClass,
            });
        };

        let fingerprint = command.fingerprint();

        // Containment first: an unacknowledged regression on a covered
        // fingerprint revokes the class before anything else is weighed.
        if self.confidence.has_unacknowledged(&fingerprint)? {
            self.auto_suspend(&resolved.definition.class_id, now)?;
            return Ok(DelegationDecision::NotEligible {
                reason: IneligibleReason::RegressionUnacknowledged,
            });
        }

        if resolved.scope().promotion_required {
            let key = PromotionRecord::key_for(
                &command.text,
                &resolved.definition.capabilities,
                &resolved.definition.adapter,
            );
            match self.promotion(&key)? {
                Some(promotion) if promotion.grants_auto_run() => {}
                _ => {
                    debug!(fingerprint = %fingerprint, "no auto-run promotion on file");
                    return Ok(DelegationDecision::NotEligible {
                        reason: IneligibleReason::NotPromoted,
                    });
                }
            }
        }

        let effective = self.confidence.effective(&fingerprint, now);
        let required = resolved.scope().confidence_min;
        if effective.decayed < required {
            return Ok(DelegationDecision::NotEligible {
                reason: IneligibleReason::ConfidenceBelowMinimum {
                    required,
                    effective: effective.decayed,
                },
            });
        }

        Ok(DelegationDecision::AutoRun { class: resolved })
    }

    /// Write the auto-suspension revocation for a class. Idempotent while
    /// suspended: a class whose latest event is already a revocation is
    /// left as-is.
    pub fn auto_suspend(&self, class_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.locks
            .with_lock(family::DELEGATION_EVENTS, class_id, || {
                let latest = latest_record::<DelegationEvent>(
                    &*self.store,
                    family::DELEGATION_EVENTS,
                    class_id,
                )?;
                if matches!(latest, Some((_, DelegationEvent::Revocation(_)))) {
                    return Ok(());
                }
                warn!(class_id, "auto-suspending delegated class on regression");
                push_record(
                    &*self.store,
                    family::DELEGATION_EVENTS,
                    class_id,
                    &DelegationEvent::Revocation(DelegatedRevocationRecord {
                        class_id: class_id.to_string(),
                        by: "warden".to_string(),
                        at: now,
                        reason: AUTO_SUSPEND_REASON.to_string(),
                    }),
                )?;
                Ok(())
            })
    }

    /// Every class with its current definition and activation state.
    pub fn class_statuses(&self) -> Result<Vec<ClassStatus>> {
        let mut statuses = Vec::new();
        for (class_id, record) in self.store.latest_all(family::DELEGATED_CLASSES)? {
            let definition: DelegatedClassDefinition = serde_json::from_value(record.body)?;
            let latest = latest_record::<DelegationEvent>(
                &*self.store,
                family::DELEGATION_EVENTS,
                &class_id,
            )?;
            let status = match latest {
                Some((_, DelegationEvent::Approval(approval))) => ClassStatus {
                    class_id,
                    pattern: definition.pattern,
                    active: true,
                    scope: Some(approval.scope),
                    last_event_at: Some(approval.at),
                    revocation_reason: None,
                },
                Some((_, DelegationEvent::Revocation(revocation))) => ClassStatus {
                    class_id,
                    pattern: definition.pattern,
                    active: false,
                    scope: None,
                    last_event_at: Some(revocation.at),
                    revocation_reason: Some(revocation.reason),
                },
                None => ClassStatus {
                    class_id,
                    pattern: definition.pattern,
                    active: false,
                    scope: None,
                    last_event_at: None,
                    revocation_reason: None,
                },
            };
            statuses.push(status);
        }
        statuses.sort_by(|a, b| a.class_id.cmp(&b.class_id));
        Ok(statuses)
    }
}
