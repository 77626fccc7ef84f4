use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use warden_approval::{ExecutionPlan, PlanStep};
use warden_config::{JobConfig, WardenConfig};
use warden_confidence::{ConfidenceFeatures, SimulatedPolicyDecision};
use warden_core::{AutonomyMode, NormalizedCommand, ReceiptKind, ReceiptStatus};
use warden_delegation::{
    DelegatedClassDefinition, DelegationScope, PromotionCriteria, PromotionRecord,
    AUTO_SUSPEND_REASON,
};
use warden_engine::{
    CommandRequest, Decision, OutcomeReport, Pipeline, QueueKind, RunOutcome, ScheduledDecision,
};
use warden_governor::{BreachCounts, ThrottleCode};
use warden_scheduler::SchedulerJob;
use warden_store::SqliteStore;

fn pipeline() -> Pipeline {
    Pipeline::new(
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        &WardenConfig::default(),
    )
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn status_command() -> NormalizedCommand {
    NormalizedCommand::new("/notion set pg_999 Status=Done", "notion")
}

fn plan_for(command: &NormalizedCommand, read_only: bool) -> ExecutionPlan {
    ExecutionPlan {
        execution_id: Uuid::new_v4(),
        goal: format!("execute {}", command.text),
        required_capabilities: vec!["notion.write".into()],
        steps: vec![PlanStep {
            step_id: "s1".into(),
            action: "set_status".into(),
            adapter: "notion".into(),
            read_only,
            payload: serde_json::json!({"page": "pg_999"}),
            idempotency_key: format!("idem-{}", Uuid::new_v4()),
        }],
    }
}

fn request(command: &NormalizedCommand, read_only: bool) -> CommandRequest {
    CommandRequest {
        command: command.clone(),
        plan: plan_for(command, read_only),
        prestates: BTreeMap::new(),
        mode: AutonomyMode::ApprovalGated,
        thread_id: None,
        kind: ReceiptKind::Command,
    }
}

fn good_features() -> ConfidenceFeatures {
    ConfidenceFeatures {
        autonomy_mode: AutonomyMode::AutoRun,
        capability_set: vec!["notion.write".into()],
        capabilities_resolved: true,
        policy_decision: SimulatedPolicyDecision::Allow,
        runs_observed: 20,
        rollbacks_observed: 0,
    }
}

fn regressed_features() -> ConfidenceFeatures {
    ConfidenceFeatures {
        rollbacks_observed: 10,
        ..good_features()
    }
}

/// Define, approve, and promote the notion-status-updates class so the
/// command qualifies for auto-run once confidence is on file.
fn delegate_status_updates(pipeline: &Pipeline, now: DateTime<Utc>) {
    let definition = DelegatedClassDefinition {
        class_id: "notion-status-updates".into(),
        pattern: "/notion set pg_* Status=*".into(),
        capabilities: vec!["notion.write".into()],
        adapter: "notion".into(),
        write: true,
        created_at: now,
    };
    pipeline.delegation().define_class(&definition).unwrap();
    pipeline
        .delegation()
        .approve_class(
            "notion-status-updates",
            "operator",
            DelegationScope {
                autonomy_mode: AutonomyMode::AutoRun,
                confidence_min: 90.0,
                promotion_required: true,
            },
            now,
        )
        .unwrap();
    pipeline
        .delegation()
        .record_promotion(&PromotionRecord {
            fingerprint: PromotionRecord::key_for(
                &status_command().text,
                &definition.capabilities,
                &definition.adapter,
            ),
            command: status_command().text,
            criteria: PromotionCriteria {
                confidence_avg: 96.0,
                runs_observed: 20,
                regressions: 0,
            },
            previous_mode: AutonomyMode::ApprovalGated,
            new_mode: AutonomyMode::AutoRun,
            promoted_at: now,
        })
        .unwrap();
}

mod governor_gate {
    use super::*;

    #[test]
    fn burst_of_ten_then_throttled_with_retry() {
        let p = pipeline();
        let command = NormalizedCommand::new("/status report", "ops");
        let now = Utc::now();

        for _ in 0..10 {
            let decision = p.submit(&request(&command, true), now).unwrap();
            assert!(matches!(decision, Decision::Allowed { .. }));
        }

        match p.submit(&request(&command, true), now).unwrap() {
            Decision::Throttled { code, retry_at, .. } => {
                assert_eq!(code, ThrottleCode::TokenBucketEmpty);
                assert_eq!((retry_at - now).num_seconds(), 60);
            }
            other => panic!("expected Throttled, got {other:?}"),
        }

        // Eleven submissions, eleven receipts; the last one is throttled.
        let receipts = p.ledger().scan().unwrap();
        assert_eq!(receipts.len(), 11);
        assert_eq!(receipts[10].status, ReceiptStatus::Throttled);
    }

    #[test]
    fn seeded_breaker_short_circuits_with_open_until() {
        let p = pipeline();
        let command = NormalizedCommand::new("/status report", "ops");
        let now = Utc::now();
        let open_until = now + chrono::Duration::hours(1);
        p.governor()
            .open_breaker(
                &command.fingerprint(),
                now,
                chrono::Duration::hours(1),
                "manual stop",
                BreachCounts::default(),
            )
            .unwrap();

        match p.submit(&request(&command, true), now).unwrap() {
            Decision::Throttled { code, retry_at, .. } => {
                assert_eq!(code, ThrottleCode::CircuitBreakerOpen);
                assert_eq!(retry_at, open_until);
            }
            other => panic!("expected Throttled, got {other:?}"),
        }

        // First check past expiry is evaluated purely against the bucket.
        let after = open_until + chrono::Duration::seconds(1);
        assert!(matches!(
            p.submit(&request(&command, true), after).unwrap(),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn repeated_rollbacks_trip_the_breaker() {
        let p = pipeline();
        let command = NormalizedCommand::new("/sync calendar", "calendar");
        let now = Utc::now();

        for _ in 0..3 {
            p.record_outcome(
                &OutcomeReport {
                    execution_id: Uuid::new_v4(),
                    command: command.clone(),
                    kind: ReceiptKind::Command,
                    outcome: RunOutcome::RolledBack,
                    started_at: now,
                    finished_at: now,
                    thread_id: None,
                    plan_hash: None,
                    features: good_features(),
                },
                now,
            )
            .unwrap();
        }

        match p.submit(&request(&command, true), now).unwrap() {
            Decision::Throttled { code, .. } => {
                assert_eq!(code, ThrottleCode::CircuitBreakerOpen)
            }
            other => panic!("expected breaker throttle, got {other:?}"),
        }
    }
}

mod approval_path {
    use super::*;

    #[test]
    fn write_plan_without_delegation_parks_for_approval() {
        let p = pipeline();
        let command = status_command();
        let now = Utc::now();

        let req = request(&command, false);
        match p.submit(&req, now).unwrap() {
            Decision::ApprovalRequired { execution_id, .. } => {
                assert_eq!(execution_id, req.plan.execution_id);
            }
            other => panic!("expected ApprovalRequired, got {other:?}"),
        }

        let record = p.approvals().get(req.plan.execution_id).unwrap().unwrap();
        assert_eq!(record.plan_hash, req.plan.hash().unwrap());

        // Approving the identical plan releases it.
        p.approvals()
            .approve(req.plan.execution_id, &req.plan, now)
            .unwrap();
    }

    #[test]
    fn read_only_plan_passes_without_approval() {
        let p = pipeline();
        let now = Utc::now();
        let decision = p.submit(&request(&status_command(), true), now).unwrap();
        assert!(matches!(decision, Decision::Allowed { .. }));
        assert!(p.approvals().pending().unwrap().is_empty());
    }

    #[test]
    fn read_only_mode_denies_write_plans() {
        let p = pipeline();
        let now = Utc::now();
        let mut req = request(&status_command(), false);
        req.mode = AutonomyMode::ReadOnly;

        assert!(matches!(
            p.submit(&req, now).unwrap(),
            Decision::Denied { .. }
        ));
        let receipts = p.ledger().scan().unwrap();
        assert_eq!(receipts.last().unwrap().status, ReceiptStatus::Denied);
    }
}

mod delegated_autonomy {
    use super::*;

    #[test]
    fn promoted_confident_class_auto_runs_then_suspends_on_regression() {
        let p = pipeline();
        let command = status_command();
        let now = Utc::now();
        delegate_status_updates(&p, now);
        p.confidence().capture(&command, &good_features(), now).unwrap();

        // All four conditions hold: the write plan auto-runs.
        match p.submit(&request(&command, false), now).unwrap() {
            Decision::AutoRun { class_id, .. } => {
                assert_eq!(class_id, "notion-status-updates")
            }
            other => panic!("expected AutoRun, got {other:?}"),
        }

        // The run comes back regressed; record_outcome captures the drop,
        // flags it, and the supervisor revokes the class on the spot.
        p.record_outcome(
            &OutcomeReport {
                execution_id: Uuid::new_v4(),
                command: command.clone(),
                kind: ReceiptKind::Command,
                outcome: RunOutcome::Completed,
                started_at: now,
                finished_at: now,
                thread_id: None,
                plan_hash: None,
                features: regressed_features(),
            },
            now,
        )
        .unwrap();

        // Resubmitting the same command falls back to per-instance approval.
        assert!(matches!(
            p.submit(&request(&command, false), now).unwrap(),
            Decision::ApprovalRequired { .. }
        ));

        let statuses = p.active_classes().unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].active);
        assert_eq!(
            statuses[0].revocation_reason.as_deref(),
            Some(AUTO_SUSPEND_REASON)
        );
    }

    #[test]
    fn auto_run_appends_receipt_with_plan_hash() {
        let p = pipeline();
        let command = status_command();
        let now = Utc::now();
        delegate_status_updates(&p, now);
        p.confidence().capture(&command, &good_features(), now).unwrap();

        let req = request(&command, false);
        p.submit(&req, now).unwrap();

        let receipt = p
            .ledger()
            .latest_for_execution(req.plan.execution_id)
            .unwrap()
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::AutoRun);
        assert_eq!(receipt.plan_hash.as_deref(), Some(req.plan.hash().unwrap().as_str()));
    }
}

mod scheduled_runs {
    use super::*;

    fn daily_job() -> SchedulerJob {
        SchedulerJob::from(&JobConfig {
            job_id: "daily_scan".into(),
            command: "/scan inbox".into(),
            domain_scope: "email".into(),
            schedule: "0 0 0 * * *".into(),
            mode: 2,
        })
    }

    #[test]
    fn window_runs_once_then_skips_until_the_next_day() {
        let p = pipeline();
        let job = daily_job();
        let morning = at("2024-01-09T00:00:01Z");

        let plan = plan_for(&job.command, true);
        let ScheduledDecision::Evaluated {
            window_id,
            window_start,
            decision,
        } = p.run_scheduled(&job, plan.clone(), morning).unwrap()
        else {
            panic!("expected Evaluated");
        };
        assert_eq!(window_start, at("2024-01-09T00:00:00Z"));
        assert!(matches!(decision, Decision::Allowed { .. }));

        p.complete_scheduled(
            &job,
            &window_id,
            &OutcomeReport {
                execution_id: plan.execution_id,
                command: job.command.clone(),
                kind: ReceiptKind::ScheduledRun,
                outcome: RunOutcome::Completed,
                started_at: morning,
                finished_at: morning + chrono::Duration::seconds(30),
                thread_id: None,
                plan_hash: Some(plan.hash().unwrap()),
                features: good_features(),
            },
            morning,
        )
        .unwrap();

        // Same day: skipped, receipt says so, no second history entry.
        let afternoon = at("2024-01-09T14:00:00Z");
        let second = p
            .run_scheduled(&job, plan_for(&job.command, true), afternoon)
            .unwrap();
        assert_eq!(
            second,
            ScheduledDecision::Skipped {
                window_id: window_id.clone()
            }
        );
        let receipts = p.ledger().scan().unwrap();
        let skipped: Vec<_> = receipts
            .iter()
            .filter(|r| r.status == ReceiptStatus::Skipped)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].kind, ReceiptKind::ScheduledRun);

        // Next midnight: a fresh window runs again.
        let next_day = at("2024-01-10T00:00:05Z");
        assert!(matches!(
            p.run_scheduled(&job, plan_for(&job.command, true), next_day)
                .unwrap(),
            ScheduledDecision::Evaluated { .. }
        ));
    }

    #[test]
    fn throttled_window_is_not_consumed() {
        let p = pipeline();
        let job = daily_job();
        let morning = at("2024-01-09T06:00:00Z");

        // Drain the job command's bucket first.
        for _ in 0..10 {
            p.submit(&request(&job.command, true), morning).unwrap();
        }

        let ScheduledDecision::Evaluated { decision, .. } = p
            .run_scheduled(&job, plan_for(&job.command, true), morning)
            .unwrap()
        else {
            panic!("expected Evaluated");
        };
        assert!(matches!(decision, Decision::Throttled { .. }));

        // The window was never closed, so a retry still evaluates to Run.
        let retry = morning + chrono::Duration::minutes(5);
        assert!(matches!(
            p.run_scheduled(&job, plan_for(&job.command, true), retry)
                .unwrap(),
            ScheduledDecision::Evaluated { .. }
        ));
    }
}

mod operator_queue {
    use super::*;

    #[test]
    fn queue_ranks_regressions_approvals_then_jobs() {
        let p = pipeline();
        let now = at("2024-01-09T12:00:00Z");

        // An unacknowledged regression on a calendar command.
        let regressed = NormalizedCommand::new("/calendar sync", "calendar");
        p.confidence().capture(&regressed, &good_features(), now).unwrap();
        p.confidence()
            .capture(&regressed, &regressed_features(), now)
            .unwrap();
        p.confidence()
            .check_regression(&regressed.fingerprint(), now)
            .unwrap();

        // A pending approval on the notion command.
        let req = request(&status_command(), false);
        p.submit(&req, now).unwrap();

        // An auto-runnable job (delegated + promoted + confident) and a
        // plain waiting job.
        delegate_status_updates(&p, now);
        p.confidence()
            .capture(&status_command(), &good_features(), now)
            .unwrap();
        let auto_job = SchedulerJob::from(&JobConfig {
            job_id: "notion_status_sweep".into(),
            command: status_command().text,
            domain_scope: "notion".into(),
            schedule: "0 0 0 * * *".into(),
            mode: 3,
        });
        let waiting_job = SchedulerJob::from(&JobConfig {
            job_id: "weekly_report".into(),
            command: "/report weekly".into(),
            domain_scope: "ops".into(),
            schedule: "0 0 0 * * *".into(),
            mode: 2,
        });

        let queue = p
            .pending_queue(&[auto_job, waiting_job], now)
            .unwrap();
        let kinds: Vec<QueueKind> = queue.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                QueueKind::UnacknowledgedRegression,
                QueueKind::ApprovalRequired,
                QueueKind::AutoRunnableJob,
                QueueKind::WaitingJob,
            ]
        );
        assert_eq!(queue[2].job_id.as_deref(), Some("notion_status_sweep"));
    }

    #[test]
    fn confidence_breaks_ties_within_a_rank() {
        let p = pipeline();
        let now = Utc::now();

        let low = NormalizedCommand::new("/low confidence write", "ops");
        let high = NormalizedCommand::new("/high confidence write", "ops");
        p.confidence().capture(&high, &good_features(), now).unwrap();

        p.submit(&request(&low, false), now).unwrap();
        p.submit(&request(&high, false), now).unwrap();

        let queue = p.pending_queue(&[], now).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].fingerprint, high.fingerprint());
        assert!(queue[0].confidence > queue[1].confidence);
    }
}

mod ledger_properties {
    use super::*;

    #[test]
    fn ledger_only_grows_and_lines_never_change() {
        let p = pipeline();
        let now = Utc::now();
        let command = status_command();

        let mut lengths = Vec::new();
        p.submit(&request(&command, true), now).unwrap();
        lengths.push(p.ledger().len().unwrap());
        p.submit(&request(&command, false), now).unwrap();
        lengths.push(p.ledger().len().unwrap());
        let first_snapshot = p.ledger().scan().unwrap();

        p.record_outcome(
            &OutcomeReport {
                execution_id: Uuid::new_v4(),
                command: command.clone(),
                kind: ReceiptKind::Command,
                outcome: RunOutcome::Completed,
                started_at: now,
                finished_at: now,
                thread_id: None,
                plan_hash: None,
                features: good_features(),
            },
            now,
        )
        .unwrap();
        lengths.push(p.ledger().len().unwrap());

        assert!(lengths.windows(2).all(|w| w[0] < w[1]));
        let final_snapshot = p.ledger().scan().unwrap();
        assert_eq!(&final_snapshot[..first_snapshot.len()], &first_snapshot[..]);
        assert!(p.ledger().verify().unwrap().is_empty());
    }
}
