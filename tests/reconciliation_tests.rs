//! End-to-end tests of the per-target state machine against in-memory fakes

mod common;

use common::{config_map, target, Harness};
use configsync_controller::controller::reconciler::{
    DriftOutcome, Phase, ReconcilerError, SyncOutcome, TargetMachine,
};
use configsync_controller::crd::{ConditionStatus, ConditionType, ConfigSyncStatus};
use serde_json::json;

fn two_maps(a: &str, b: &str) -> Vec<(&'static str, String)> {
    vec![
        ("envs/team-a/a.yaml", config_map("a", a)),
        ("envs/team-a/b.yaml", config_map("b", b)),
    ]
}

fn status(h: &Harness) -> ConfigSyncStatus {
    h.store
        .get(&target("team-a", "app").key)
        .expect("status was written")
}

fn reason(status: &ConfigSyncStatus, condition: ConditionType) -> String {
    status
        .condition(condition)
        .map(|c| c.reason.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_fresh_target_applies_everything_and_becomes_ready() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    let outcome = machine.sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Succeeded {
            revision: "r1".into(),
            applied: 2,
            unchanged: 0
        }
    );
    assert_eq!(h.cluster.apply_count("a"), 1);
    assert_eq!(h.cluster.apply_count("b"), 1);
    assert_eq!(machine.phase(), Phase::Idle);
    assert_eq!(machine.applied().count(), 2);

    let status = status(&h);
    assert_eq!(status.last_synced_revision, "r1");
    assert!(status.last_sync_time.is_some());
    assert!(status.is_true(ConditionType::Ready));
    assert!(status.is_true(ConditionType::Synced));
    assert!(!status.is_true(ConditionType::Error));

    let live = h.cluster.live("a").expect("a applied");
    assert_eq!(live["metadata"]["namespace"], json!("team-a"));
}

#[tokio::test]
async fn test_unchanged_source_applies_nothing() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;
    let applies = h.cluster.total_applies();
    let saves = h.store.save_count();

    let outcome = machine.sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Unchanged {
            revision: "r1".into()
        }
    );
    assert_eq!(h.cluster.total_applies(), applies);
    assert_eq!(h.store.save_count(), saves);
}

#[tokio::test]
async fn test_new_revision_only_writes_changed_objects() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.source.commit("r2", &two_maps("1", "2"));
    let outcome = machine.sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Succeeded {
            revision: "r2".into(),
            applied: 1,
            unchanged: 1
        }
    );
    assert_eq!(h.cluster.writes(), 3);
    assert_eq!(status(&h).last_synced_revision, "r2");
}

#[tokio::test]
async fn test_reapplying_after_lost_state_reports_unchanged() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    TargetMachine::new(h.ctx.clone()).sync(&t).await;

    // A fresh machine with an empty sync state sees r1 as new
    h.store.insert(t.key.clone(), ConfigSyncStatus::default());
    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Succeeded {
            revision: "r1".into(),
            applied: 0,
            unchanged: 2
        }
    );
    assert_eq!(h.cluster.writes(), 2);
}

#[tokio::test]
async fn test_partial_failure_keeps_revision_and_retry_completes() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    h.cluster.fail_object("b", "admission webhook denied the request");
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    let outcome = machine.sync(&t).await;

    let SyncOutcome::PartiallyFailed { revision, failures } = &outcome else {
        panic!("expected a partial failure, got {outcome:?}");
    };
    assert_eq!(revision, "r1");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key.name, "b");
    assert!(outcome.needs_backoff());

    let failed = status(&h);
    assert_eq!(failed.last_synced_revision, "");
    assert!(failed.is_true(ConditionType::Error));
    assert!(!failed.is_true(ConditionType::Ready));
    assert_eq!(reason(&failed, ConditionType::Synced), "PartiallyFailed");
    assert!(failed
        .condition(ConditionType::Error)
        .is_some_and(|c| c.message.contains("admission webhook denied")));

    h.cluster.heal_object("b");
    let retry = machine.sync(&t).await;

    assert_eq!(
        retry,
        SyncOutcome::Succeeded {
            revision: "r1".into(),
            applied: 1,
            unchanged: 1
        }
    );
    let healed = status(&h);
    assert_eq!(healed.last_synced_revision, "r1");
    assert!(healed.is_true(ConditionType::Ready));
    assert!(!healed.is_true(ConditionType::Error));
}

#[tokio::test]
async fn test_invalid_revision_is_rejected_without_applying() {
    let h = Harness::new();
    h.source.commit("abc1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;
    let applies = h.cluster.total_applies();

    h.validator.reject("b");
    h.source.commit("abc2", &two_maps("2", "2"));
    let outcome = machine.sync(&t).await;

    let SyncOutcome::Failed(ReconcilerError::ValidationFailed { revision, failures }) = &outcome
    else {
        panic!("expected a validation failure, got {outcome:?}");
    };
    assert_eq!(revision, "abc2");
    assert_eq!(failures[0].key.name, "b");
    assert!(!outcome.needs_backoff());
    assert_eq!(h.cluster.total_applies(), applies);
    assert_eq!(h.cluster.live("a").unwrap()["data"]["value"], json!("1"));

    let rejected = status(&h);
    assert_eq!(rejected.last_synced_revision, "abc1");
    assert_eq!(reason(&rejected, ConditionType::Synced), "ValidationFailed");
    assert_eq!(reason(&rejected, ConditionType::Ready), "ValidationFailed");
    assert!(!rejected.is_true(ConditionType::Ready));

    // The same revision is not reloaded and the status is not rewritten
    let saves = h.store.save_count();
    let again = machine.sync(&t).await;
    assert_eq!(again, outcome);
    assert_eq!(h.cluster.total_applies(), applies);
    assert_eq!(h.store.save_count(), saves);

    // A fixed revision goes through
    h.validator.allow("b");
    h.source.commit("abc3", &two_maps("3", "3"));
    let outcome = machine.sync(&t).await;
    assert!(matches!(outcome, SyncOutcome::Succeeded { applied: 2, .. }));
    assert!(status(&h).is_true(ConditionType::Ready));
}

#[tokio::test]
async fn test_unparseable_manifest_fails_the_whole_revision() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[
            ("envs/team-a/a.yaml", config_map("a", "1")),
            ("envs/team-a/broken.yaml", "kind: [unclosed".to_string()),
        ],
    );
    let t = target("team-a", "app");

    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert!(matches!(
        outcome,
        SyncOutcome::Failed(ReconcilerError::ManifestInvalid { .. })
    ));
    assert_eq!(h.cluster.total_applies(), 0);
    assert_eq!(reason(&status(&h), ConditionType::Synced), "ManifestInvalid");
}

#[tokio::test]
async fn test_missing_path_is_reported() {
    let h = Harness::new();
    h.source
        .commit("r1", &[("envs/other/a.yaml", config_map("a", "1"))]);
    let t = target("team-a", "app");

    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Failed(ReconcilerError::PathNotFound {
            path: "envs/team-a".into(),
            revision: "r1".into()
        })
    );
    assert_eq!(reason(&status(&h), ConditionType::Ready), "PathNotFound");
}

#[tokio::test]
async fn test_unreachable_source_keeps_last_sync() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.source.set_unreachable(true);
    let outcome = machine.sync(&t).await;

    assert!(matches!(
        outcome,
        SyncOutcome::Failed(ReconcilerError::SourceUnreachable(_))
    ));
    assert!(outcome.needs_backoff());
    let failed = status(&h);
    assert_eq!(failed.last_synced_revision, "r1");
    assert!(failed.is_true(ConditionType::Synced));
    assert_eq!(reason(&failed, ConditionType::Error), "SourceUnreachable");
    assert!(!failed.is_true(ConditionType::Ready));

    h.source.set_unreachable(false);
    let recovered = machine.sync(&t).await;
    assert!(matches!(recovered, SyncOutcome::Unchanged { .. }));
    assert!(status(&h).is_true(ConditionType::Ready));
}

#[tokio::test]
async fn test_unavailable_validator_is_retryable() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    h.validator.set_unavailable(true);
    let t = target("team-a", "app");

    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert!(matches!(
        outcome,
        SyncOutcome::Failed(ReconcilerError::ValidatorUnavailable(_))
    ));
    assert!(outcome.needs_backoff());
    assert_eq!(h.cluster.total_applies(), 0);
}

#[tokio::test]
async fn test_status_store_failure_surfaces_as_outcome() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    h.store.set_fail_saves(true);
    let t = target("team-a", "app");

    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert!(matches!(
        outcome,
        SyncOutcome::Failed(ReconcilerError::StatusStore(_))
    ));
    assert!(outcome.needs_backoff());
}

#[tokio::test]
async fn test_drift_without_approval_is_only_reported() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;
    let applies = h.cluster.total_applies();

    h.cluster
        .edit_live("a", |live| live["data"]["value"] = json!("hand-edited"));
    let outcome = machine.scan_drift(&t).await;

    let DriftOutcome::AwaitingApproval { drifted } = &outcome else {
        panic!("expected drift awaiting approval, got {outcome:?}");
    };
    assert_eq!(drifted.len(), 1);
    assert_eq!(drifted[0].key.name, "a");
    assert!(!drifted[0].is_missing());
    assert_eq!(h.cluster.total_applies(), applies);
    assert_eq!(
        h.cluster.live("a").unwrap()["data"]["value"],
        json!("hand-edited")
    );

    let drifted_status = status(&h);
    assert!(drifted_status.is_true(ConditionType::Drifted));
    assert_eq!(
        reason(&drifted_status, ConditionType::Drifted),
        "AwaitingApproval"
    );
    assert!(!drifted_status.is_true(ConditionType::Ready));
    assert_eq!(drifted_status.last_synced_revision, "r1");
}

#[tokio::test]
async fn test_drift_with_approval_is_remediated_once() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let mut t = target("team-a", "app");
    t.auto_approve = true;
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;
    let applies_a = h.cluster.apply_count("a");
    let applies_b = h.cluster.apply_count("b");

    h.cluster
        .edit_live("a", |live| live["data"]["value"] = json!("hand-edited"));
    let outcome = machine.scan_drift(&t).await;

    assert!(matches!(outcome, DriftOutcome::Remediated { ref drifted } if drifted.len() == 1));
    assert_eq!(h.cluster.apply_count("a"), applies_a + 1);
    assert_eq!(h.cluster.apply_count("b"), applies_b);
    assert_eq!(h.cluster.live("a").unwrap()["data"]["value"], json!("1"));

    let remediated = status(&h);
    assert_eq!(
        remediated
            .condition(ConditionType::Drifted)
            .map(|c| (c.status, c.reason.as_str())),
        Some((ConditionStatus::False, "Remediated"))
    );
    assert!(remediated.is_true(ConditionType::Ready));

    assert_eq!(machine.scan_drift(&t).await, DriftOutcome::Clean);
    assert_eq!(h.cluster.apply_count("a"), applies_a + 1);
}

#[tokio::test]
async fn test_deleted_object_is_drift() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let mut t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.cluster.delete_live("b");
    let outcome = machine.scan_drift(&t).await;
    let DriftOutcome::AwaitingApproval { drifted } = &outcome else {
        panic!("expected drift awaiting approval, got {outcome:?}");
    };
    assert!(drifted[0].is_missing());
    assert!(h.cluster.live("b").is_none());

    t.auto_approve = true;
    let outcome = machine.scan_drift(&t).await;
    assert!(matches!(outcome, DriftOutcome::Remediated { .. }));
    assert!(h.cluster.live("b").is_some());
}

#[tokio::test]
async fn test_failed_remediation_is_reported() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let mut t = target("team-a", "app");
    t.auto_approve = true;
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.cluster
        .edit_live("a", |live| live["data"]["value"] = json!("hand-edited"));
    h.cluster.fail_object("a", "forbidden");
    let outcome = machine.scan_drift(&t).await;

    let DriftOutcome::RemediationFailed { failures, .. } = &outcome else {
        panic!("expected failed remediation, got {outcome:?}");
    };
    assert_eq!(failures[0].key.name, "a");
    assert_eq!(
        reason(&status(&h), ConditionType::Drifted),
        "RemediationFailed"
    );
}

#[tokio::test]
async fn test_drift_scan_after_restart_uses_tracked_revision() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    TargetMachine::new(h.ctx.clone()).sync(&t).await;

    h.cluster
        .edit_live("b", |live| live["data"]["value"] = json!("hand-edited"));
    let mut restarted = TargetMachine::new(h.ctx.clone());
    let outcome = restarted.scan_drift(&t).await;

    assert!(
        matches!(outcome, DriftOutcome::AwaitingApproval { ref drifted } if drifted[0].key.name == "b")
    );
}

#[tokio::test]
async fn test_drift_scan_skipped_when_disabled_or_never_synced() {
    let h = Harness::new();
    let mut t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    assert_eq!(machine.scan_drift(&t).await, DriftOutcome::Skipped);

    h.source.commit("r1", &two_maps("1", "1"));
    machine.sync(&t).await;
    t.drift_detection = false;
    h.cluster.delete_live("a");
    assert_eq!(machine.scan_drift(&t).await, DriftOutcome::Skipped);
}

#[tokio::test]
async fn test_server_populated_fields_are_not_drift() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.cluster.edit_live("a", |live| {
        live["metadata"]["resourceVersion"] = json!("4711");
        live["metadata"]["uid"] = json!("0b5c");
        live["status"] = json!({"observed": true});
    });

    assert_eq!(machine.scan_drift(&t).await, DriftOutcome::Clean);
}

#[tokio::test]
async fn test_invalidate_forces_reload_of_same_revision() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    h.cluster.delete_live("a");
    machine.invalidate();
    let outcome = machine.sync(&t).await;

    assert_eq!(
        outcome,
        SyncOutcome::Succeeded {
            revision: "r1".into(),
            applied: 1,
            unchanged: 1
        }
    );
    assert!(matches!(
        machine.sync(&t).await,
        SyncOutcome::Unchanged { .. }
    ));
}

#[tokio::test]
async fn test_path_change_while_down_is_synced_after_restart() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[
            ("envs/team-a/a.yaml", config_map("a", "1")),
            ("envs/team-b/b.yaml", config_map("b", "1")),
        ],
    );
    let mut t = target("team-a", "app");
    TargetMachine::new(h.ctx.clone()).sync(&t).await;
    assert_eq!(
        status(&h).last_synced_source,
        "https://example.com/config.git#main:envs/team-a"
    );

    // Edited while no controller was running, same commit upstream
    t.path = "envs/team-b".into();
    let mut restarted = TargetMachine::new(h.ctx.clone());

    // The old path's objects are not scanned against the new path
    assert_eq!(restarted.scan_drift(&t).await, DriftOutcome::Skipped);
    assert_eq!(h.cluster.apply_count("b"), 0);

    let outcome = restarted.sync(&t).await;
    assert_eq!(
        outcome,
        SyncOutcome::Succeeded {
            revision: "r1".into(),
            applied: 1,
            unchanged: 0
        }
    );
    assert_eq!(h.cluster.apply_count("b"), 1);

    let synced = status(&h);
    assert_eq!(synced.last_synced_revision, "r1");
    assert_eq!(
        synced.last_synced_source,
        "https://example.com/config.git#main:envs/team-b"
    );
    assert!(matches!(
        restarted.sync(&t).await,
        SyncOutcome::Unchanged { .. }
    ));
}

#[tokio::test]
async fn test_failed_sync_of_new_path_is_retried_after_restart() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[
            ("envs/team-a/a.yaml", config_map("a", "1")),
            ("envs/team-b/b.yaml", config_map("b", "1")),
        ],
    );
    let mut t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());
    machine.sync(&t).await;

    t.path = "envs/team-b".into();
    machine.invalidate();
    h.cluster.fail_object("b", "admission webhook denied");
    assert!(matches!(
        machine.sync(&t).await,
        SyncOutcome::PartiallyFailed { .. }
    ));

    h.cluster.heal_object("b");
    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;
    assert!(matches!(outcome, SyncOutcome::Succeeded { .. }));
    assert_eq!(h.cluster.writes(), 2);
}

#[tokio::test]
async fn test_cluster_scoped_kinds_resolved_through_discovery() {
    let h = Harness::new();
    h.cluster.serve_kind("ClusterIssuer", false);
    h.cluster.serve_kind("ConfigMap", true);
    h.source.commit(
        "r1",
        &[
            (
                "envs/team-a/issuer.yaml",
                "apiVersion: cert-manager.io/v1\nkind: ClusterIssuer\nmetadata:\n  name: letsencrypt\nspec:\n  acme: {}\n"
                    .to_string(),
            ),
            (
                "envs/team-a/widgets.yaml",
                "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.example.com\nspec:\n  group: example.com\n  scope: Cluster\n  names:\n    kind: Widget\n    plural: widgets\n---\napiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: gizmo\n"
                    .to_string(),
            ),
            ("envs/team-a/a.yaml", config_map("a", "1")),
        ],
    );
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    assert!(matches!(
        machine.sync(&t).await,
        SyncOutcome::Succeeded { applied: 4, .. }
    ));

    for name in ["letsencrypt", "gizmo"] {
        let live = h.cluster.live(name).expect("applied");
        assert!(live["metadata"].get("namespace").is_none(), "{name}");
    }
    assert_eq!(h.cluster.live("a").unwrap()["metadata"]["namespace"], "team-a");
    assert!(machine
        .applied()
        .filter(|o| o.key.kind != "ConfigMap")
        .all(|o| o.key.namespace.is_empty()));

    assert_eq!(machine.scan_drift(&t).await, DriftOutcome::Clean);
    assert!(matches!(
        TargetMachine::new(h.ctx.clone()).scan_drift(&t).await,
        DriftOutcome::Clean
    ));
}

const KUSTOMIZATION: &str = "resources:\n  - base\n";

#[tokio::test]
async fn test_kustomization_root_is_rendered() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[
            ("envs/team-a/kustomization.yaml", KUSTOMIZATION.to_string()),
            ("envs/team-a/base/raw.yaml", config_map("raw", "unrendered")),
        ],
    );
    h.source.set_rendered(Ok(format!(
        "{}---\n{}",
        config_map("a", "rendered"),
        config_map("b", "rendered")
    )));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    let outcome = machine.sync(&t).await;

    assert!(matches!(outcome, SyncOutcome::Succeeded { applied: 2, .. }));
    assert_eq!(h.source.render_count(), 1);
    assert_eq!(h.cluster.apply_count("raw"), 0);
    assert_eq!(h.cluster.live("a").unwrap()["data"]["value"], "rendered");
    assert!(machine
        .applied()
        .all(|o| o.source_file == "envs/team-a/kustomization.yaml"));
}

#[tokio::test]
async fn test_failed_kustomize_build_rejects_the_revision() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[("envs/team-a/kustomization.yaml", KUSTOMIZATION.to_string())],
    );
    h.source
        .set_rendered(Err("accumulating resources: base: no such directory".into()));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    let outcome = machine.sync(&t).await;

    let SyncOutcome::Failed(ReconcilerError::ManifestInvalid {
        revision,
        reason: message,
    }) = &outcome
    else {
        panic!("expected ManifestInvalid, got {outcome:?}");
    };
    assert_eq!(revision, "r1");
    assert!(message.contains("accumulating resources"));
    assert_eq!(h.cluster.total_applies(), 0);
    assert_eq!(reason(&status(&h), ConditionType::Error), "ManifestInvalid");
}

#[tokio::test]
async fn test_nested_kustomization_files_are_skipped() {
    let h = Harness::new();
    h.source.commit(
        "r1",
        &[
            ("envs/team-a/a.yaml", config_map("a", "1")),
            ("envs/team-a/overlay/kustomization.yaml", KUSTOMIZATION.to_string()),
        ],
    );
    let t = target("team-a", "app");

    let outcome = TargetMachine::new(h.ctx.clone()).sync(&t).await;

    assert!(matches!(outcome, SyncOutcome::Succeeded { applied: 1, .. }));
    assert_eq!(h.source.render_count(), 0);
}

#[tokio::test]
async fn test_dropped_cycle_returns_to_idle() {
    let h = Harness::new();
    h.source.commit("r1", &two_maps("1", "1"));
    h.cluster.set_delay(std::time::Duration::from_millis(200));
    let t = target("team-a", "app");
    let mut machine = TargetMachine::new(h.ctx.clone());

    let dropped =
        tokio::time::timeout(std::time::Duration::from_millis(50), machine.sync(&t)).await;
    assert!(dropped.is_err());
    assert_eq!(machine.phase(), Phase::Applying);
    assert!(h.store.get(&t.key).is_none());

    machine.abandon_cycle();
    assert_eq!(machine.phase(), Phase::Idle);

    h.cluster.set_delay(std::time::Duration::ZERO);
    assert!(matches!(
        machine.sync(&t).await,
        SyncOutcome::Succeeded { .. }
    ));
    assert_eq!(machine.phase(), Phase::Idle);
}
