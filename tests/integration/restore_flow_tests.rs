//! End-to-end snapshot and restore flows over in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use confsnap::errors::{MutationState, RestoreStep};
use confsnap::models::{HistoryOutcome, SnapshotKind, SummaryValue};
use confsnap::orchestrator::diff_preview::DiffEntry;
use confsnap::orchestrator::snapshot_manager::{
    prompt_for_approval, AppliedRestore, PreviewGate, RestoreOptions, RestoreOutcome,
    RestorePreview,
};
use confsnap::persistence::SnapshotCodec;
use confsnap::remote::MemoryConfigurationService;
use confsnap::store::{self, BlobStore};
use confsnap::summary::JsonSummaryExtractor;
use confsnap::SnapshotManager;

use super::test_helpers::{harness_with, json, FaultyStore, ScriptedService, TARGET};

struct Decline;

impl PreviewGate for Decline {
    fn approve(&self, _preview: &RestorePreview) -> bool {
        false
    }
}

fn applied(outcome: RestoreOutcome) -> AppliedRestore {
    match outcome {
        RestoreOutcome::Applied(applied) => applied,
        RestoreOutcome::Declined(_) => panic!("restore was declined"),
    }
}

#[tokio::test]
async fn restore_returns_live_configuration_to_snapshot_payload() {
    let original = r#"{"origins":["a","b"],"compress":true,"ttl":86400}"#;
    let h = harness_with(original);

    let snapshot = h
        .manager
        .create_snapshot(TARGET, "baseline")
        .await
        .expect("create snapshot");
    h.remote
        .write_out_of_band(TARGET, json(r#"{"origins":["a"],"compress":false}"#))
        .expect("mutate live");

    let outcome = h
        .manager
        .restore(TARGET, &snapshot.id, RestoreOptions::default())
        .await
        .expect("restore");

    let applied = applied(outcome);
    assert!(applied.validation.success);
    assert_eq!(
        h.remote.current(TARGET).unwrap().unwrap().as_bytes(),
        original.as_bytes()
    );
}

#[tokio::test]
async fn concrete_scenario_diffs_backs_up_validates_and_records() {
    let h = harness_with(r#"{"flag":1,"count":3}"#);

    let a = h
        .manager
        .create_snapshot(TARGET, "before change")
        .await
        .expect("create A");
    assert_eq!(a.description, "before change");
    assert_eq!(a.kind, SnapshotKind::Manual);

    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":0,"count":3}"#))
        .expect("mutate live");

    let applied = applied(
        h.manager
            .restore(TARGET, &a.id, RestoreOptions::default())
            .await
            .expect("restore A"),
    );

    let diff = applied.diff.expect("preview diff");
    let changed: Vec<DiffEntry> = diff.changed().cloned().collect();
    assert_eq!(
        changed,
        vec![DiffEntry {
            field: "flag".into(),
            before: Some(SummaryValue::Number(0)),
            after: Some(SummaryValue::Number(1)),
            changed: true,
        }]
    );

    let safety = applied.safety_snapshot.expect("safety snapshot B");
    assert_eq!(safety.kind, SnapshotKind::Safety);
    assert_ne!(safety.id, a.id);
    assert_eq!(safety.summary_fields.get("flag"), Some(&SummaryValue::Number(0)));

    assert!(applied.validation.success);
    assert!(applied.validation.mismatches.is_empty());
    assert_eq!(applied.outcome, HistoryOutcome::Succeeded);

    let history = h.manager.list_history(TARGET, 10).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, HistoryOutcome::Succeeded);
    assert_eq!(history[0].snapshot_id, a.id);
    assert_eq!(history[0].safety_snapshot_id.as_deref(), Some(safety.id.as_str()));

    let listed = h.manager.list_snapshots(TARGET).await.expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, safety.id, "newest first");
}

#[tokio::test]
async fn safety_snapshot_restores_the_pre_restore_state() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "one").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":2}"#))
        .unwrap();

    let safety = applied(
        h.manager
            .restore(TARGET, &a.id, RestoreOptions::default())
            .await
            .unwrap(),
    )
    .safety_snapshot
    .unwrap();

    h.manager
        .restore(TARGET, &safety.id, RestoreOptions::default())
        .await
        .expect("undo");
    assert_eq!(
        h.remote.current(TARGET).unwrap().unwrap().as_bytes(),
        br#"{"flag":2}"#
    );
}

#[tokio::test]
async fn declined_preview_applies_nothing_and_records_nothing() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":0}"#))
        .unwrap();

    let manager = h.manager.with_preview_gate(Arc::new(Decline));
    let outcome = manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect("declined restore is not an error");

    let RestoreOutcome::Declined(preview) = outcome else {
        panic!("expected a declined outcome");
    };
    assert!(preview.diff.has_changes());
    assert_eq!(h.remote.apply_calls().unwrap(), 0);
    assert_eq!(
        h.remote.current(TARGET).unwrap().unwrap().as_bytes(),
        br#"{"flag":0}"#
    );
    assert!(manager.list_history(TARGET, 10).await.unwrap().is_empty());
    assert_eq!(manager.list_snapshots(TARGET).await.unwrap().len(), 1);
}

#[tokio::test]
async fn forced_restore_skips_preview_gate_and_safety_backup_when_asked() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":0}"#))
        .unwrap();

    let manager = h.manager.with_preview_gate(Arc::new(Decline));
    let applied = applied(
        manager
            .restore(
                TARGET,
                &a.id,
                RestoreOptions {
                    force_without_preview: true,
                    skip_safety_backup: true,
                },
            )
            .await
            .expect("forced restore"),
    );

    assert!(applied.diff.is_none());
    assert!(applied.safety_snapshot.is_none());
    assert_eq!(manager.list_snapshots(TARGET).await.unwrap().len(), 1);
    assert_eq!(
        manager.list_history(TARGET, 1).await.unwrap()[0].safety_snapshot_id,
        None
    );
}

#[tokio::test]
async fn preview_restore_has_no_side_effects() {
    let h = harness_with(r#"{"flag":1,"count":3}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":1,"count":4}"#))
        .unwrap();
    let blobs_before = h.store.len().unwrap();

    let preview = h.manager.preview_restore(TARGET, &a.id).await.unwrap();

    let fields: Vec<&str> = preview.diff.changed().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["count"]);
    assert_eq!(h.store.len().unwrap(), blobs_before);
    assert_eq!(h.remote.apply_calls().unwrap(), 0);
}

#[tokio::test]
async fn unknown_snapshot_fails_before_any_mutation() {
    let h = harness_with(r#"{"flag":1}"#);

    let err = h
        .manager
        .restore(TARGET, "20200101T000000.000000000Z", RestoreOptions::default())
        .await
        .expect_err("missing snapshot");

    assert!(err.is_not_found());
    let failure = err.restore_failure().expect("restore context");
    assert_eq!(failure.step, RestoreStep::LoadSnapshot);
    assert_eq!(failure.mutation, MutationState::NotApplied);
    assert_eq!(h.remote.apply_calls().unwrap(), 0);
    assert!(h.manager.list_history(TARGET, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn catalogued_snapshot_with_missing_blob_is_not_found() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.store
        .delete(&store::snapshot_key(TARGET, &a.id))
        .await
        .unwrap();

    let err = h
        .manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect_err("blob gone");

    assert!(err.is_not_found());
    let failure = err.restore_failure().expect("restore context");
    assert_eq!(failure.step, RestoreStep::LoadSnapshot);
    assert_eq!(failure.mutation, MutationState::NotApplied);
    assert_eq!(h.remote.apply_calls().unwrap(), 0);
    assert!(h.manager.list_history(TARGET, 10).await.unwrap().is_empty());
    assert_eq!(h.manager.list_snapshots(TARGET).await.unwrap().len(), 1);
}

#[tokio::test]
async fn history_write_failure_after_rejected_apply_is_reported() {
    let remote = Arc::new(MemoryConfigurationService::new());
    remote.insert(TARGET, json(r#"{"flag":1}"#)).unwrap();
    let faulty = Arc::new(FaultyStore::default());
    let manager = SnapshotManager::new(
        remote.clone(),
        faulty.clone(),
        Arc::new(JsonSummaryExtractor::top_level()),
    );
    let a = manager.create_snapshot(TARGET, "a").await.unwrap();

    remote
        .interfere_before_next_apply(TARGET, json(r#"{"flag":9}"#))
        .unwrap();
    faulty.fail_puts_containing("history/");
    let err = manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect_err("stale token");

    assert!(err.is_conflict());
    let failure = err.restore_failure().expect("restore context");
    assert_eq!(failure.step, RestoreStep::Apply);
    let history_error = failure.history_error.as_deref().expect("history failure noted");
    assert!(history_error.contains("injected put failure"));
    assert!(err.to_string().contains("attempt not recorded in history"));

    faulty.heal();
    assert!(manager.list_history(TARGET, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn prompt_approves_only_an_explicit_yes() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote.write_out_of_band(TARGET, json(r#"{"flag":0}"#)).unwrap();
    let preview = h.manager.preview_restore(TARGET, &a.id).await.unwrap();

    let mut shown = Vec::new();
    assert!(prompt_for_approval(&preview, &mut &b"y\n"[..], &mut shown));
    let shown = String::from_utf8(shown).unwrap();
    assert!(shown.contains(&a.id));
    assert!(shown.contains("flag: 0 -> 1"));

    assert!(!prompt_for_approval(&preview, &mut &b"n\n"[..], &mut Vec::<u8>::new()));
    assert!(!prompt_for_approval(&preview, &mut &b""[..], &mut Vec::<u8>::new()));
}

struct BrokenTerminal;

impl std::io::Write for BrokenTerminal {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn prompt_that_cannot_be_shown_declines() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    let preview = h.manager.preview_restore(TARGET, &a.id).await.unwrap();

    assert!(!prompt_for_approval(&preview, &mut &b"yes\n"[..], &mut BrokenTerminal));
}

#[tokio::test]
async fn malformed_snapshot_id_is_a_validation_error() {
    let h = harness_with(r#"{"flag":1}"#);
    let err = h
        .manager
        .restore(TARGET, "../index/x", RestoreOptions::default())
        .await
        .expect_err("bad id");
    assert!(matches!(err.root_cause(), confsnap::AppError::Validation(_)));
}

#[tokio::test]
async fn snapshot_from_another_target_is_rejected() {
    let h = harness_with(r#"{"flag":1}"#);
    h.remote.insert("distribution-b", json(r#"{"flag":9}"#)).unwrap();
    let b = h
        .manager
        .create_snapshot("distribution-b", "other")
        .await
        .unwrap();

    // Plant B's blob under A's key space.
    let bytes = h
        .store
        .get(&store::snapshot_key("distribution-b", &b.id))
        .await
        .unwrap();
    let decoded = SnapshotCodec::decode(&bytes).unwrap();
    assert_eq!(decoded.target_id, "distribution-b");
    h.store
        .put(&store::snapshot_key(TARGET, &b.id), bytes)
        .await
        .unwrap();

    let err = h
        .manager
        .restore(TARGET, &b.id, RestoreOptions::default())
        .await
        .expect_err("cross-target restore");

    assert!(matches!(err.root_cause(), confsnap::AppError::Validation(_)));
    assert_eq!(
        err.restore_failure().unwrap().step,
        RestoreStep::LoadSnapshot
    );
    assert_eq!(
        h.remote.current(TARGET).unwrap().unwrap().as_bytes(),
        br#"{"flag":1}"#
    );
}

#[tokio::test]
async fn corrupted_blob_is_rejected_on_restore() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    let key = store::snapshot_key(TARGET, &a.id);
    let mut bytes = h.store.get(&key).await.unwrap();
    let last = bytes.len() - 2;
    bytes[last] = b'7';
    h.store.put(&key, bytes).await.unwrap();

    let err = h
        .manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect_err("digest mismatch");
    assert!(matches!(err.root_cause(), confsnap::AppError::Validation(_)));
    assert_eq!(h.remote.apply_calls().unwrap(), 0);
}

#[tokio::test]
async fn drift_after_apply_is_recorded_as_validation_mismatch() {
    let h = harness_with(r#"{"flag":1,"count":3}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":0,"count":3}"#))
        .unwrap();
    h.remote
        .drift_after_next_apply(TARGET, json(r#"{"flag":1,"count":4}"#))
        .unwrap();

    let applied = applied(
        h.manager
            .restore(TARGET, &a.id, RestoreOptions::default())
            .await
            .expect("mismatch is not an error"),
    );

    assert!(!applied.validation.success);
    assert_eq!(applied.outcome, HistoryOutcome::ValidationMismatch);
    let fields: Vec<&str> = applied
        .validation
        .mismatches
        .iter()
        .map(|m| m.field.as_str())
        .collect();
    assert_eq!(fields, vec!["count"]);

    let history = h.manager.list_history(TARGET, 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, HistoryOutcome::ValidationMismatch);
    assert!(history[0].details.contains("count"));
}

#[tokio::test]
async fn stalled_apply_times_out_with_unknown_mutation_and_is_recorded() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();

    let scripted = ScriptedService::new(Arc::clone(&h.remote)).delay_apply(Duration::from_secs(5));
    let manager = SnapshotManager::new(
        Arc::new(scripted),
        h.store.clone(),
        Arc::new(JsonSummaryExtractor::top_level()),
    )
    .with_remote_timeout(Duration::from_millis(50));

    let err = manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect_err("apply timeout");

    let failure = err.restore_failure().expect("restore context");
    assert_eq!(failure.step, RestoreStep::Apply);
    assert_eq!(failure.mutation, MutationState::Unknown);
    assert!(matches!(err.root_cause(), confsnap::AppError::Io(_)));

    let history = manager.list_history(TARGET, 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, HistoryOutcome::Failed);
}

#[tokio::test]
async fn validator_transport_failure_after_apply_is_recorded() {
    let h = harness_with(r#"{"flag":1}"#);
    let a = h.manager.create_snapshot(TARGET, "a").await.unwrap();
    h.remote
        .write_out_of_band(TARGET, json(r#"{"flag":0}"#))
        .unwrap();

    // The restore's own read succeeds; the validator's re-read fails.
    let scripted = ScriptedService::new(Arc::clone(&h.remote)).fail_fetch_after(1);
    let manager = SnapshotManager::new(
        Arc::new(scripted),
        h.store.clone(),
        Arc::new(JsonSummaryExtractor::top_level()),
    );

    let err = manager
        .restore(TARGET, &a.id, RestoreOptions::default())
        .await
        .expect_err("validation fetch fails");

    let failure = err.restore_failure().expect("restore context");
    assert_eq!(failure.step, RestoreStep::Validate);
    assert_eq!(failure.mutation, MutationState::Applied);
    assert_eq!(
        h.remote.current(TARGET).unwrap().unwrap().as_bytes(),
        br#"{"flag":1}"#,
        "mutation took effect"
    );

    let history = manager.list_history(TARGET, 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, HistoryOutcome::Failed);
    assert!(history[0].safety_snapshot_id.is_some());
}

#[tokio::test]
async fn create_snapshot_for_unknown_target_is_not_found() {
    let h = harness_with(r#"{"flag":1}"#);
    let err = h
        .manager
        .create_snapshot("no-such-target", "x")
        .await
        .expect_err("unknown target");
    assert!(err.is_not_found());
    assert!(h.store.is_empty().unwrap());
}
