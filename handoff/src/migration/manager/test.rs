use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use super::*;
use crate::decision::{DecisionError, DeviceClassChoice, LinkDecision};
use crate::matching::MatchCandidate;
use crate::migration::state::MigrationProgress;
use crate::primitives::activity::testing::RecordingSink;
use crate::test_utils::{saved_texts, FaultyStore, ScriptedDecisions};

const SOURCE_TEXTS: &str = "dualTextWriter_savedTexts_alice";
const SOURCE_DRAFT: &str = "dualTextWriter_tempSave_alice";
const TARGET_TEXTS: &str = "dualTextWriter_savedTexts_alice@example.com";
const TARGET_DRAFT: &str = "dualTextWriter_tempSave_alice@example.com";

fn alice() -> Identity {
    Identity::Legacy {
        username: "alice".to_string(),
    }
}

fn alice_federated() -> Identity {
    Identity::Federated {
        email: "alice@example.com".to_string(),
    }
}

fn alice_store(items: usize) -> Arc<FaultyStore> {
    Arc::new(FaultyStore::seeded(&[
        (SOURCE_TEXTS, &saved_texts(items)),
        (SOURCE_DRAFT, r#"{"content":"half a thought","timestamp":1}"#),
        ("dualTextWriter_currentUser", "alice"),
        ("dualTextWriter_authProvider", "username"),
    ]))
}

fn manager_with(
    store: Arc<FaultyStore>,
    decisions: Arc<ScriptedDecisions>,
    config: HandoffConfig,
) -> MigrationManager {
    MigrationManager::with_config(
        store,
        decisions,
        None,
        ActivityReporter::default(),
        config,
    )
}

fn manager(store: Arc<FaultyStore>) -> MigrationManager {
    manager_with(
        store,
        Arc::new(ScriptedDecisions::default()),
        HandoffConfig::default(),
    )
}

fn without_backups(snapshot: BTreeMap<String, String>) -> BTreeMap<String, String> {
    snapshot
        .into_iter()
        .filter(|(key, _)| !key.contains("_migrationBackup_"))
        .collect()
}

fn items(raw: &str) -> Vec<serde_json::Value> {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn test_active_session_end_to_end() {
    let store = alice_store(3);
    let decisions = Arc::new(ScriptedDecisions::default());
    let activity = Arc::new(RecordingSink::default());
    let manager = MigrationManager::with_config(
        store.clone(),
        decisions.clone(),
        None,
        ActivityReporter::new(Some(activity.clone())),
        HandoffConfig::default(),
    );

    let outcome = manager
        .migrate_active_session(alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Completed { summary } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.partitions_moved, 2);
    assert!(summary.warnings.is_empty());
    assert!(summary.migration_id.starts_with("mig_"));
    assert_eq!(manager.current_phase(), MigrationPhase::Complete);

    let after = store.snapshot();
    assert_eq!(items(&after[TARGET_TEXTS]), items(&saved_texts(3)));
    assert_eq!(
        after[TARGET_DRAFT],
        r#"{"content":"half a thought","timestamp":1}"#
    );
    assert!(!after.contains_key(SOURCE_TEXTS));
    assert!(!after.contains_key(SOURCE_DRAFT));

    let record = manager.migration_record().unwrap();
    assert_eq!(record.source, alice());
    assert_eq!(record.target, alice_federated());
    assert_eq!(record.item_count, 3);
    assert_eq!(record.backup_id, summary.backup_id);
    assert_eq!(manager.migration_history(), vec![record]);
    assert_eq!(manager.list_backups().unwrap().len(), 1);

    let previews = decisions.previews.lock().unwrap();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].item_count, 3);
    assert!(previews[0].has_draft);

    assert_eq!(
        activity.actions(),
        vec!["migration_started", "migration_complete"]
    );
}

#[tokio::test]
async fn test_no_legacy_session_is_not_needed() {
    let store = Arc::new(FaultyStore::seeded(&[
        ("dualTextWriter_currentUser", "alice@example.com"),
        ("dualTextWriter_authProvider", "google"),
        (SOURCE_TEXTS, &saved_texts(1)),
    ]));
    let manager = manager(store.clone());

    let outcome = manager
        .migrate_active_session(alice_federated())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        MigrationOutcome::NotNeeded {
            reason: NotNeededReason::NoActiveLegacySession
        }
    );
    assert_eq!(manager.current_phase(), MigrationPhase::Idle);
}

#[tokio::test]
async fn test_declined_preview_writes_nothing() {
    let store = alice_store(3);
    let decisions = Arc::new(ScriptedDecisions::default());
    decisions.answer_confirmation(MigrationConfirmation::Cancel);
    let manager = manager_with(store.clone(), decisions, HandoffConfig::default());
    let before = store.snapshot();

    let outcome = manager
        .migrate_active_session(alice_federated())
        .await
        .unwrap();

    assert_eq!(outcome, MigrationOutcome::Cancelled);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_perform_migration_is_idempotent() {
    let store = alice_store(5);
    let manager = manager(store.clone());

    let first = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();
    assert!(first.is_completed());

    let after_first = store.snapshot();
    let writes = store.writes.load(std::sync::atomic::Ordering::SeqCst);

    let second = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();
    assert_eq!(
        second,
        MigrationOutcome::NotNeeded {
            reason: NotNeededReason::AlreadyMigrated
        }
    );
    assert_eq!(store.snapshot(), after_first);
    assert_eq!(store.writes.load(std::sync::atomic::Ordering::SeqCst), writes);
}

#[tokio::test]
async fn test_content_written_after_migration_is_migrated_again() {
    let store = alice_store(3);
    let decisions = Arc::new(ScriptedDecisions::default());
    let manager = manager_with(store.clone(), decisions.clone(), HandoffConfig::default());

    let first = manager
        .migrate_active_session(alice_federated())
        .await
        .unwrap();
    assert!(first.is_completed());

    // The user signed in with the username again and kept writing.
    let newer = r#"[{"id":1700000000101,"content":"later"},{"id":1700000000102,"content":"even later"}]"#;
    store
        .inner
        .set(SOURCE_TEXTS.to_string(), newer.to_string())
        .unwrap();

    let second = manager
        .migrate_active_session(alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Completed { summary } = second else {
        panic!("expected completion, got {second:?}");
    };
    assert_eq!(summary.item_count, 2);
    assert_eq!(decisions.previews.lock().unwrap().len(), 2);

    let after = store.snapshot();
    assert!(!after.contains_key(SOURCE_TEXTS));
    let mut expected = items(&saved_texts(3));
    expected.extend(items(newer));
    assert_eq!(items(&after[TARGET_TEXTS]), expected);
    assert_eq!(manager.migration_history().len(), 2);
}

#[tokio::test]
async fn test_unreadable_source_is_a_backup_failure() {
    let store = alice_store(2);
    let before = store.snapshot();
    store.fail_reads_of(SOURCE_TEXTS);
    let decisions = Arc::new(ScriptedDecisions::default());
    let manager = manager_with(store.clone(), decisions.clone(), HandoffConfig::default());

    let outcome = manager
        .confirm_and_migrate(alice(), alice_federated())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        MigrationOutcome::Failed {
            kind: FailureKind::Backup,
            rolled_back: false,
            backup_id: None,
            ..
        }
    ));
    assert_eq!(manager.current_phase(), MigrationPhase::Failed);
    assert!(decisions.previews.lock().unwrap().is_empty());
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_missing_source_content_is_not_needed() {
    let store = Arc::new(FaultyStore::default());
    let manager = manager(store.clone());

    let outcome = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        MigrationOutcome::NotNeeded {
            reason: NotNeededReason::NoSourceContent
        }
    );
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn test_second_partition_failure_rolls_back_everything() {
    let store = alice_store(250);
    store.fail_writes_to(TARGET_DRAFT);
    let manager = manager(store.clone());
    let before = store.snapshot();

    let outcome = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Failed {
        kind,
        rolled_back,
        backup_id,
        ..
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(kind, FailureKind::Transfer);
    assert!(rolled_back);
    assert!(backup_id.is_some());
    assert_eq!(without_backups(store.snapshot()), before);
    assert_eq!(manager.migration_record(), None);
    assert_eq!(manager.current_phase(), MigrationPhase::Failed);
}

#[tokio::test]
async fn test_rollback_restores_existing_target_items() {
    let store = alice_store(3);
    store
        .inner
        .set(TARGET_TEXTS.to_string(), r#"[{"id":900,"content":"mine"}]"#.to_string())
        .unwrap();
    store.fail_writes_to(TARGET_DRAFT);
    let before = store.snapshot();

    let outcome = manager(store.clone())
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    assert!(matches!(outcome, MigrationOutcome::Failed { rolled_back: true, .. }));
    assert_eq!(without_backups(store.snapshot()), before);
}

#[tokio::test]
async fn test_backup_failure_changes_nothing() {
    let store = alice_store(3);
    store.fail_writes_to("_migrationBackup_");
    let before = store.snapshot();

    let outcome = manager(store.clone())
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Failed {
        kind,
        rolled_back,
        user_message,
        ..
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(kind, FailureKind::Backup);
    assert!(!rolled_back);
    assert!(user_message.contains("nothing was changed"));
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_failed_rollback_is_escalated_and_recoverable() {
    let store = alice_store(3);
    store.fail_writes_to(TARGET_DRAFT);
    store.fail_deletes_of(TARGET_TEXTS);
    let manager = manager(store.clone());
    let before = store.snapshot();

    let err = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap_err();

    let MigrationError::RollbackFailed { backup_id, .. } = err else {
        panic!("expected RollbackFailed, got {err:?}");
    };
    assert!(store.snapshot().contains_key(TARGET_TEXTS));

    store.heal();
    manager.restore_backup(backup_id).unwrap();
    assert_eq!(without_backups(store.snapshot()), before);
}

#[tokio::test]
async fn test_record_failure_is_a_warning() {
    let store = alice_store(3);
    store.fail_writes_to("_migrationRecord");

    let outcome = manager(store.clone())
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Completed { summary } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.warnings.len(), 1);
    assert!(store.snapshot().contains_key(TARGET_TEXTS));
    assert!(!store.snapshot().contains_key(SOURCE_TEXTS));
}

#[tokio::test]
async fn test_cleanup_failure_is_a_warning() {
    let store = alice_store(3);
    store.fail_deletes_of(SOURCE_DRAFT);

    let outcome = manager(store.clone())
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let MigrationOutcome::Completed { summary } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warnings[0].contains(SOURCE_DRAFT));
}

#[tokio::test]
async fn test_appends_to_existing_target_collection() {
    let store = alice_store(3);
    store
        .inner
        .set(TARGET_TEXTS.to_string(), r#"[{"id":900,"content":"mine"}]"#.to_string())
        .unwrap();

    manager(store.clone())
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let merged = items(&store.snapshot()[TARGET_TEXTS]);
    assert_eq!(merged.len(), 4);
    assert_eq!(merged[0]["id"], 900);
    assert_eq!(merged[1..], items(&saved_texts(3))[..]);
}

#[tokio::test]
async fn test_validation_failures() {
    let store = alice_store(3);
    let manager = manager(store.clone());
    let before = store.snapshot();

    let same = manager.perform_migration(alice(), alice()).await.unwrap();
    assert!(matches!(
        same,
        MigrationOutcome::Failed {
            kind: FailureKind::Validation,
            rolled_back: false,
            ..
        }
    ));

    let bad_target = manager
        .perform_migration(
            alice(),
            Identity::Federated {
                email: "not-an-email@".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        bad_target,
        MigrationOutcome::Failed {
            kind: FailureKind::Validation,
            ..
        }
    ));

    store
        .inner
        .set(SOURCE_TEXTS.to_string(), "{broken".to_string())
        .unwrap();
    let malformed = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();
    assert!(matches!(
        malformed,
        MigrationOutcome::Failed {
            kind: FailureKind::Validation,
            ..
        }
    ));

    let mut expected = before;
    expected.insert(SOURCE_TEXTS.to_string(), "{broken".to_string());
    assert_eq!(store.snapshot(), expected);
}

#[tokio::test]
async fn test_history_keeps_only_the_latest_records() {
    let store = Arc::new(FaultyStore::default());
    let config = HandoffConfig {
        history_limit: 2,
        ..HandoffConfig::default()
    };
    let manager = manager_with(
        store.clone(),
        Arc::new(ScriptedDecisions::default()),
        config,
    );

    for name in ["ann", "ben", "cat"] {
        store
            .inner
            .set(format!("dualTextWriter_savedTexts_{name}"), saved_texts(1))
            .unwrap();
        let outcome = manager
            .perform_migration(
                Identity::Legacy {
                    username: name.to_string(),
                },
                Identity::Federated {
                    email: format!("{name}@example.com"),
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_completed());
    }

    let history: Vec<_> = manager
        .migration_history()
        .into_iter()
        .map(|r| r.source.to_string())
        .collect();
    assert_eq!(history, vec!["ben", "cat"]);
    assert_eq!(manager.migration_record().unwrap().source.to_string(), "cat");
}

#[test]
fn test_analyze_preview() {
    let store = alice_store(250);
    let preview = manager(store)
        .analyze(alice(), alice_federated())
        .unwrap();

    assert_eq!(preview.item_count, 250);
    assert_eq!(preview.batch_count, 3);
    assert!(preview.has_draft);
    assert!(preview.byte_size > 0);
    assert!((preview.estimated_seconds - 0.33).abs() < 1e-9);
    assert!(preview.readable_size.ends_with("KB"));
}

#[test]
fn test_migration_id_shape() {
    let id = generate_migration_id(1_700_000_000_000);
    let suffix = id.strip_prefix("mig_1700000000000_").unwrap();
    assert_eq!(suffix.len(), 9);
    assert!(suffix
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
}

#[derive(Default)]
struct CancellingSink {
    manager: OnceLock<Arc<MigrationManager>>,
    progress: Mutex<Vec<MigrationProgress>>,
    errors: Mutex<Vec<String>>,
    cancel_on_transfer: bool,
}

impl ProgressSink for CancellingSink {
    fn on_progress(&self, progress: MigrationProgress) {
        if self.cancel_on_transfer && progress.step == MigrationStep::Transfer && progress.current > 0 {
            if let Some(manager) = self.manager.get() {
                manager.cancel();
            }
        }
        self.progress.lock().unwrap().push(progress);
    }

    fn on_complete(&self, _summary: MigrationSummary) {}

    fn on_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }
}

#[tokio::test]
async fn test_cancellation_mid_transfer_rolls_back() {
    let store = alice_store(250);
    let before = store.snapshot();
    let sink = Arc::new(CancellingSink {
        cancel_on_transfer: true,
        ..CancellingSink::default()
    });
    let manager = Arc::new(MigrationManager::with_config(
        store.clone(),
        Arc::new(ScriptedDecisions::default()),
        Some(sink.clone()),
        ActivityReporter::default(),
        HandoffConfig::default(),
    ));
    let _ = sink.manager.set(manager.clone());

    let outcome = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        MigrationOutcome::Failed {
            kind: FailureKind::Cancelled,
            rolled_back: true,
            ..
        }
    ));
    assert_eq!(without_backups(store.snapshot()), before);
    assert_eq!(sink.errors.lock().unwrap().len(), 1);
    assert!(!manager.cancel());
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let store = alice_store(250);
    let sink = Arc::new(CancellingSink::default());
    let manager = MigrationManager::with_config(
        store,
        Arc::new(ScriptedDecisions::default()),
        Some(sink.clone()),
        ActivityReporter::default(),
        HandoffConfig::default(),
    );

    manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap();

    let progress = sink.progress.lock().unwrap();
    let percentages: Vec<u8> = progress.iter().map(|p| p.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(percentages.first(), Some(&0));
    assert_eq!(percentages.last(), Some(&100));
    assert!(progress.iter().any(|p| p.step == MigrationStep::Verify));
    assert!(progress
        .iter()
        .filter(|p| p.step == MigrationStep::Transfer)
        .any(|p| p.current == 250));
}

/// Holds the confirmation until released.
#[derive(Default)]
struct GatedDecisions {
    asked: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl DecisionSurface for GatedDecisions {
    async fn decide_account_link(
        &self,
        _candidate: MatchCandidate,
    ) -> Result<LinkDecision, DecisionError> {
        Ok(LinkDecision::Later)
    }

    async fn confirm_migration(
        &self,
        _preview: MigrationPreview,
    ) -> Result<MigrationConfirmation, DecisionError> {
        self.asked.notify_one();
        self.release.notified().await;
        Ok(MigrationConfirmation::Confirm)
    }

    async fn choose_device_class(&self) -> Result<DeviceClassChoice, DecisionError> {
        Err(DecisionError::Dismissed)
    }

    async fn confirm_switch_to_personal(&self) -> Result<bool, DecisionError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_concurrent_migration_is_rejected() {
    let store = alice_store(3);
    let decisions = Arc::new(GatedDecisions::default());
    let manager = Arc::new(MigrationManager::with_config(
        store,
        decisions.clone(),
        None,
        ActivityReporter::default(),
        HandoffConfig::default(),
    ));

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.migrate_active_session(alice_federated()).await })
    };
    decisions.asked.notified().await;
    assert_eq!(
        manager.current_phase(),
        MigrationPhase::AwaitingUserConfirmation
    );

    let err = manager
        .perform_migration(alice(), alice_federated())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::InvalidOperation(_)));
    assert!(matches!(
        manager.prune_backups(),
        Err(MigrationError::InvalidOperation(_))
    ));

    decisions.release.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert!(outcome.is_completed());
}
