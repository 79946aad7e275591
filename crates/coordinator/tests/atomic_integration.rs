//! End-to-end behaviour of the coordinator: all-or-nothing execution,
//! retries, lease expiry, mutual exclusion, status and cleanup.

use coordinator::{AtomicOptions, CleanupOutcome, Coordinator, StatusReport};
use journal::{CheckpointState, TransactionState};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use ward_core::{WardConfig, WardError};

async fn coordinator(temp_dir: &TempDir) -> Coordinator {
    let mut config = WardConfig::default();
    config.executor.backoff_base_ms = 1;
    let coordinator = Coordinator::new(".ward", temp_dir.path(), config);
    coordinator.initialize().await.unwrap();
    coordinator
}

fn write(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn scenario_a_failed_operation_restores_both_files() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let a = temp_dir.path().join("a.md");
    let b = temp_dir.path().join("b.md");
    write(&a, "a");
    write(&b, "b");

    let mut checkpoint_ids = Vec::new();
    let err = ward
        .execute_atomic(
            AtomicOptions::new("overwrite both", &[&a, &b]).with_retries(1),
            |ctx| {
                checkpoint_ids.push(ctx.checkpoint_id);
                let (a, b) = (a.clone(), b.clone());
                async move {
                    tokio::fs::write(&a, "clobbered a").await?;
                    tokio::fs::write(&b, "clobbered b").await?;
                    Err::<(), _>(anyhow::anyhow!("validation rejected the edit"))
                }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(read(&a), "a");
    assert_eq!(read(&b), "b");
    assert_eq!(err.attempts(), Some(1));
    assert!(matches!(err.root(), WardError::Operation(_)));

    let checkpoint = ward.get_checkpoint(checkpoint_ids[0]).await.unwrap();
    assert_eq!(checkpoint.state, CheckpointState::RolledBack);
    assert_eq!(ward.lock_manager().active_locks().await.unwrap(), 0);
    assert!(ward.lock_manager().holder_of(&a).await.unwrap().is_none());
}

#[tokio::test]
async fn scenario_b_expired_lease_is_reclaimed() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let locks = ward.lock_manager();
    let ttl = Duration::from_millis(300);

    let stale = locks.acquire_locks(&["p.md"], ttl).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = locks.acquire_locks(&["p.md"], ttl).await.unwrap_err();
    assert!(matches!(err, WardError::LockConflict { .. }));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let fresh = locks.acquire_locks(&["p.md"], ttl).await.unwrap();
    assert_ne!(fresh, stale);

    // the abandoned lease record went with its path record
    let stale_record = ward.root().join("locks").join(format!("lock-{stale}.json"));
    assert!(!stale_record.exists());
    let holder = locks.holder_of(Path::new("p.md")).await.unwrap().unwrap();
    assert_eq!(holder.lease_id, fresh);
}

#[tokio::test]
async fn scenario_c_second_attempt_wins() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let doc = temp_dir.path().join("doc.md");
    write(&doc, "original");

    let mut checkpoint_ids = Vec::new();
    let outcome = ward
        .execute_atomic(AtomicOptions::new("flaky edit", &[&doc]), |ctx| {
            checkpoint_ids.push(ctx.checkpoint_id);
            let doc = doc.clone();
            async move {
                tokio::fs::write(&doc, format!("attempt {}", ctx.attempt)).await?;
                if ctx.attempt == 1 {
                    anyhow::bail!("transient failure");
                }
                Ok("done")
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.attempt, 2);
    assert_eq!(outcome.result, "done");
    assert_eq!(read(&doc), "attempt 2");
    assert_eq!(checkpoint_ids.len(), 2);
    assert_eq!(outcome.checkpoint_id, checkpoint_ids[1]);

    let first = ward.get_checkpoint(checkpoint_ids[0]).await.unwrap();
    let second = ward.get_checkpoint(checkpoint_ids[1]).await.unwrap();
    assert_eq!(first.state, CheckpointState::RolledBack);
    assert_eq!(second.state, CheckpointState::Successful);

    let transaction = ward.get_transaction(outcome.transaction_id).await.unwrap();
    assert_eq!(transaction.state, TransactionState::Committed);
    assert_eq!(transaction.checkpoint_id, outcome.checkpoint_id);
}

#[tokio::test]
async fn always_failing_operation_makes_exactly_n_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let doc = temp_dir.path().join("doc.md");
    write(&doc, "keep me");

    let mut calls = 0u32;
    let err = ward
        .execute_atomic(
            AtomicOptions::new("doomed", &[&doc]).with_retries(4),
            |ctx| {
                calls += 1;
                let doc = doc.clone();
                async move {
                    tokio::fs::write(&doc, format!("garbage {}", ctx.attempt)).await?;
                    Err::<(), _>(anyhow::anyhow!("failure #{}", ctx.attempt))
                }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(calls, 4);
    assert_eq!(err.attempts(), Some(4));
    assert!(err.to_string().contains("failure #4"));
    assert_eq!(read(&doc), "keep me");
}

#[tokio::test]
async fn newly_created_files_are_removed_on_failure() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let existing = temp_dir.path().join("existing.md");
    let created = temp_dir.path().join("drafts/new.md");
    write(&existing, "before");

    let result = ward
        .execute_atomic(
            AtomicOptions::new("create + edit", &[&existing, &created]).with_retries(1),
            |_ctx| {
                let (existing, created) = (existing.clone(), created.clone());
                async move {
                    tokio::fs::create_dir_all(created.parent().unwrap()).await?;
                    tokio::fs::write(&created, "brand new").await?;
                    tokio::fs::write(&existing, "after").await?;
                    Err::<(), _>(anyhow::anyhow!("abort"))
                }
            },
        )
        .await;

    assert!(result.is_err());
    assert!(!created.exists());
    assert_eq!(read(&existing), "before");
}

#[tokio::test]
async fn unwind_failure_never_masks_original_error() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let doc = temp_dir.path().join("doc.md");
    write(&doc, "body");
    let checkpoints_dir = ward.root().join("checkpoints");

    let err = ward
        .execute_atomic(
            AtomicOptions::new("sabotage", &[&doc]).with_retries(1),
            |ctx| {
                let record = checkpoints_dir.join(format!("checkpoint-{}.json", ctx.checkpoint_id));
                async move {
                    // rollback will fail: its checkpoint record is gone
                    tokio::fs::remove_file(&record).await?;
                    Err::<(), _>(anyhow::anyhow!("the original failure"))
                }
            },
        )
        .await
        .unwrap_err();

    match err.root() {
        WardError::Operation(inner) => assert_eq!(inner.to_string(), "the original failure"),
        other => panic!("expected the operation error, got {other:?}"),
    }
    // locks were still released by the remaining unwind step
    assert_eq!(ward.lock_manager().active_locks().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_acquisitions_admit_one_holder() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;

    for _ in 0..10 {
        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = ward.lock_manager().clone();
            let paths: Vec<PathBuf> = vec!["x.md".into(), "y.md".into(), "z.md".into()];
            handles.push(tokio::spawn(async move {
                locks.acquire_locks(&paths, Duration::from_secs(30)).await
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(lease) => winners.push(lease),
                Err(WardError::LockConflict { .. }) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(winners.len(), 1);
        ward.lock_manager().release_locks(&winners[0]).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reclaimers_of_an_expired_lease_admit_one_holder() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;

    let mut doubled = Vec::new();
    for round in 0..200 {
        let path = PathBuf::from(format!("p{round}.md"));
        ward.lock_manager()
            .acquire_locks(&[&path], Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = ward.lock_manager().clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                locks.acquire_locks(&[path], Duration::from_secs(30)).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(WardError::LockConflict { .. }) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        if winners > 1 {
            doubled.push((round, winners));
        }
    }

    assert!(doubled.is_empty(), "rounds with several holders: {doubled:?}");
}

#[tokio::test]
async fn status_reports_counts_and_errors_as_data() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let doc = temp_dir.path().join("doc.md");
    write(&doc, "v1");

    ward.execute_atomic(AtomicOptions::new("edit", &[&doc]), |_ctx| async {
        Ok::<_, anyhow::Error>(())
    })
    .await
    .unwrap();
    ward.create_checkpoint("manual", &[&doc]).await.unwrap();
    let _lease = ward
        .lock_manager()
        .acquire_locks(&[&doc], Duration::from_secs(30))
        .await
        .unwrap();

    let report = ward.get_status().await;
    let status = report.status().expect("status should succeed");
    assert_eq!(status.checkpoints.total, 2);
    assert_eq!(status.checkpoints.last_id, 2);
    assert_eq!(status.transactions.total, 1);
    assert_eq!(status.transactions.active, 0);
    assert_eq!(status.locks.active, 1);

    fs::write(ward.root().join("checkpoints/checkpoint-log.json"), b"not json").unwrap();
    match ward.get_status().await {
        StatusReport::Failed { error } => assert!(error.contains("checkpoint-log.json")),
        other => panic!("expected error payload, got {other:?}"),
    }
}

#[tokio::test]
async fn cleanup_keeps_active_records() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let doc = temp_dir.path().join("doc.md");
    write(&doc, "v1");

    let done = ward
        .execute_atomic(AtomicOptions::new("finished", &[&doc]), |_ctx| async {
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();
    let active = ward.create_checkpoint("in flight", &[&doc]).await.unwrap();
    ward.lock_manager()
        .acquire_locks(&["short.md"], Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let outcome = ward.cleanup(Some(Duration::ZERO)).await;
    let report = match outcome {
        CleanupOutcome::Ok(report) => report,
        CleanupOutcome::Failed { error } => panic!("cleanup failed: {error}"),
    };

    assert_eq!(report.checkpoints_removed, 1);
    assert_eq!(report.transactions_removed, 1);
    assert_eq!(report.locks_removed, 2);
    assert!(ward.get_checkpoint(done.checkpoint_id).await.is_err());
    assert!(ward.get_transaction(done.transaction_id).await.is_err());
    assert_eq!(
        ward.get_checkpoint(active.checkpoint_id).await.unwrap().state,
        CheckpointState::Active
    );

    // a long retention window removes nothing
    let report = ward.cleanup(None).await;
    assert_eq!(report.report().unwrap().checkpoints_removed, 0);
}

#[tokio::test]
async fn checkpoint_round_trip_is_byte_exact() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;
    let files: Vec<PathBuf> = (0..5)
        .map(|i| temp_dir.path().join(format!("file-{i}.bin")))
        .collect();
    for (i, path) in files.iter().enumerate() {
        let content: Vec<u8> = (0..=255u8).cycle().skip(i * 7).take(1024 + i).collect();
        fs::write(path, content).unwrap();
    }
    let originals: Vec<Vec<u8>> = files.iter().map(|p| fs::read(p).unwrap()).collect();

    let created = ward.create_checkpoint("round trip", &files).await.unwrap();
    assert_eq!(created.files_backed_up, 5);
    for path in &files {
        fs::write(path, b"scribble").unwrap();
    }
    let report = ward.rollback_to_checkpoint(created.checkpoint_id).await.unwrap();

    assert_eq!(report.files_restored, 5);
    for (path, original) in files.iter().zip(&originals) {
        assert_eq!(&fs::read(path).unwrap(), original);
    }
    assert!(ward.verify_checkpoint(created.checkpoint_id).await.unwrap().is_clean());
}

#[tokio::test]
async fn open_reads_config_from_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join(".ward");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("ward.toml"), "[executor]\nretries = 7\n").unwrap();

    let ward = Coordinator::open(".ward", temp_dir.path()).unwrap();
    ward.initialize().await.unwrap();
    assert_eq!(ward.config().executor.retries, 7);
    assert!(ward.list_checkpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn audit_records_stay_out_of_the_ledger() {
    let temp_dir = TempDir::new().unwrap();
    let ward = coordinator(&temp_dir).await;

    let record = ward.audit_record(serde_json::json!({"kind": "comment", "text": "lgtm"}));
    assert_eq!(record.payload["kind"], "comment");

    let status = ward.get_status().await;
    assert_eq!(status.status().unwrap().checkpoints.total, 0);
}
