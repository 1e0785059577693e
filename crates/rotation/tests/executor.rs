//! Rotation executor behaviour against a simulated identity service

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use common::{Remote, TestRotator, fast_config, key};
use horizon_core::{MemoryStorage, Storage};
use horizon_rotation::wal::intents_for;
use horizon_rotation::{
    KeyLockTable, PausedKeys, RotationConfig, RotationError, RotationExecutor, RotationIntent,
    RotationOutcome, StorageWal, WalId, WalStore,
};
use pretty_assertions::assert_eq;

struct Harness {
    storage: Arc<MemoryStorage>,
    paused: Arc<PausedKeys>,
    rotator: Arc<TestRotator>,
    wal: Arc<StorageWal>,
    locks: Arc<KeyLockTable>,
    executor: Arc<RotationExecutor>,
}

fn harness_with(config: RotationConfig) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let rotator = Arc::new(TestRotator::new(storage.clone(), Arc::new(Remote::default())));
    let wal = Arc::new(StorageWal::new(storage.clone()));
    let locks = Arc::new(KeyLockTable::new(config.lock_table_size));
    let paused = Arc::new(PausedKeys::new());
    let executor = Arc::new(RotationExecutor::new(
        rotator.clone(),
        wal.clone(),
        locks.clone(),
        paused.clone(),
        config,
    ));
    Harness {
        storage,
        paused,
        rotator,
        wal,
        locks,
        executor,
    }
}

fn harness() -> Harness {
    harness_with(fast_config())
}

#[tokio::test]
async fn completed_rotation_commits_value_and_clears_wal() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    h.rotator.next_values.lock().push_back("secretX".into());

    let outcome = h.executor.rotate(&k).await;
    assert!(outcome.is_rotated(), "{outcome:?}");

    assert_eq!(h.rotator.secret_of(&k).await, "secretX");
    assert_eq!(h.rotator.remote.value_of("prod-root").as_deref(), Some("secretX"));
    assert!(intents_for(h.wal.as_ref(), &k).await.unwrap().is_empty());
    assert!(h.locks.lock_for(&k).try_acquire().is_some());
}

#[tokio::test]
async fn remote_failure_keeps_intent_and_retry_reuses_value() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    h.rotator.next_values.lock().push_back("secretX".into());
    h.rotator.remote.fail_applies.store(1, Ordering::SeqCst);

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(
        outcome,
        RotationOutcome::Failed(RotationError::RemoteUnavailable(_))
    ));

    let pending = intents_for(h.wal.as_ref(), &k).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].new_secret.matches("secretX"));
    assert_eq!(h.rotator.secret_of(&k).await, "old");
    assert!(h.locks.lock_for(&k).try_acquire().is_some());

    let outcome = h.executor.rotate(&k).await;
    assert!(outcome.is_rotated(), "{outcome:?}");
    assert_eq!(h.rotator.generated(), 1);
    assert_eq!(h.rotator.secret_of(&k).await, "secretX");
    assert!(intents_for(h.wal.as_ref(), &k).await.unwrap().is_empty());
}

#[tokio::test]
async fn generator_failure_writes_no_intent() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    h.rotator.fail_generate.store(true, Ordering::SeqCst);

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(outcome, RotationOutcome::Failed(RotationError::Generation(_))));
    assert!(h.wal.list_ids().await.unwrap().is_empty());
    assert_eq!(h.rotator.secret_of(&k).await, "old");
}

#[tokio::test]
async fn commit_failure_after_remote_apply_keeps_intent() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    h.rotator.next_values.lock().push_back("secretX".into());
    h.rotator.fail_commits.store(1, Ordering::SeqCst);

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(outcome, RotationOutcome::Failed(RotationError::Storage(_))));
    // remote already moved on, the intent is what records it
    assert_eq!(h.rotator.remote.value_of("prod-root").as_deref(), Some("secretX"));
    assert_eq!(intents_for(h.wal.as_ref(), &k).await.unwrap().len(), 1);

    assert!(h.executor.rotate(&k).await.is_rotated());
    assert_eq!(h.rotator.secret_of(&k).await, "secretX");
    assert_eq!(h.rotator.generated(), 1);
    assert_eq!(h.rotator.remote.applies.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_intent_is_discarded_instead_of_resent() {
    let h = harness();
    let k = key("prod");
    let last = Utc::now();
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), Some(last), "current").await;

    let stale = RotationIntent::new(
        k.clone(),
        "prod-root",
        "from-an-older-attempt".into(),
        Some(last - chrono::Duration::hours(1)),
    );
    h.wal.write(&stale.to_entry().unwrap()).await.unwrap();
    h.rotator.next_values.lock().push_back("fresh".into());

    assert!(h.executor.rotate(&k).await.is_rotated());
    assert_eq!(h.rotator.secret_of(&k).await, "fresh");
    assert!(h.wal.read(stale.id).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_record_is_dropped() {
    let h = harness();
    let outcome = h.executor.rotate(&key("gone")).await;
    assert!(matches!(outcome, RotationOutcome::Dropped));
    assert_eq!(h.rotator.generated(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_is_cut_off_by_the_deadline() {
    let h = harness_with(RotationConfig {
        remote_timeout: Duration::from_secs(1),
        ..fast_config()
    });
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    *h.rotator.remote.apply_delay.lock() = Some(Duration::from_secs(60));

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(
        outcome,
        RotationOutcome::Failed(RotationError::RemoteUnavailable(_))
    ));
    assert_eq!(intents_for(h.wal.as_ref(), &k).await.unwrap().len(), 1);
    assert!(h.locks.lock_for(&k).try_acquire().is_some());
}

#[tokio::test(start_paused = true)]
async fn contended_lock_times_out() {
    let h = harness_with(RotationConfig {
        lock_timeout: Duration::from_millis(100),
        ..fast_config()
    });
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    let _held = h.locks.lock_for(&k).acquire().await;

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(
        outcome,
        RotationOutcome::Failed(RotationError::LockTimeout { .. })
    ));
    assert_eq!(h.rotator.generated(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_on_one_key_are_serialized() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    *h.rotator.remote.apply_delay.lock() = Some(Duration::from_millis(30));

    let first = {
        let executor = h.executor.clone();
        let k = k.clone();
        tokio::spawn(async move { executor.rotate(&k).await })
    };
    let second = {
        let executor = h.executor.clone();
        let k = k.clone();
        tokio::spawn(async move { executor.rotate(&k).await })
    };

    // a foreground reader under the same lock sees a whole record
    let reader = {
        let guard = h.locks.lock_for(&k).acquire().await;
        let secret = h.rotator.secret_of(&k).await;
        drop(guard);
        secret
    };
    assert!(["old", "secret-1", "secret-2"].contains(&reader.as_str()));

    assert!(first.await.unwrap().is_rotated());
    assert!(second.await.unwrap().is_rotated());
    assert!(!h.rotator.remote.overlapped.load(Ordering::SeqCst));
    assert_eq!(h.rotator.generated(), 2);
    assert_eq!(h.rotator.secret_of(&k).await, "secret-2");
    assert!(intents_for(h.wal.as_ref(), &k).await.unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_intent_pauses_the_key_instead_of_rotating() {
    let h = harness();
    let k = key("prod");
    h.rotator.seed(&k, Some(Duration::from_secs(3600)), None, "old").await;
    let id = WalId::new();
    let raw = format!(r#"{{"id":"{id}","kind":"static-rotation","key":"prod","data":7}}"#);
    h.storage.put(&format!("wal/{id}"), raw.as_bytes()).await.unwrap();

    let outcome = h.executor.rotate(&k).await;
    assert!(matches!(outcome, RotationOutcome::Paused), "{outcome:?}");

    assert_eq!(h.rotator.generated(), 0);
    assert_eq!(h.rotator.secret_of(&k).await, "old");
    assert!(h.wal.list_ids().await.unwrap().is_empty());
    let quarantined = h.wal.list_quarantined().await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].key.as_ref(), Some(&k));
    assert!(h.paused.contains(&k));

    // paused keys are refused until released
    assert!(matches!(h.executor.rotate(&k).await, RotationOutcome::Paused));
}
