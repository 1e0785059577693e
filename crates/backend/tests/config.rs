//! Instance config paths and their effect on the rotation queue

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{ENDPOINT, HOUR, Harness, INITIAL, ROOT};
use horizon_backend::{BackendError, InstanceConfig, InstanceConfigUpdate};
use horizon_core::{CredentialKey, StorageExt};
use horizon_rotation::{RotationIntent, StorageWal, WalStore};
use pretty_assertions::assert_eq;

fn prod() -> CredentialKey {
    CredentialKey::new("prod").unwrap()
}

async fn stored(h: &Harness) -> InstanceConfig {
    h.storage
        .get_json::<InstanceConfig>("config/prod")
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn write_then_read_redacts_the_password() {
    let h = Harness::new();
    let view = h
        .backend
        .write_config(
            "prod",
            InstanceConfigUpdate {
                connection_details: Some(
                    [("password".to_string(), "legacy".to_string()), ("tenant".to_string(), "eu".to_string())]
                        .into(),
                ),
                ..InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL)
            },
        )
        .await
        .unwrap();
    assert_eq!(view.username, ROOT);

    let read = h.backend.read_config("prod").await.unwrap().unwrap();
    assert_eq!(read, view);
    let json = serde_json::to_string(&read).unwrap();
    assert!(!json.contains(INITIAL));
    assert!(!json.contains("legacy"));
    assert!(json.contains("tenant"));

    assert!(stored(&h).await.password.matches(INITIAL));
}

#[tokio::test]
async fn missing_required_fields_are_rejected() {
    let h = Harness::new();
    let err = h
        .backend
        .write_config(
            "prod",
            InstanceConfigUpdate {
                username: Some(ROOT.into()),
                ..InstanceConfigUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));
    assert!(h.backend.read_config("prod").await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let h = Harness::new();
    let err = h
        .backend
        .write_config("../prod", InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));
}

#[tokio::test]
async fn rotation_period_queues_the_instance() {
    let h = Harness::new();
    let view = h
        .backend
        .write_config(
            "prod",
            InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL).with_rotation_period(HOUR),
        )
        .await
        .unwrap();

    // never rotated: due right away
    let due = h.backend.scheduler().due_time(&prod()).unwrap();
    assert!(due <= Utc::now());
    assert_eq!(view.next_root_rotation, Some(due));

    h.backend
        .write_config(
            "prod",
            InstanceConfigUpdate::default().with_rotation_period(Duration::ZERO),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.scheduler().queue_len(), 0);
}

#[tokio::test]
async fn default_period_comes_from_settings() {
    let mut settings = common::settings();
    settings.default_root_rotation_period = Some(HOUR * 24);
    let backend = horizon_backend::HorizonBackend::new(
        std::sync::Arc::new(horizon_core::MemoryStorage::new()),
        settings,
        std::sync::Arc::new(horizon_backend::testing::FakeIdentityService::new()),
    )
    .unwrap();

    let view = backend
        .write_config("prod", InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL))
        .await
        .unwrap();
    assert_eq!(view.root_rotation_period, Some(HOUR * 24));
    assert_eq!(backend.scheduler().queue_len(), 1);
}

#[tokio::test]
async fn delete_drops_queue_item_and_pending_intents() {
    let h = Harness::new();
    h.backend
        .write_config(
            "prod",
            InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL).with_rotation_period(HOUR),
        )
        .await
        .unwrap();
    let wal = StorageWal::new(h.storage.clone());
    let intent = RotationIntent::new(prod(), ROOT, "next".into(), None);
    wal.write(&intent.to_entry().unwrap()).await.unwrap();

    assert!(h.backend.delete_config("prod").await.unwrap());
    assert!(!h.backend.delete_config("prod").await.unwrap());

    assert!(h.backend.read_config("prod").await.unwrap().is_none());
    assert_eq!(h.backend.scheduler().queue_len(), 0);
    assert!(wal.list_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn operator_password_supersedes_pending_intents() {
    let h = Harness::new().with_instance().await;
    let wal = StorageWal::new(h.storage.clone());
    let intent = RotationIntent::new(prod(), ROOT, "never-applied".into(), None);
    wal.write(&intent.to_entry().unwrap()).await.unwrap();

    // a policy change leaves the intent alone
    h.backend
        .write_config(
            "prod",
            InstanceConfigUpdate::default().with_password_policy("strict"),
        )
        .await
        .unwrap();
    assert_eq!(wal.list_ids().await.unwrap(), vec![intent.id]);

    h.backend
        .write_config(
            "prod",
            InstanceConfigUpdate {
                password: Some("reset-by-operator".into()),
                ..InstanceConfigUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(wal.list_ids().await.unwrap().is_empty());
    assert!(stored(&h).await.password.matches("reset-by-operator"));
}

#[tokio::test]
async fn config_writes_invalidate_cached_clients() {
    let h = Harness::new().with_instance().await.with_role().await;
    h.backend.issue_credentials("dev").await.unwrap();
    assert_eq!(h.backend.cached_clients(), 1);

    h.backend
        .write_config(
            "prod",
            InstanceConfigUpdate::default().with_password_policy("strict"),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.cached_clients(), 0);
}

#[tokio::test]
async fn lists_configured_instances() {
    let h = Harness::new();
    for name in ["staging", "prod"] {
        h.backend
            .write_config(name, InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL))
            .await
            .unwrap();
    }
    assert_eq!(h.backend.list_configs().await.unwrap(), vec!["prod", "staging"]);
}
