//! Role paths

mod common;

use std::time::Duration;

use common::{HOUR, Harness};
use horizon_backend::{BackendError, CredentialConfig, RoleUpdate};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn write_read_update_delete() {
    let h = Harness::new().with_role().await;

    let role = h.backend.read_role("dev").await.unwrap().unwrap();
    assert_eq!(role.instance, "prod");
    assert_eq!(role.roles, vec!["auditor".to_string()]);
    assert_eq!(role.ttl, HOUR);

    let updated = h
        .backend
        .write_role(
            "dev",
            RoleUpdate {
                credential_config: Some(CredentialConfig {
                    password_policy: Some("strict".into()),
                    username_policy: None,
                }),
                ..RoleUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.contact.as_deref(), Some("ops@example.com"));
    assert_eq!(updated.credential_config.password_policy.as_deref(), Some("strict"));

    assert!(h.backend.delete_role("dev").await.unwrap());
    assert!(h.backend.read_role("dev").await.unwrap().is_none());
    assert!(!h.backend.delete_role("dev").await.unwrap());
}

#[tokio::test]
async fn ttl_above_max_ttl_is_rejected() {
    let h = Harness::new().with_role().await;
    let err = h
        .backend
        .write_role(
            "dev",
            RoleUpdate {
                ttl: Some(HOUR * 48),
                ..RoleUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));

    // the stored role is untouched
    let role = h.backend.read_role("dev").await.unwrap().unwrap();
    assert_eq!(role.ttl, HOUR);
}

#[tokio::test]
async fn new_role_needs_an_instance() {
    let h = Harness::new();
    let err = h
        .backend
        .write_role(
            "dev",
            RoleUpdate {
                ttl: Some(Duration::from_secs(60)),
                ..RoleUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidRequest(_)));
}

#[tokio::test]
async fn lists_roles_sorted() {
    let h = Harness::new();
    for name in ["ops", "dev", "audit"] {
        h.backend
            .write_role(name, RoleUpdate::for_instance("prod"))
            .await
            .unwrap();
    }
    assert_eq!(h.backend.list_roles().await.unwrap(), vec!["audit", "dev", "ops"]);
}
