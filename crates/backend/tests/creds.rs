//! Dynamic credential issuance, renewal and revocation

mod common;

use common::{HOUR, Harness};
use horizon_backend::testing::FakeCall;
use horizon_backend::{BackendError, IdentityError, LeaseData};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn issue_creates_a_configured_account() {
    let h = Harness::new().with_instance().await.with_role().await;

    let issued = h.backend.issue_credentials("dev").await.unwrap();

    assert_eq!(issued.username.len(), 20);
    assert_eq!(issued.lease.ttl, HOUR);
    assert_eq!(issued.lease.max_ttl, HOUR * 24);
    assert_eq!(
        issued.lease.internal,
        LeaseData {
            username: issued.username.clone(),
            role: "dev".into(),
        }
    );

    let account = h.identity.account(&issued.username).unwrap();
    assert!(issued.password.matches(account.password.as_deref().unwrap()));
    assert_eq!(account.roles, vec!["auditor".to_string()]);
    assert_eq!(account.contact.as_deref(), Some("ops@example.com"));
    assert_eq!(
        h.identity.calls(),
        vec![FakeCall::CreateAccount, FakeCall::SetPassword, FakeCall::AssignRoles]
    );
}

#[tokio::test]
async fn failing_step_aborts_issuance() {
    let h = Harness::new().with_instance().await.with_role().await;
    h.identity.fail_next(
        FakeCall::AssignRoles,
        IdentityError::Remote {
            status: 500,
            message: "role store offline".into(),
        },
    );

    let err = h.backend.issue_credentials("dev").await.unwrap_err();
    assert!(matches!(err, BackendError::Identity(IdentityError::Remote { status: 500, .. })));
}

#[tokio::test]
async fn unknown_role_and_instance_are_reported() {
    let h = Harness::new().with_role().await;
    assert!(matches!(
        h.backend.issue_credentials("nope").await,
        Err(BackendError::UnknownRole(_))
    ));
    assert!(matches!(
        h.backend.issue_credentials("dev").await,
        Err(BackendError::UnknownInstance(_))
    ));
}

#[tokio::test]
async fn unknown_password_policy_fails_before_any_remote_call() {
    let h = Harness::new().with_instance().await;
    h.backend
        .write_role(
            "strict",
            horizon_backend::RoleUpdate {
                credential_config: Some(horizon_backend::CredentialConfig {
                    username_policy: Some("missing".into()),
                    password_policy: None,
                }),
                ..horizon_backend::RoleUpdate::for_instance("prod")
            },
        )
        .await
        .unwrap();

    let err = h.backend.issue_credentials("strict").await.unwrap_err();
    assert!(matches!(err, BackendError::Generation(_)));
    assert!(h.identity.calls().is_empty());
}

#[tokio::test]
async fn renew_keeps_the_account_and_extends_the_lease() {
    let h = Harness::new().with_instance().await.with_role().await;
    let issued = h.backend.issue_credentials("dev").await.unwrap();

    let renewed = h.backend.renew_credentials(&issued.lease.internal).await.unwrap();
    assert!(renewed.renewed_at >= issued.lease.renewed_at);
    assert_eq!(renewed.ttl, HOUR);
    assert_eq!(h.identity.count(FakeCall::DeleteAccount), 0);
    assert_eq!(h.identity.count(FakeCall::CreateAccount), 1);

    let password = h.identity.password_of(&issued.username).unwrap();
    assert!(issued.password.matches(&password));
}

#[tokio::test]
async fn renew_fails_when_the_account_is_gone() {
    let h = Harness::new().with_instance().await.with_role().await;
    let issued = h.backend.issue_credentials("dev").await.unwrap();
    h.backend.revoke_credentials(&issued.lease.internal).await.unwrap();

    let err = h.backend.renew_credentials(&issued.lease.internal).await.unwrap_err();
    assert!(matches!(err, BackendError::Identity(IdentityError::NotFound(_))));
}

#[tokio::test]
async fn revoke_deletes_the_account_once() {
    let h = Harness::new().with_instance().await.with_role().await;
    let issued = h.backend.issue_credentials("dev").await.unwrap();
    assert_eq!(h.identity.account_count(), 2);

    h.backend.revoke_credentials(&issued.lease.internal).await.unwrap();
    assert!(h.identity.account(&issued.username).is_none());

    // already gone
    h.backend.revoke_credentials(&issued.lease.internal).await.unwrap();
    assert_eq!(h.identity.count(FakeCall::DeleteAccount), 1);
}

#[tokio::test]
async fn revoke_of_unknown_role_is_an_error() {
    let h = Harness::new().with_instance().await;
    let lease = LeaseData {
        username: "someone".into(),
        role: "gone".into(),
    };
    assert!(matches!(
        h.backend.revoke_credentials(&lease).await,
        Err(BackendError::UnknownRole(_))
    ));
}

#[tokio::test]
async fn issuance_follows_root_rotation() {
    let h = Harness::new().with_instance().await.with_role().await;
    h.backend.issue_credentials("dev").await.unwrap();
    let connects = h.identity.connects();

    h.backend.rotate_root("prod").await.unwrap();
    assert!(h.identity.password_of(common::ROOT).unwrap() != common::INITIAL);

    // the cached client with the old password was dropped
    h.backend.issue_credentials("dev").await.unwrap();
    assert!(h.identity.connects() > connects);
    assert_eq!(h.identity.account_count(), 3);
}
