//! Shared fixtures for the backend integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use horizon_backend::testing::FakeIdentityService;
use horizon_backend::{BackendSettings, HorizonBackend, InstanceConfigUpdate, RoleUpdate};
use horizon_core::{MemoryStorage, Storage};
use horizon_rotation::RotationConfig;

pub const ENDPOINT: &str = "https://horizon.example.com";
pub const ROOT: &str = "root";
pub const INITIAL: &str = "initial-root-pw";
pub const HOUR: Duration = Duration::from_secs(3600);

/// Settings with short scheduler timings
pub fn settings() -> BackendSettings {
    horizon_log::init_test();
    BackendSettings {
        rotation: RotationConfig {
            tick_interval: Duration::from_millis(25),
            retry_backoff: Duration::from_secs(10),
            max_retry_backoff: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(5),
            remote_timeout: Duration::from_secs(5),
            lock_table_size: 16,
            ..RotationConfig::default()
        },
        ..BackendSettings::default()
    }
}

pub struct Harness {
    pub storage: Arc<dyn Storage>,
    pub identity: FakeIdentityService,
    pub backend: HorizonBackend,
}

impl Harness {
    pub fn new() -> Self {
        Self::over(Arc::new(MemoryStorage::new()), FakeIdentityService::new().with_account(ROOT, INITIAL))
    }

    pub fn over(storage: Arc<dyn Storage>, identity: FakeIdentityService) -> Self {
        let backend = HorizonBackend::new(
            Arc::clone(&storage),
            settings(),
            Arc::new(identity.clone()),
        )
        .unwrap();
        Self {
            storage,
            identity,
            backend,
        }
    }

    /// Instance `prod` pointing at the fake service
    pub async fn with_instance(self) -> Self {
        self.backend
            .write_config("prod", InstanceConfigUpdate::new(ENDPOINT, ROOT, INITIAL))
            .await
            .unwrap();
        self
    }

    /// Role `dev` issuing `auditor` accounts on `prod`
    pub async fn with_role(self) -> Self {
        self.backend
            .write_role(
                "dev",
                RoleUpdate {
                    roles: Some(vec!["auditor".into()]),
                    contact: Some("ops@example.com".into()),
                    ttl: Some(HOUR),
                    max_ttl: Some(HOUR * 24),
                    ..RoleUpdate::for_instance("prod")
                },
            )
            .await
            .unwrap();
        self
    }
}

pub async fn wait_until<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if done().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
