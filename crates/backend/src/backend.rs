//! The backend object
//!
//! [`HorizonBackend`] owns storage, the rotation scheduler and the identity
//! clients, and is passed by reference into every request path. The path
//! operations themselves live next to their record types in
//! [`config`](crate::config), [`role`](crate::role), [`creds`](crate::creds).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, Storage};
use horizon_rotation::{
    DeploymentRole, InitReport, RotationOutcome, RotationScheduler, StorageWal,
};

use crate::config::load_config;
use crate::error::{BackendError, BackendResult};
use crate::generator::{PolicyGenerator, ValueGenerator};
use crate::identity::{ClientCache, IdentityConnector};
use crate::rotator::HorizonRotator;
use crate::settings::BackendSettings;

/// Horizon secrets backend
pub struct HorizonBackend {
    storage: Arc<dyn Storage>,
    settings: BackendSettings,
    generator: Arc<dyn ValueGenerator>,
    clients: Arc<ClientCache>,
    scheduler: RotationScheduler,
}

impl HorizonBackend {
    /// Backend generating values with the policies from `settings`
    pub fn new(
        storage: Arc<dyn Storage>,
        settings: BackendSettings,
        connector: Arc<dyn IdentityConnector>,
    ) -> BackendResult<Self> {
        let generator = PolicyGenerator::with_policies(settings.password_policies.clone())?;
        Self::with_generator(storage, settings, connector, Arc::new(generator))
    }

    /// Backend with a custom value generator
    pub fn with_generator(
        storage: Arc<dyn Storage>,
        settings: BackendSettings,
        connector: Arc<dyn IdentityConnector>,
        generator: Arc<dyn ValueGenerator>,
    ) -> BackendResult<Self> {
        settings.validate()?;

        let clients = Arc::new(ClientCache::new(connector));
        let rotator = Arc::new(HorizonRotator::new(
            Arc::clone(&storage),
            Arc::clone(&generator),
            Arc::clone(&clients),
        ));
        let wal = Arc::new(StorageWal::new(Arc::clone(&storage)));
        let scheduler = RotationScheduler::new(settings.rotation.clone(), wal, rotator)?;

        Ok(Self {
            storage,
            settings,
            generator,
            clients,
            scheduler,
        })
    }

    /// Build the rotation queue; rotation owners also replay the WAL and
    /// start the ticker
    pub async fn setup(&self, role: DeploymentRole) -> BackendResult<InitReport> {
        Ok(self.scheduler.start_queue(role).await?)
    }

    /// Stop the ticker and wait for in-flight rotations
    pub async fn teardown(&self) {
        self.scheduler.stop_queue().await;
    }

    /// Rotate the root password of instance `name` now
    ///
    /// Runs the same lock, WAL and commit sequence as a scheduled rotation
    /// and returns the commit time.
    pub async fn rotate_root(&self, name: &str) -> BackendResult<DateTime<Utc>> {
        let key = CredentialKey::new(name)?;
        let guard = self.scheduler.lock(&key).await?;
        if load_config(self.storage(), &key).await?.is_none() {
            return Err(BackendError::UnknownInstance(name.to_string()));
        }

        match self.scheduler.rotate_now(&guard, &key).await {
            RotationOutcome::Rotated { at } => {
                tracing::info!(instance = %key, "root credentials rotated on request");
                Ok(at)
            }
            RotationOutcome::Failed(e) => Err(e.into()),
            RotationOutcome::Dropped => Err(BackendError::UnknownInstance(name.to_string())),
            RotationOutcome::Paused => Err(BackendError::invalid(format!(
                "rotation of '{name}' is paused until its quarantined intent is released"
            ))),
        }
    }

    /// The rotation scheduler
    pub fn scheduler(&self) -> &RotationScheduler {
        &self.scheduler
    }

    /// Settings the backend was built with
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Durable storage
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Number of cached identity clients
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn generator(&self) -> &dyn ValueGenerator {
        self.generator.as_ref()
    }

    pub(crate) fn clients(&self) -> &ClientCache {
        &self.clients
    }
}

impl std::fmt::Debug for HorizonBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizonBackend")
            .field("settings", &self.settings)
            .field("scheduler", &self.scheduler)
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}
