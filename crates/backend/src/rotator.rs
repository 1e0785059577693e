//! Root credential rotation against Horizon instances
//!
//! [`HorizonRotator`] is the backend's side of the rotation scheduler: the
//! instance configs under `config/` are the durable records and the
//! instance's root account is the rotated principal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString, Storage};
use horizon_rotation::{
    CredentialRotator, RotationError, RotationIntent, RotationRecord, RotationResult,
};

use crate::config::{CONFIG_PREFIX, InstanceConfig, load_config, store_config};
use crate::error::IdentityError;
use crate::generator::ValueGenerator;
use crate::identity::ClientCache;

/// Rotates the root password of each configured instance
pub struct HorizonRotator {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn ValueGenerator>,
    clients: Arc<ClientCache>,
}

impl HorizonRotator {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ValueGenerator>,
        clients: Arc<ClientCache>,
    ) -> Self {
        Self {
            storage,
            generator,
            clients,
        }
    }

    async fn require_config(&self, key: &CredentialKey) -> RotationResult<InstanceConfig> {
        load_config(self.storage.as_ref(), key)
            .await?
            .ok_or_else(|| RotationError::Config(format!("instance config '{key}' not found")))
    }

    /// Check that `value` already authenticates `principal`
    ///
    /// Used when the stored password is rejected: an earlier delivery of the
    /// same intent may have changed it before the commit was lost.
    async fn confirm_applied(
        &self,
        config: &InstanceConfig,
        principal: &str,
        value: &SecretString,
    ) -> RotationResult<()> {
        let client = self
            .clients
            .connector()
            .connect(&config.endpoint, &config.username, value)
            .await?;
        client.get_account(principal).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialRotator for HorizonRotator {
    async fn list_records(&self) -> RotationResult<Vec<(CredentialKey, RotationRecord)>> {
        let mut records = Vec::new();
        for name in self.storage.list(CONFIG_PREFIX).await? {
            let key = match CredentialKey::new(name.as_str()) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "skipping unreadable config entry");
                    continue;
                }
            };
            match load_config(self.storage.as_ref(), &key).await {
                Ok(Some(config)) => records.push((key, config.to_record())),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(instance = %key, error = %e, "skipping unreadable instance config");
                }
            }
        }
        Ok(records)
    }

    async fn load(&self, key: &CredentialKey) -> RotationResult<Option<RotationRecord>> {
        Ok(load_config(self.storage.as_ref(), key)
            .await?
            .map(|config| config.to_record()))
    }

    async fn generate(
        &self,
        _key: &CredentialKey,
        record: &RotationRecord,
    ) -> RotationResult<SecretString> {
        Ok(self.generator.generate(record.policy.as_deref())?)
    }

    async fn apply(&self, _record: &RotationRecord, intent: &RotationIntent) -> RotationResult<()> {
        let config = self.require_config(&intent.key).await?;
        let client = self
            .clients
            .connector()
            .connect(&config.endpoint, &config.username, &config.password)
            .await?;

        match client.get_account(&intent.principal_username).await {
            Ok(account) => {
                client.set_password(&account, &intent.new_secret).await?;
                Ok(())
            }
            Err(IdentityError::Unauthorized(_)) => {
                self.confirm_applied(&config, &intent.principal_username, &intent.new_secret)
                    .await?;
                tracing::info!(
                    instance = %intent.key,
                    wal_id = %intent.id,
                    "new root password already live"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(
        &self,
        _record: &RotationRecord,
        intent: &RotationIntent,
        rotated_at: DateTime<Utc>,
    ) -> RotationResult<()> {
        let mut config = self.require_config(&intent.key).await?;
        config.password = intent.new_secret.clone();
        config.last_root_rotation = Some(rotated_at);
        store_config(self.storage.as_ref(), &intent.key, &config).await?;
        self.clients.invalidate(&intent.key);
        Ok(())
    }
}

impl std::fmt::Debug for HorizonRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizonRotator")
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}
