//! Instance configuration records (`config/<instance>`)
//!
//! One record per Horizon instance: where it lives, the root credentials the
//! backend authenticates with, and how often those are rotated. Every write
//! runs under the instance's key lock and keeps the rotation queue in step
//! with the stored record.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString, Storage, StorageExt, StorageResult};
use horizon_rotation::RotationRecord;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::HorizonBackend;
use crate::error::{BackendError, BackendResult};

/// Storage prefix of instance configs
pub const CONFIG_PREFIX: &str = "config/";

/// Connection detail keys never returned by reads
const REDACTED_DETAILS: [&str; 2] = ["password", "private_key"];

/// Stored configuration of one Horizon instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Base URL of the instance
    pub endpoint: Url,
    /// Root account name
    pub username: String,
    /// Root account password
    pub password: SecretString,
    /// Policy for generated root passwords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<String>,
    /// Default policy for generated usernames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_policy: Option<String>,
    /// Period of automatic root rotation; `None` rotates only on request
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub root_rotation_period: Option<Duration>,
    /// Last committed root rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_root_rotation: Option<DateTime<Utc>>,
    /// Statements run on the instance when the root password changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_rotation_statements: Vec<String>,
    /// Provider-specific connection settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_details: BTreeMap<String, String>,
}

impl InstanceConfig {
    /// Scheduling view of the root credential
    pub fn to_record(&self) -> RotationRecord {
        RotationRecord {
            principal: self.username.clone(),
            interval: self.root_rotation_period,
            last_rotation: self.last_root_rotation,
            policy: self.password_policy.clone(),
        }
    }

    fn validate(&self) -> BackendResult<()> {
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(BackendError::invalid(format!(
                "endpoint '{}' must be an http or https URL",
                self.endpoint
            )));
        }
        if self.username.trim().is_empty() {
            return Err(BackendError::invalid("username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(BackendError::invalid("password cannot be empty"));
        }
        Ok(())
    }
}

/// Create-or-update request for an instance config
///
/// Absent fields keep their stored value. A zero `root_rotation_period`
/// turns periodic rotation off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceConfigUpdate {
    /// Base URL of the instance; required on create
    pub endpoint: Option<String>,
    /// Root account name; required on create
    pub username: Option<String>,
    /// Root account password; required on create
    pub password: Option<SecretString>,
    /// Policy for generated root passwords
    pub password_policy: Option<String>,
    /// Default policy for generated usernames
    pub username_policy: Option<String>,
    /// Period of automatic root rotation
    #[serde(with = "humantime_serde")]
    pub root_rotation_period: Option<Duration>,
    /// Statements run on the instance when the root password changes
    pub root_rotation_statements: Option<Vec<String>>,
    /// Provider-specific connection settings; replaces the stored map
    pub connection_details: Option<BTreeMap<String, String>>,
}

impl InstanceConfigUpdate {
    /// Update carrying the three fields a new config needs
    pub fn new(endpoint: impl Into<String>, username: impl Into<String>, password: &str) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            username: Some(username.into()),
            password: Some(SecretString::new(password)),
            ..Self::default()
        }
    }

    /// Set the root rotation period
    pub fn with_rotation_period(mut self, period: Duration) -> Self {
        self.root_rotation_period = Some(period);
        self
    }

    /// Set the root password policy
    pub fn with_password_policy(mut self, policy: impl Into<String>) -> Self {
        self.password_policy = Some(policy.into());
        self
    }

    fn merge(
        self,
        existing: Option<InstanceConfig>,
        default_period: Option<Duration>,
    ) -> BackendResult<InstanceConfig> {
        let endpoint = self.endpoint.map(|raw| parse_endpoint(&raw)).transpose()?;

        let mut config = match existing {
            Some(config) => config,
            None => InstanceConfig {
                endpoint: endpoint
                    .clone()
                    .ok_or_else(|| missing_field("endpoint"))?,
                username: self.username.clone().ok_or_else(|| missing_field("username"))?,
                password: self.password.clone().ok_or_else(|| missing_field("password"))?,
                password_policy: None,
                username_policy: None,
                root_rotation_period: default_period,
                last_root_rotation: None,
                root_rotation_statements: Vec::new(),
                connection_details: BTreeMap::new(),
            },
        };

        if let Some(endpoint) = endpoint {
            config.endpoint = endpoint;
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(policy) = self.password_policy {
            config.password_policy = Some(policy).filter(|p| !p.is_empty());
        }
        if let Some(policy) = self.username_policy {
            config.username_policy = Some(policy).filter(|p| !p.is_empty());
        }
        if let Some(period) = self.root_rotation_period {
            config.root_rotation_period = Some(period).filter(|p| !p.is_zero());
        }
        if let Some(statements) = self.root_rotation_statements {
            config.root_rotation_statements = statements;
        }
        if let Some(details) = self.connection_details {
            config.connection_details = details;
        }

        config.validate()?;
        Ok(config)
    }
}

fn missing_field(name: &str) -> BackendError {
    BackendError::invalid(format!("missing required field '{name}'"))
}

fn parse_endpoint(raw: &str) -> BackendResult<Url> {
    Url::parse(raw).map_err(|e| BackendError::invalid(format!("invalid endpoint '{raw}': {e}")))
}

/// Instance config as returned by reads: no password, no secret details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceConfigView {
    /// Base URL of the instance
    pub endpoint: Url,
    /// Root account name
    pub username: String,
    /// Policy for generated root passwords
    pub password_policy: Option<String>,
    /// Default policy for generated usernames
    pub username_policy: Option<String>,
    /// Period of automatic root rotation
    #[serde(with = "humantime_serde")]
    pub root_rotation_period: Option<Duration>,
    /// Last committed root rotation
    pub last_root_rotation: Option<DateTime<Utc>>,
    /// Next queued root rotation
    pub next_root_rotation: Option<DateTime<Utc>>,
    /// Statements run on the instance when the root password changes
    pub root_rotation_statements: Vec<String>,
    /// Non-secret connection settings
    pub connection_details: BTreeMap<String, String>,
}

impl InstanceConfigView {
    fn new(config: InstanceConfig, next_root_rotation: Option<DateTime<Utc>>) -> Self {
        let mut connection_details = config.connection_details;
        connection_details.retain(|k, _| !REDACTED_DETAILS.contains(&k.as_str()));
        Self {
            endpoint: config.endpoint,
            username: config.username,
            password_policy: config.password_policy,
            username_policy: config.username_policy,
            root_rotation_period: config.root_rotation_period,
            last_root_rotation: config.last_root_rotation,
            next_root_rotation,
            root_rotation_statements: config.root_rotation_statements,
            connection_details,
        }
    }
}

fn config_path(instance: &CredentialKey) -> String {
    format!("{CONFIG_PREFIX}{instance}")
}

pub(crate) async fn load_config(
    storage: &dyn Storage,
    instance: &CredentialKey,
) -> StorageResult<Option<InstanceConfig>> {
    storage.get_json(&config_path(instance)).await
}

pub(crate) async fn store_config(
    storage: &dyn Storage,
    instance: &CredentialKey,
    config: &InstanceConfig,
) -> StorageResult<()> {
    storage.put_json(&config_path(instance), config).await
}

impl HorizonBackend {
    /// Create or update the config of `name`
    ///
    /// Requeues the instance's root rotation to match the new record. A new
    /// root password supersedes any pending rotation intent.
    pub async fn write_config(
        &self,
        name: &str,
        update: InstanceConfigUpdate,
    ) -> BackendResult<InstanceConfigView> {
        let key = CredentialKey::new(name)?;
        let guard = self.scheduler().lock(&key).await?;

        let existing = load_config(self.storage(), &key).await?;
        let created = existing.is_none();
        let password_changed = update.password.is_some();
        let config = update.merge(existing, self.settings().default_root_rotation_period)?;

        store_config(self.storage(), &key, &config).await?;
        self.clients().invalidate(&key);
        if password_changed && !created {
            self.scheduler().discard_intents(&guard, &key).await?;
        }
        let due = self.scheduler().schedule(&guard, &key, &config.to_record())?;

        tracing::info!(
            instance = %key,
            created,
            rotation_period = ?config.root_rotation_period,
            next_rotation = ?due,
            "instance config written"
        );
        Ok(InstanceConfigView::new(config, due))
    }

    /// Config of `name` with secrets removed
    pub async fn read_config(&self, name: &str) -> BackendResult<Option<InstanceConfigView>> {
        let key = CredentialKey::new(name)?;
        let _guard = self.scheduler().lock(&key).await?;
        let config = load_config(self.storage(), &key).await?;
        Ok(config.map(|config| InstanceConfigView::new(config, self.scheduler().due_time(&key))))
    }

    /// Delete the config of `name` with its queue item and pending intents
    ///
    /// Returns `false` if no such config existed.
    pub async fn delete_config(&self, name: &str) -> BackendResult<bool> {
        let key = CredentialKey::new(name)?;
        let guard = self.scheduler().lock(&key).await?;

        let existed = load_config(self.storage(), &key).await?.is_some();
        self.storage().delete(&config_path(&key)).await?;
        self.scheduler().unschedule(&guard, &key)?;
        self.scheduler().discard_intents(&guard, &key).await?;
        self.clients().invalidate(&key);

        if existed {
            tracing::info!(instance = %key, "instance config deleted");
        }
        Ok(existed)
    }

    /// Names of all configured instances
    pub async fn list_configs(&self) -> BackendResult<Vec<String>> {
        let mut names = self.storage().list(CONFIG_PREFIX).await?;
        names.retain(|name| !name.ends_with('/'));
        names.sort();
        Ok(names)
    }
}
