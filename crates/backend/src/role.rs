//! Role records (`roles/<name>`)

use std::time::Duration;

use horizon_core::{CredentialKey, Storage, StorageExt, StorageResult};
use serde::{Deserialize, Serialize};

use crate::backend::HorizonBackend;
use crate::error::{BackendError, BackendResult};

/// Storage prefix of roles
pub const ROLE_PREFIX: &str = "roles/";

/// Generation policies of credentials issued for a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Policy of generated passwords
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<String>,
    /// Policy of generated usernames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_policy: Option<String>,
}

/// Template of the accounts issued through `creds/<role>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Instance the accounts are created on
    pub instance: String,
    /// Horizon roles granted to issued accounts
    #[serde(default)]
    pub roles: Vec<String>,
    /// Contact address attached to issued accounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Default lease duration; zero defers to the host default
    #[serde(default, with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum lease duration; zero means unbounded
    #[serde(default, with = "humantime_serde")]
    pub max_ttl: Duration,
    /// Generation policies
    #[serde(default)]
    pub credential_config: CredentialConfig,
}

impl Role {
    fn validate(&self) -> BackendResult<()> {
        CredentialKey::new(self.instance.as_str())
            .map_err(|e| BackendError::invalid(format!("invalid instance name: {e}")))?;
        if !self.max_ttl.is_zero() && self.ttl > self.max_ttl {
            return Err(BackendError::invalid("ttl cannot be greater than max_ttl"));
        }
        Ok(())
    }
}

/// Create-or-update request for a role; absent fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoleUpdate {
    /// Instance the accounts are created on; required on create
    pub instance: Option<String>,
    /// Horizon roles granted to issued accounts
    pub roles: Option<Vec<String>>,
    /// Contact address attached to issued accounts
    pub contact: Option<String>,
    /// Default lease duration
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// Maximum lease duration
    #[serde(with = "humantime_serde")]
    pub max_ttl: Option<Duration>,
    /// Generation policies; replaces the stored value
    pub credential_config: Option<CredentialConfig>,
}

impl RoleUpdate {
    /// Update naming the instance of a new role
    pub fn for_instance(instance: impl Into<String>) -> Self {
        Self {
            instance: Some(instance.into()),
            ..Self::default()
        }
    }

    fn merge(self, existing: Option<Role>) -> BackendResult<Role> {
        let mut role = match existing {
            Some(role) => role,
            None => Role {
                instance: self
                    .instance
                    .clone()
                    .ok_or_else(|| BackendError::invalid("missing required field 'instance'"))?,
                roles: Vec::new(),
                contact: None,
                ttl: Duration::ZERO,
                max_ttl: Duration::ZERO,
                credential_config: CredentialConfig::default(),
            },
        };

        if let Some(instance) = self.instance {
            role.instance = instance;
        }
        if let Some(roles) = self.roles {
            role.roles = roles;
        }
        if let Some(contact) = self.contact {
            role.contact = Some(contact).filter(|c| !c.is_empty());
        }
        if let Some(ttl) = self.ttl {
            role.ttl = ttl;
        }
        if let Some(max_ttl) = self.max_ttl {
            role.max_ttl = max_ttl;
        }
        if let Some(credential_config) = self.credential_config {
            role.credential_config = credential_config;
        }

        role.validate()?;
        Ok(role)
    }
}

fn role_path(name: &CredentialKey) -> String {
    format!("{ROLE_PREFIX}{name}")
}

pub(crate) async fn load_role(storage: &dyn Storage, name: &CredentialKey) -> StorageResult<Option<Role>> {
    storage.get_json(&role_path(name)).await
}

impl HorizonBackend {
    /// Create or update role `name`
    pub async fn write_role(&self, name: &str, update: RoleUpdate) -> BackendResult<Role> {
        let key = CredentialKey::new(name)?;
        let existing = load_role(self.storage(), &key).await?;
        let created = existing.is_none();
        let role = update.merge(existing)?;

        self.storage().put_json(&role_path(&key), &role).await?;
        tracing::info!(role = %key, instance = %role.instance, created, "role written");
        Ok(role)
    }

    /// Role `name`, if defined
    pub async fn read_role(&self, name: &str) -> BackendResult<Option<Role>> {
        let key = CredentialKey::new(name)?;
        Ok(load_role(self.storage(), &key).await?)
    }

    /// Delete role `name`; returns `false` if it did not exist
    ///
    /// Accounts already issued for the role stay until their leases are
    /// revoked.
    pub async fn delete_role(&self, name: &str) -> BackendResult<bool> {
        let key = CredentialKey::new(name)?;
        let existed = load_role(self.storage(), &key).await?.is_some();
        self.storage().delete(&role_path(&key)).await?;
        if existed {
            tracing::info!(role = %key, "role deleted");
        }
        Ok(existed)
    }

    /// Names of all roles
    pub async fn list_roles(&self) -> BackendResult<Vec<String>> {
        let mut names = self.storage().list(ROLE_PREFIX).await?;
        names.retain(|name| !name.ends_with('/'));
        names.sort();
        Ok(names)
    }

    pub(crate) async fn require_role(&self, name: &str) -> BackendResult<(CredentialKey, Role)> {
        let key = CredentialKey::new(name)?;
        let role = load_role(self.storage(), &key)
            .await?
            .ok_or_else(|| BackendError::UnknownRole(name.to_string()))?;
        Ok((key, role))
    }
}
