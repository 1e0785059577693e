//! Identity service client
//!
//! The backend manages local accounts on a Horizon instance through the
//! [`IdentityClient`] contract. An [`IdentityConnector`] builds a client
//! authenticated as a given principal; the HTTP implementation lives in
//! [`http`].

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use horizon_core::{CredentialKey, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::IdentityError;

pub use http::{HttpConnector, HttpIdentityClient};

/// Result type for identity service calls
pub type IdentityResult<T> = Result<T, IdentityError>;

/// A local account on the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Login name, also the account handle in requests
    pub identifier: String,
    /// Contact address attached to the account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Roles granted to the account
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Account {
    /// Account handle without contact or roles
    pub fn named(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            contact: None,
            roles: Vec::new(),
        }
    }
}

/// Operations on local accounts
///
/// Calls are not assumed idempotent; `set_password` in particular may be
/// delivered more than once for the same value.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Create an account
    async fn create_account(&self, username: &str, contact: Option<&str>)
    -> IdentityResult<Account>;

    /// Replace the account's password
    async fn set_password(&self, account: &Account, value: &SecretString) -> IdentityResult<()>;

    /// Replace the account's roles
    async fn assign_roles(
        &self,
        account: &Account,
        contact: Option<&str>,
        roles: &[String],
    ) -> IdentityResult<()>;

    /// Look an account up by name
    async fn get_account(&self, username: &str) -> IdentityResult<Account>;

    /// Delete an account
    async fn delete_account(&self, account: &Account) -> IdentityResult<()>;
}

/// Builds clients authenticated as a given principal
#[async_trait]
pub trait IdentityConnector: Send + Sync {
    /// Client for `endpoint` authenticating as `username` / `password`
    async fn connect(
        &self,
        endpoint: &Url,
        username: &str,
        password: &SecretString,
    ) -> IdentityResult<Arc<dyn IdentityClient>>;
}

/// Clients of the foreground paths, one per instance
///
/// Entries are dropped whenever the instance's config or root password
/// changes, so a cached client never authenticates with a stale password.
pub(crate) struct ClientCache {
    connector: Arc<dyn IdentityConnector>,
    clients: DashMap<CredentialKey, Arc<dyn IdentityClient>>,
}

impl ClientCache {
    pub(crate) fn new(connector: Arc<dyn IdentityConnector>) -> Self {
        Self {
            connector,
            clients: DashMap::new(),
        }
    }

    pub(crate) fn connector(&self) -> &Arc<dyn IdentityConnector> {
        &self.connector
    }

    /// Cached client for `instance`, connecting on first use
    pub(crate) async fn get(
        &self,
        instance: &CredentialKey,
        endpoint: &Url,
        username: &str,
        password: &SecretString,
    ) -> IdentityResult<Arc<dyn IdentityClient>> {
        if let Some(client) = self.clients.get(instance) {
            return Ok(client.clone());
        }
        let client = self.connector.connect(endpoint, username, password).await?;
        self.clients.insert(instance.clone(), client.clone());
        Ok(client)
    }

    pub(crate) fn invalidate(&self, instance: &CredentialKey) {
        if self.clients.remove(instance).is_some() {
            tracing::debug!(instance = %instance, "dropped cached identity client");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}
