//! Dynamic credentials (`creds/<role>`)
//!
//! Issuance creates a fresh local account on the role's instance. The
//! sequence (create, set password, assign roles) is not transactional: a
//! failing step aborts the request and may leave a created account behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString};
use serde::{Deserialize, Serialize};

use crate::backend::HorizonBackend;
use crate::config::load_config;
use crate::error::{BackendError, BackendResult, IdentityError};
use crate::identity::IdentityClient;
use crate::role::Role;

/// Data the host keeps with a lease and hands back on renew and revoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    /// Issued account name
    pub username: String,
    /// Role the account was issued for
    pub role: String,
}

/// Lease terms of an issued credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease duration
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Upper bound of the lease including renewals
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
    /// When the lease was issued or last renewed
    pub renewed_at: DateTime<Utc>,
    /// Internal data for renew and revoke
    pub internal: LeaseData,
}

impl Lease {
    fn for_role(role: &Role, internal: LeaseData) -> Self {
        Self {
            ttl: role.ttl,
            max_ttl: role.max_ttl,
            renewed_at: Utc::now(),
            internal,
        }
    }
}

/// A freshly issued account
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    /// Account name
    pub username: String,
    /// Account password
    pub password: SecretString,
    /// Lease of the account
    pub lease: Lease,
}

impl HorizonBackend {
    /// Issue a new account for `role_name`
    ///
    /// Holds the instance's key lock throughout, so the root credentials
    /// used here cannot be rotated underneath the request.
    pub async fn issue_credentials(&self, role_name: &str) -> BackendResult<IssuedCredential> {
        let (_, role) = self.require_role(role_name).await?;
        let instance = CredentialKey::new(role.instance.as_str())?;
        let _guard = self.scheduler().lock(&instance).await?;
        let client = self.instance_client(&instance).await?;

        let policies = &role.credential_config;
        let username = self
            .generator()
            .generate(policies.username_policy.as_deref())?
            .expose_secret(str::to_string);
        let contact = role.contact.as_deref();

        let account = client.create_account(&username, contact).await?;
        let password = self.generator().generate(policies.password_policy.as_deref())?;
        client.set_password(&account, &password).await?;
        client.assign_roles(&account, contact, &role.roles).await?;

        tracing::info!(
            role = role_name,
            instance = %instance,
            username = %username,
            "credentials issued"
        );
        let lease = Lease::for_role(
            &role,
            LeaseData {
                username: username.clone(),
                role: role_name.to_string(),
            },
        );
        Ok(IssuedCredential {
            username,
            password,
            lease,
        })
    }

    /// Extend a lease with the role's current TTLs
    ///
    /// The account is kept as is; renewal only checks that the role and
    /// the account still exist.
    pub async fn renew_credentials(&self, lease: &LeaseData) -> BackendResult<Lease> {
        let (_, role) = self.require_role(&lease.role).await?;
        let instance = CredentialKey::new(role.instance.as_str())?;
        let _guard = self.scheduler().lock(&instance).await?;
        let client = self.instance_client(&instance).await?;

        client.get_account(&lease.username).await?;
        tracing::debug!(role = %lease.role, username = %lease.username, "lease renewed");
        Ok(Lease::for_role(&role, lease.clone()))
    }

    /// Delete the account behind a lease
    ///
    /// An account that is already gone counts as revoked.
    pub async fn revoke_credentials(&self, lease: &LeaseData) -> BackendResult<()> {
        let (_, role) = self.require_role(&lease.role).await?;
        let instance = CredentialKey::new(role.instance.as_str())?;
        let _guard = self.scheduler().lock(&instance).await?;
        let client = self.instance_client(&instance).await?;

        let account = match client.get_account(&lease.username).await {
            Ok(account) => account,
            Err(IdentityError::NotFound(_)) => {
                tracing::warn!(username = %lease.username, "account already gone on revoke");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        client.delete_account(&account).await?;
        tracing::info!(role = %lease.role, username = %lease.username, "credentials revoked");
        Ok(())
    }

    /// Client authenticated with the instance's current root credentials
    ///
    /// Callers hold the instance's key lock.
    async fn instance_client(
        &self,
        instance: &CredentialKey,
    ) -> BackendResult<Arc<dyn IdentityClient>> {
        let config = load_config(self.storage(), instance)
            .await?
            .ok_or_else(|| BackendError::UnknownInstance(instance.to_string()))?;
        Ok(self
            .clients()
            .get(instance, &config.endpoint, &config.username, &config.password)
            .await?)
    }
}
