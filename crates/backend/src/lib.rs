//! # Horizon Backend
//!
//! Secrets backend for Horizon instances: stores instance connection
//! configs and roles, issues short-lived local accounts, and keeps each
//! instance's root password rotating in the background through
//! [`horizon_rotation`].
//!
//! ## Paths
//!
//! - `config/<instance>`: [`HorizonBackend::write_config`],
//!   [`read_config`](HorizonBackend::read_config),
//!   [`delete_config`](HorizonBackend::delete_config),
//!   [`list_configs`](HorizonBackend::list_configs)
//! - `roles/<name>`: [`HorizonBackend::write_role`] and friends
//! - `creds/<role>`: [`HorizonBackend::issue_credentials`],
//!   [`renew_credentials`](HorizonBackend::renew_credentials),
//!   [`revoke_credentials`](HorizonBackend::revoke_credentials)
//! - `rotate-root/<instance>`: [`HorizonBackend::rotate_root`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use horizon_backend::{BackendSettings, HorizonBackend, HttpConnector, InstanceConfigUpdate};
//! use horizon_core::MemoryStorage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = BackendSettings::default();
//! let connector = Arc::new(HttpConnector::with_timeout(settings.request_timeout)?);
//! let backend = HorizonBackend::new(Arc::new(MemoryStorage::new()), settings, connector)?;
//!
//! backend.setup(backend.settings().deployment_role).await?;
//! backend
//!     .write_config(
//!         "prod",
//!         InstanceConfigUpdate::new("https://horizon.example.com", "root", "initial"),
//!     )
//!     .await?;
//! backend.teardown().await;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod backend;
mod config;
mod creds;
mod error;
mod generator;
pub mod identity;
mod role;
mod rotator;
mod settings;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::HorizonBackend;
pub use config::{CONFIG_PREFIX, InstanceConfig, InstanceConfigUpdate, InstanceConfigView};
pub use creds::{IssuedCredential, Lease, LeaseData};
pub use error::{BackendError, BackendResult, GenerationError, IdentityError};
pub use generator::{CharsetRule, PasswordPolicy, PolicyGenerator, ValueGenerator};
pub use identity::{Account, HttpConnector, HttpIdentityClient, IdentityClient, IdentityConnector};
pub use role::{CredentialConfig, ROLE_PREFIX, Role, RoleUpdate};
pub use rotator::HorizonRotator;
pub use settings::BackendSettings;
