//! Backend settings
//!
//! Loaded from a TOML file; durations use humantime notation:
//!
//! ```toml
//! deployment_role = "primary"
//! default_root_rotation_period = "24h"
//! request_timeout = "15s"
//!
//! [rotation]
//! tick_interval = "5s"
//! workers = 4
//!
//! [password_policies.strict]
//! length = 32
//! rules = [{ charset = "abcdefghijklmnopqrstuvwxyz", min_chars = 4 }]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use horizon_rotation::{DeploymentRole, RotationConfig};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};
use crate::generator::PasswordPolicy;
use crate::identity::http::DEFAULT_REQUEST_TIMEOUT;

/// Process-wide backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    /// Role of this process in a replicated deployment
    pub deployment_role: DeploymentRole,

    /// Scheduler tuning
    pub rotation: RotationConfig,

    /// Root rotation period applied to instance configs written without one
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub default_root_rotation_period: Option<Duration>,

    /// Per-request timeout of the identity service client
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Named value generation policies
    pub password_policies: BTreeMap<String, PasswordPolicy>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            deployment_role: DeploymentRole::default(),
            rotation: RotationConfig::default(),
            default_root_rotation_period: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            password_policies: BTreeMap::new(),
        }
    }
}

impl BackendSettings {
    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> BackendResult<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| BackendError::Settings(format!("TOML parse error: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a settings file
    pub async fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::Settings(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> BackendResult<()> {
        self.rotation.validate()?;
        if self.request_timeout.is_zero() {
            return Err(BackendError::Settings(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if self.default_root_rotation_period.is_some_and(|p| p.is_zero()) {
            return Err(BackendError::Settings(
                "default_root_rotation_period must be greater than zero".into(),
            ));
        }
        for (name, policy) in &self.password_policies {
            policy.validate(name)?;
        }
        Ok(())
    }
}
