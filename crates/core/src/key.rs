//! Credential key with validation
//!
//! A [`CredentialKey`] names one rotatable credential (an instance name or a
//! role name). It is used as a storage path segment, as the hash input of the
//! key lock table, and as the rotation queue item key, so it only admits
//! characters that are safe in all three places.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for credential keys
const MAX_KEY_LENGTH: usize = 255;

/// Errors from constructing a [`CredentialKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The key was empty
    #[error("credential key cannot be empty")]
    Empty,

    /// The key exceeds the maximum length
    #[error("credential key exceeds maximum length of {MAX_KEY_LENGTH} characters")]
    TooLong,

    /// The key contains a character outside `[A-Za-z0-9_.-]`
    #[error("credential key '{key}' contains invalid character {ch:?}")]
    InvalidCharacter {
        /// The rejected key
        key: String,
        /// The first offending character
        ch: char,
    },

    /// The key starts or ends with `.` or `-`
    #[error("credential key '{0}' must start and end with an alphanumeric character or '_'")]
    InvalidBoundary(String),
}

/// Identifier of one rotatable credential.
///
/// Immutable once built. Accepts word characters plus inner `-` and `.`, the
/// same shape the backend accepts for path names.
///
/// # Examples
///
/// ```
/// use horizon_core::CredentialKey;
///
/// let key = CredentialKey::new("horizon-prod.eu").unwrap();
/// assert_eq!(key.as_str(), "horizon-prod.eu");
///
/// assert!(CredentialKey::new("").is_err());
/// assert!(CredentialKey::new("../etc/passwd").is_err());
/// assert!(CredentialKey::new("trailing-").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialKey(String);

impl CredentialKey {
    /// Creates a new validated key
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();

        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(KeyError::TooLong);
        }
        if let Some(ch) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(KeyError::InvalidCharacter { key, ch });
        }

        let is_boundary_ok =
            |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_boundary_ok(key.chars().next()) || !is_boundary_ok(key.chars().last()) {
            return Err(KeyError::InvalidBoundary(key));
        }

        Ok(Self(key))
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key and returns the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CredentialKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CredentialKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CredentialKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CredentialKey> for String {
    fn from(key: CredentialKey) -> Self {
        key.0
    }
}
