//! Backend error types

use horizon_core::{KeyError, StorageError};
use horizon_rotation::RotationError;
use thiserror::Error;

/// Errors returned by the identity service client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The client's credentials were rejected
    #[error("identity service rejected the credentials of '{0}'")]
    Unauthorized(String),

    /// The account does not exist
    #[error("account '{0}' not found")]
    NotFound(String),

    /// The service answered with an error status
    #[error("identity service returned {status}: {message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// The request never got an answer
    #[error("identity service transport error: {0}")]
    Transport(String),

    /// The request did not finish within the client timeout
    #[error("identity service request timed out")]
    Timeout,
}

impl IdentityError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized(_) | Self::NotFound(_) => false,
        }
    }
}

impl From<IdentityError> for RotationError {
    fn from(err: IdentityError) -> Self {
        if err.is_transient() {
            Self::RemoteUnavailable(err.to_string())
        } else {
            Self::Config(err.to_string())
        }
    }
}

/// Value generation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// A named policy was requested but is not registered
    #[error("password policy '{0}' not found")]
    PolicyNotFound(String),

    /// A policy cannot produce a value
    #[error("password policy '{name}' is invalid: {reason}")]
    InvalidPolicy {
        /// Policy name
        name: String,
        /// Why the policy was rejected
        reason: String,
    },
}

impl From<GenerationError> for RotationError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err.to_string())
    }
}

/// Errors returned by backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request is malformed or fails validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No role with this name
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// No instance configuration with this name
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// Identity service call failed
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Value generation failed
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Durable storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Scheduler or rotation failure
    #[error(transparent)]
    Rotation(#[from] RotationError),

    /// Settings could not be loaded
    #[error("invalid settings: {0}")]
    Settings(String),
}

impl BackendError {
    /// Shorthand for [`BackendError::InvalidRequest`]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

impl From<KeyError> for BackendError {
    fn from(err: KeyError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
