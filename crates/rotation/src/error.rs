//! Rotation error types

use std::time::Duration;

use horizon_core::{CredentialKey, StorageError};
use thiserror::Error;

use crate::stage::RotationStage;
use crate::wal::WalId;

/// Structural misuse of the rotation queue
///
/// Distinct from "queue empty", which is reported as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// An item for this key is already queued
    #[error("rotation queue already holds an item for '{0}'")]
    DuplicateKey(CredentialKey),

    /// No item for this key is queued
    #[error("rotation queue holds no item for '{0}'")]
    NotFound(CredentialKey),
}

/// Errors raised while scheduling or performing a rotation
#[derive(Debug, Error)]
pub enum RotationError {
    /// Missing or invalid credential configuration
    #[error("invalid rotation configuration: {0}")]
    Config(String),

    /// The key's lock entry could not be acquired in time
    #[error("timed out after {timeout:?} waiting for the lock of '{key}'")]
    LockTimeout {
        /// Key whose lock was contended
        key: CredentialKey,
        /// How long the caller waited
        timeout: Duration,
    },

    /// The identity service failed or did not answer in time
    #[error("identity service unavailable: {0}")]
    RemoteUnavailable(String),

    /// A WAL entry exists but cannot be decoded
    #[error("write-ahead log entry {id} is corrupt: {reason}")]
    WalCorrupt {
        /// Entry id
        id: WalId,
        /// Decoding failure
        reason: String,
    },

    /// Queue misuse; indicates a bug in the caller
    #[error("rotation queue invariant violated: {0}")]
    QueueInvariant(#[from] QueueError),

    /// The new credential value could not be generated
    #[error("credential generation failed: {0}")]
    Generation(String),

    /// Durable storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Stage machine misuse
    #[error("invalid rotation stage transition from {from} to {to}")]
    InvalidStage {
        /// Current stage
        from: RotationStage,
        /// Requested stage
        to: RotationStage,
    },

    /// Rotation was not started because the scheduler is stopping
    #[error("rotation cancelled")]
    Cancelled,

    /// Internal error (should not normally occur)
    #[error("internal rotation error: {0}")]
    Internal(String),
}

impl RotationError {
    /// Whether the error is expected to clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::RemoteUnavailable(_) | Self::Storage(_)
        )
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;
