//! Rotation stage machine
//!
//! Tracks how far one rotation attempt got.

use serde::{Deserialize, Serialize};

use crate::error::{RotationError, RotationResult};

/// Stage of a rotation attempt
///
/// # Stage Transitions
///
/// ```text
/// Idle → LockAcquired → ValueGenerated → IntentWritten → RemoteApplied → Committed → Idle
///             │   └──────(pending intent)───────↗               │
///             └──────────┴──────────────┴───────────────┴──→ Failed → Idle
/// ```
///
/// Recovery enters directly at `IntentWritten`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStage {
    /// No attempt running
    Idle,
    /// Key lock held
    LockAcquired,
    /// New value produced by the generator
    ValueGenerated,
    /// Intent durably recorded in the WAL
    IntentWritten,
    /// Identity service accepted the new value
    RemoteApplied,
    /// Durable record updated
    Committed,
    /// Attempt aborted
    Failed,
}

impl RotationStage {
    /// Check if transition to the target stage is valid
    #[must_use]
    pub fn can_transition_to(&self, target: RotationStage) -> bool {
        use RotationStage::*;

        match (self, target) {
            (Idle, LockAcquired) => true,
            (LockAcquired, ValueGenerated) => true,
            // a pending intent is reused instead of generating
            (LockAcquired, IntentWritten) => true,
            (ValueGenerated, IntentWritten) => true,
            (IntentWritten, RemoteApplied) => true,
            (RemoteApplied, Committed) => true,

            (LockAcquired | ValueGenerated | IntentWritten | RemoteApplied, Failed) => true,

            (Committed | Failed, Idle) => true,

            _ => false,
        }
    }

    /// Validate and perform stage transition
    pub fn transition_to(&self, target: RotationStage) -> RotationResult<RotationStage> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(RotationError::InvalidStage {
                from: *self,
                to: target,
            })
        }
    }

    /// Whether the attempt has finished, successfully or not
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RotationStage::Committed | RotationStage::Failed)
    }
}

impl std::fmt::Display for RotationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationStage::Idle => "idle",
            RotationStage::LockAcquired => "lock_acquired",
            RotationStage::ValueGenerated => "value_generated",
            RotationStage::IntentWritten => "intent_written",
            RotationStage::RemoteApplied => "remote_applied",
            RotationStage::Committed => "committed",
            RotationStage::Failed => "failed",
        };
        f.write_str(name)
    }
}
