//! Horizon Rotation
//!
//! Background rotation of root credentials that survives crashes.
//!
//! - [`KeyLockTable`]: fixed pool of per-key async locks shared by the
//!   ticker and foreground requests
//! - [`RotationQueue`]: min-heap of due times, one item per key
//! - [`WalStore`] / [`StorageWal`]: durable rotation intents
//! - [`RotationExecutor`]: one lock → generate → WAL → apply → commit pass
//! - [`RotationScheduler`]: owns everything above, runs the ticker, and
//!   rebuilds the queue and replays the WAL on start
//!
//! The credential owner plugs in through [`CredentialRotator`].
#![forbid(unsafe_code)]

mod config;
mod error;
mod executor;
mod initializer;
mod lock;
mod quarantine;
mod queue;
mod rotator;
mod scheduler;
mod stage;
mod ticker;
pub mod wal;

pub use config::{DEFAULT_TICK_INTERVAL, RotationConfig};
pub use error::{QueueError, RotationError, RotationResult};
pub use executor::{RotationExecutor, RotationOutcome};
pub use initializer::InitReport;
pub use lock::{KeyLock, KeyLockGuard, KeyLockTable};
pub use quarantine::{PausedKeys, QuarantinedIntent};
pub use queue::{QueueItem, RotationQueue};
pub use rotator::{CredentialRotator, RotationRecord};
pub use scheduler::{DeploymentRole, RotationSchedule, RotationScheduler};
pub use stage::RotationStage;
pub use wal::{RotationIntent, STATIC_ROTATION_KIND, StorageWal, WalEntry, WalId, WalStore};
