//! Rotation executor
//!
//! Performs one rotation attempt for a key whose lock entry is held:
//! generate a value (or reuse a pending intent), record the intent in the
//! WAL, apply it remotely, commit it durably, then drop the intent. A
//! failure after the intent is written leaves the intent in place so the
//! next attempt resends the same value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use horizon_core::CredentialKey;
use tracing::Instrument;

use crate::config::RotationConfig;
use crate::error::{RotationError, RotationResult};
use crate::lock::{KeyLockGuard, KeyLockTable};
use crate::quarantine::PausedKeys;
use crate::rotator::{CredentialRotator, RotationRecord};
use crate::stage::RotationStage;
use crate::wal::{RotationIntent, WalId, WalStore, scan_intents};

/// Result of one rotation attempt
#[derive(Debug)]
pub enum RotationOutcome {
    /// New value applied and committed
    Rotated {
        /// Commit time, the new `last_rotation`
        at: DateTime<Utc>,
    },
    /// Attempt aborted; any written intent is kept
    Failed(RotationError),
    /// The credential no longer exists
    Dropped,
    /// The key is paused by a quarantined intent
    Paused,
}

impl RotationOutcome {
    /// Whether the credential was rotated
    pub fn is_rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }
}

struct Attempt<'a> {
    key: &'a CredentialKey,
    stage: RotationStage,
}

impl<'a> Attempt<'a> {
    fn locked(key: &'a CredentialKey) -> Self {
        Self {
            key,
            stage: RotationStage::LockAcquired,
        }
    }

    fn resumed(key: &'a CredentialKey) -> Self {
        Self {
            key,
            stage: RotationStage::IntentWritten,
        }
    }

    fn advance(&mut self, to: RotationStage) -> RotationResult<()> {
        self.stage = self.stage.transition_to(to)?;
        tracing::debug!(stage = %self.stage, "rotation stage reached");
        Ok(())
    }

    fn fail(&mut self, error: RotationError) -> RotationOutcome {
        let from = self.stage;
        if from.can_transition_to(RotationStage::Failed) {
            self.stage = RotationStage::Failed;
        }
        if error.is_transient() {
            tracing::warn!(key = %self.key, stage = %from, error = %error, "rotation attempt failed");
        } else {
            tracing::error!(key = %self.key, stage = %from, error = %error, "rotation attempt failed");
        }
        RotationOutcome::Failed(error)
    }
}

/// Runs rotation attempts against a [`CredentialRotator`]
///
/// Every attempt holds the key's lock entry, writes its intent to the WAL
/// before the identity service sees the new value, and deletes the intent
/// only after the commit.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use horizon_rotation::{
///     KeyLockTable, PausedKeys, RotationConfig, RotationExecutor, StorageWal,
/// };
///
/// let config = RotationConfig::default();
/// let executor = RotationExecutor::new(
///     rotator,
///     Arc::new(StorageWal::new(storage)),
///     Arc::new(KeyLockTable::new(config.lock_table_size)),
///     Arc::new(PausedKeys::new()),
///     config,
/// );
///
/// let outcome = executor.rotate(&CredentialKey::new("prod")?).await;
/// assert!(outcome.is_rotated());
/// ```
pub struct RotationExecutor {
    rotator: Arc<dyn CredentialRotator>,
    wal: Arc<dyn WalStore>,
    locks: Arc<KeyLockTable>,
    paused: Arc<PausedKeys>,
    config: RotationConfig,
}

impl RotationExecutor {
    /// Create an executor
    ///
    /// # Arguments
    ///
    /// * `rotator` - Source of records and new values, and the identity service seam
    /// * `wal` - Store for rotation intents
    /// * `locks` - Lock table shared with every other writer of the same keys
    /// * `paused` - Keys held back by quarantined intents
    /// * `config` - Lock and remote call timeouts
    pub fn new(
        rotator: Arc<dyn CredentialRotator>,
        wal: Arc<dyn WalStore>,
        locks: Arc<KeyLockTable>,
        paused: Arc<PausedKeys>,
        config: RotationConfig,
    ) -> Self {
        Self {
            rotator,
            wal,
            locks,
            paused,
            config,
        }
    }

    /// Lock table the executor expects guards from
    pub fn locks(&self) -> &Arc<KeyLockTable> {
        &self.locks
    }

    /// Acquire the key's lock, then rotate
    pub async fn rotate(&self, key: &CredentialKey) -> RotationOutcome {
        match self.locks.acquire(key, self.config.lock_timeout).await {
            Ok(guard) => self.rotate_locked(&guard, key).await,
            Err(e) => RotationOutcome::Failed(e),
        }
    }

    /// Rotate `key` while its lock entry is held by the caller
    pub async fn rotate_locked(&self, guard: &KeyLockGuard, key: &CredentialKey) -> RotationOutcome {
        if let Err(e) = self.check_guard(guard, key) {
            return RotationOutcome::Failed(e);
        }
        if self.paused.contains(key) {
            tracing::debug!(key = %key, "rotation paused by quarantined intent");
            return RotationOutcome::Paused;
        }

        let span = tracing::info_span!("rotation", key = %key);
        async {
            let mut attempt = Attempt::locked(key);
            let record = match self.rotator.load(key).await {
                Ok(Some(record)) => record,
                Ok(None) => return RotationOutcome::Dropped,
                Err(e) => return attempt.fail(e),
            };

            let result = async {
                let found = scan_intents(self.wal.as_ref(), key).await?;
                if self.quarantine_corrupt(key, &found.corrupt).await? {
                    return Ok(None);
                }
                let intent = self
                    .prepare_intent(&mut attempt, &record, found.intents)
                    .await?;
                self.complete(&mut attempt, &record, &intent).await.map(Some)
            }
            .await;

            match result {
                Ok(Some(at)) => RotationOutcome::Rotated { at },
                Ok(None) => RotationOutcome::Paused,
                Err(e) => attempt.fail(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Finish an interrupted rotation from its WAL intent
    ///
    /// Skips generation and resends the intent's value.
    pub async fn resume_locked(
        &self,
        guard: &KeyLockGuard,
        intent: &RotationIntent,
    ) -> RotationOutcome {
        let key = &intent.key;
        if let Err(e) = self.check_guard(guard, key) {
            return RotationOutcome::Failed(e);
        }
        if self.paused.contains(key) {
            return RotationOutcome::Paused;
        }

        let span = tracing::info_span!("rotation", key = %key, wal_id = %intent.id);
        async {
            let mut attempt = Attempt::resumed(key);
            let record = match self.rotator.load(key).await {
                Ok(Some(record)) => record,
                Ok(None) => return RotationOutcome::Dropped,
                Err(e) => return attempt.fail(e),
            };

            tracing::info!(created_at = %intent.created_at, "resuming interrupted rotation");
            match self.complete(&mut attempt, &record, intent).await {
                Ok(at) => RotationOutcome::Rotated { at },
                Err(e) => attempt.fail(e),
            }
        }
        .instrument(span)
        .await
    }

    fn check_guard(&self, guard: &KeyLockGuard, key: &CredentialKey) -> RotationResult<()> {
        if self.locks.guards(guard, key) {
            Ok(())
        } else {
            Err(RotationError::Config(format!(
                "lock entry {} does not cover '{key}'",
                guard.index()
            )))
        }
    }

    /// Move undecodable entries of `key` to quarantine and pause the key
    ///
    /// Returns whether anything was quarantined.
    async fn quarantine_corrupt(
        &self,
        key: &CredentialKey,
        corrupt: &[(WalId, String)],
    ) -> RotationResult<bool> {
        for (id, reason) in corrupt {
            self.wal.quarantine(*id, reason).await?;
            self.paused.pause(key.clone(), *id);
            tracing::error!(wal_id = %id, %reason, "corrupt intent quarantined, rotation paused");
        }
        Ok(!corrupt.is_empty())
    }

    /// Reuse the newest live intent, or generate and record one
    async fn prepare_intent(
        &self,
        attempt: &mut Attempt<'_>,
        record: &RotationRecord,
        pending: Vec<RotationIntent>,
    ) -> RotationResult<RotationIntent> {
        let key = attempt.key;
        let mut reusable = None;
        for intent in pending.into_iter().rev() {
            if reusable.is_none() && !intent.is_superseded_by(record.last_rotation) {
                reusable = Some(intent);
                continue;
            }
            tracing::warn!(wal_id = %intent.id, "discarding stale rotation intent");
            self.wal.delete(intent.id).await?;
        }

        if let Some(intent) = reusable {
            attempt.advance(RotationStage::IntentWritten)?;
            tracing::info!(wal_id = %intent.id, "retrying with pending intent");
            return Ok(intent);
        }

        let secret = self.rotator.generate(key, record).await?;
        attempt.advance(RotationStage::ValueGenerated)?;

        let intent = RotationIntent::new(
            key.clone(),
            record.principal.clone(),
            secret,
            record.last_rotation,
        );
        self.wal.write(&intent.to_entry()?).await?;
        attempt.advance(RotationStage::IntentWritten)?;
        Ok(intent)
    }

    /// `IntentWritten` → `RemoteApplied` → `Committed`
    async fn complete(
        &self,
        attempt: &mut Attempt<'_>,
        record: &RotationRecord,
        intent: &RotationIntent,
    ) -> RotationResult<DateTime<Utc>> {
        let timeout = self.config.remote_timeout;
        tokio::time::timeout(timeout, self.rotator.apply(record, intent))
            .await
            .map_err(|_| {
                RotationError::RemoteUnavailable(format!("no answer within {timeout:?}"))
            })??;
        attempt.advance(RotationStage::RemoteApplied)?;

        let rotated_at = Utc::now();
        self.rotator.commit(record, intent, rotated_at).await?;
        attempt.advance(RotationStage::Committed)?;

        // the committed record supersedes the intent, so a failed delete is
        // cleaned up as stale later
        if let Err(e) = self.wal.delete(intent.id).await {
            tracing::warn!(wal_id = %intent.id, error = %e, "failed to delete committed intent");
        }

        tracing::info!(principal = %record.principal, "credential rotated");
        Ok(rotated_at)
    }
}

impl std::fmt::Debug for RotationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
