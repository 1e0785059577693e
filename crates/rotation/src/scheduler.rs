//! Rotation scheduler
//!
//! Owns the queue, the key lock table, the WAL handle and the executor, and
//! exposes them to the host: lifecycle control (`start_queue` /
//! `stop_queue`), inspection, and the foreground operations that must hold
//! a key's lock while touching its queue item and WAL intents.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use horizon_core::CredentialKey;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RotationConfig;
use crate::error::{RotationError, RotationResult};
use crate::executor::{RotationExecutor, RotationOutcome};
use crate::initializer::{self, InitReport};
use crate::lock::{KeyLockGuard, KeyLockTable};
use crate::quarantine::{PausedKeys, QuarantinedIntent};
use crate::queue::{QueueItem, RotationQueue};
use crate::rotator::{CredentialRotator, RotationRecord};
use crate::ticker::{self, TickerHandle};
use crate::wal::{self, STATIC_ROTATION_KIND, WalEntry, WalId, WalStore};

/// Role of this process in a replicated deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentRole {
    /// Primary cluster node
    #[default]
    Primary,
    /// Mount local to this cluster
    Local,
    /// Performance replication secondary
    PerformanceSecondary,
    /// Performance standby node
    PerformanceStandby,
}

impl DeploymentRole {
    /// Whether this role runs the ticker
    pub fn is_rotation_owner(self) -> bool {
        matches!(self, Self::Primary | Self::Local)
    }
}

impl std::fmt::Display for DeploymentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Local => "local",
            Self::PerformanceSecondary => "performance_secondary",
            Self::PerformanceStandby => "performance_standby",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DeploymentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "local" => Ok(Self::Local),
            "performance_secondary" => Ok(Self::PerformanceSecondary),
            "performance_standby" => Ok(Self::PerformanceStandby),
            other => Err(format!("unknown deployment role '{other}'")),
        }
    }
}

/// Payload of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSchedule {
    /// Rotation period, `None` for manually rotated credentials
    pub interval: Option<Duration>,
    /// Consecutive failed attempts
    pub failures: u32,
}

impl RotationSchedule {
    /// Schedule with no failures yet
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            failures: 0,
        }
    }
}

/// State shared by the scheduler handle, the ticker and the initializer
pub(crate) struct Shared {
    pub(crate) config: RotationConfig,
    pub(crate) locks: Arc<KeyLockTable>,
    pub(crate) queue: Mutex<RotationQueue<RotationSchedule>>,
    pub(crate) wal: Arc<dyn WalStore>,
    pub(crate) rotator: Arc<dyn CredentialRotator>,
    pub(crate) paused: Arc<PausedKeys>,
    pub(crate) executor: RotationExecutor,
    pub(crate) role: RwLock<Option<DeploymentRole>>,
}

impl Shared {
    /// Lock, rotate and reschedule one drained item
    pub(crate) async fn run_item(&self, item: QueueItem<RotationSchedule>) {
        let QueueItem {
            key,
            payload: schedule,
            ..
        } = item;

        match self.locks.acquire(&key, self.config.lock_timeout).await {
            Ok(guard) => {
                let outcome = self.executor.rotate_locked(&guard, &key).await;
                self.reschedule(key, schedule, &outcome, Utc::now());
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping contended rotation");
                self.reschedule(key, schedule, &RotationOutcome::Failed(e), Utc::now());
            }
        }
    }

    /// Put a processed key back in the queue according to its outcome
    ///
    /// Success moves the due time one interval past the commit, failure
    /// retries after a bounded backoff. A key that was re-queued meanwhile
    /// keeps its newer item.
    pub(crate) fn reschedule(
        &self,
        key: CredentialKey,
        schedule: RotationSchedule,
        outcome: &RotationOutcome,
        now: DateTime<Utc>,
    ) {
        let next = match outcome {
            RotationOutcome::Rotated { at } => schedule.interval.and_then(|interval| {
                let interval = chrono::Duration::from_std(interval).ok()?;
                Some((*at + interval, RotationSchedule::new(schedule.interval)))
            }),
            // not attempted, so no failure is counted
            RotationOutcome::Failed(RotationError::Cancelled) => Some((now, schedule)),
            RotationOutcome::Failed(_) => {
                let failures = schedule.failures.saturating_add(1);
                let delay = self.config.retry_delay(failures, schedule.interval);
                chrono::Duration::from_std(delay).ok().map(|delay| {
                    (
                        now + delay,
                        RotationSchedule {
                            interval: schedule.interval,
                            failures,
                        },
                    )
                })
            }
            RotationOutcome::Dropped => {
                tracing::info!(key = %key, "credential removed, dropping from queue");
                None
            }
            RotationOutcome::Paused => None,
        };

        let Some((due, schedule)) = next else {
            return;
        };
        let mut queue = self.queue.lock();
        if queue.contains(&key) {
            return;
        }
        tracing::debug!(key = %key, %due, failures = schedule.failures, "rotation rescheduled");
        if let Err(e) = queue.insert(QueueItem::new(key, due, schedule)) {
            tracing::error!(error = %e, "failed to reschedule rotation");
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    ticker: Option<TickerHandle>,
}

/// Handle to the rotation subsystem
///
/// Cheap to clone; all clones drive the same queue and ticker.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use horizon_rotation::{DeploymentRole, RotationConfig, RotationScheduler, StorageWal};
///
/// let wal = Arc::new(StorageWal::new(storage));
/// let scheduler = RotationScheduler::new(RotationConfig::default(), wal, rotator)?;
///
/// let report = scheduler.start_queue(DeploymentRole::Primary).await?;
/// println!("{} rotations queued, {} replayed", report.queued, report.replayed);
///
/// // foreground writers take the key's lock before touching the queue
/// let key = CredentialKey::new("prod")?;
/// let guard = scheduler.lock(&key).await?;
/// let outcome = scheduler.rotate_now(&guard, &key).await;
/// drop(guard);
///
/// scheduler.stop_queue().await;
/// ```
#[derive(Clone)]
pub struct RotationScheduler {
    shared: Arc<Shared>,
    lifecycle: Arc<tokio::sync::Mutex<Lifecycle>>,
}

impl RotationScheduler {
    /// Build a scheduler; nothing runs until [`start_queue`](Self::start_queue)
    ///
    /// # Arguments
    ///
    /// * `config` - Tick, retry, worker and timeout settings; validated here
    /// * `wal` - Store for rotation intents and quarantined entries
    /// * `rotator` - Source of records and the identity service seam
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Config`] if `config` is invalid.
    pub fn new(
        config: RotationConfig,
        wal: Arc<dyn WalStore>,
        rotator: Arc<dyn CredentialRotator>,
    ) -> RotationResult<Self> {
        config.validate()?;

        let locks = Arc::new(KeyLockTable::new(config.lock_table_size));
        let paused = Arc::new(PausedKeys::new());
        let executor = RotationExecutor::new(
            Arc::clone(&rotator),
            Arc::clone(&wal),
            Arc::clone(&locks),
            Arc::clone(&paused),
            config.clone(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                locks,
                queue: Mutex::new(RotationQueue::new()),
                wal,
                rotator,
                paused,
                executor,
                role: RwLock::new(None),
            }),
            lifecycle: Arc::new(tokio::sync::Mutex::new(Lifecycle::default())),
        })
    }

    /// Scheduler configuration
    pub fn config(&self) -> &RotationConfig {
        &self.shared.config
    }

    /// Build the queue and, for rotation owners, replay the WAL and start
    /// the ticker
    ///
    /// Calling it again while the ticker runs is a no-op.
    pub async fn start_queue(&self, role: DeploymentRole) -> RotationResult<InitReport> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.ticker.is_some() {
            tracing::debug!(%role, "rotation queue already running");
            return Ok(InitReport {
                queued: self.queue_len(),
                ..InitReport::default()
            });
        }

        *self.shared.role.write() = Some(role);
        let owner = role.is_rotation_owner();
        let report = initializer::initialize(&self.shared, owner).await?;

        if owner {
            lifecycle.ticker = Some(ticker::spawn(Arc::clone(&self.shared)));
        }
        tracing::info!(
            %role,
            owner,
            queued = report.queued,
            replayed = report.replayed,
            quarantined = report.quarantined,
            "rotation queue started"
        );
        Ok(report)
    }

    /// Stop the ticker and wait for in-flight rotations to finish
    ///
    /// Drained items that have not started yet are put back unrun.
    pub async fn stop_queue(&self) {
        let ticker = self.lifecycle.lock().await.ticker.take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
            tracing::info!("rotation queue stopped");
        }
    }

    /// Whether the ticker is running
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.ticker.is_some()
    }

    /// Whether this process owns rotation duty
    pub fn is_rotation_owner(&self) -> bool {
        self.shared
            .role
            .read()
            .is_some_and(DeploymentRole::is_rotation_owner)
    }

    /// Role passed to the last `start_queue`
    pub fn role(&self) -> Option<DeploymentRole> {
        *self.shared.role.read()
    }

    /// Number of queued rotations
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Earliest queued rotation
    pub fn next_due(&self) -> Option<(CredentialKey, DateTime<Utc>)> {
        self.shared
            .queue
            .lock()
            .peek()
            .map(|item| (item.key.clone(), item.priority))
    }

    /// Due time of `key`, if queued
    pub fn due_time(&self, key: &CredentialKey) -> Option<DateTime<Utc>> {
        self.shared.queue.lock().get(key).map(|item| item.priority)
    }

    /// Queued rotations ordered by due time
    pub fn planned(&self) -> Vec<(CredentialKey, DateTime<Utc>)> {
        let mut planned: Vec<_> = self
            .shared
            .queue
            .lock()
            .iter()
            .map(|item| (item.key.clone(), item.priority))
            .collect();
        planned.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        planned
    }

    /// Paused keys and the quarantined intents holding them
    pub fn paused_keys(&self) -> Vec<(CredentialKey, Vec<WalId>)> {
        self.shared.paused.snapshot()
    }

    /// Live rotation intents
    pub async fn pending_intents(&self) -> RotationResult<Vec<WalEntry>> {
        self.shared.wal.list_by_kind(STATIC_ROTATION_KIND).await
    }

    /// Quarantined intents
    pub async fn quarantined(&self) -> RotationResult<Vec<QuarantinedIntent>> {
        self.shared.wal.list_quarantined().await
    }

    /// Drop a quarantined intent and resume its key once nothing else holds it
    ///
    /// Returns `false` if no such intent was quarantined.
    pub async fn release_quarantine(&self, id: WalId) -> RotationResult<bool> {
        let Some(record) = self.shared.wal.release(id).await? else {
            return Ok(false);
        };
        tracing::info!(wal_id = %id, key = ?record.key, "quarantined intent released");

        if let Some(key) = self.shared.paused.release(id) {
            let guard = self.lock(&key).await?;
            if let Some(record) = self.shared.rotator.load(&key).await? {
                self.schedule(&guard, &key, &record)?;
            }
        }
        Ok(true)
    }

    /// Acquire the lock entry of `key` for a foreground operation
    pub async fn lock(&self, key: &CredentialKey) -> RotationResult<KeyLockGuard> {
        self.shared
            .locks
            .acquire(key, self.shared.config.lock_timeout)
            .await
    }

    /// Queue, requeue or unqueue `key` to match its durable record
    ///
    /// Returns the due time if the key is now queued. A key waiting out a
    /// retry backoff keeps its failure count and is never pushed past the
    /// retry time.
    pub fn schedule(
        &self,
        guard: &KeyLockGuard,
        key: &CredentialKey,
        record: &RotationRecord,
    ) -> RotationResult<Option<DateTime<Utc>>> {
        self.check_guard(guard, key)?;

        let mut queue = self.shared.queue.lock();
        let mut due = match record.next_due(Utc::now()) {
            Some(due) if !self.shared.paused.contains(key) => due,
            _ => {
                queue.pop_by_key(key);
                return Ok(None);
            }
        };
        let mut schedule = RotationSchedule::new(record.interval);
        if let Some(retry) = queue.get(key).filter(|item| item.payload.failures > 0) {
            due = due.min(retry.priority);
            schedule.failures = retry.payload.failures;
        }
        queue.upsert(QueueItem::new(key.clone(), due, schedule));
        Ok(Some(due))
    }

    /// Remove `key` from the queue
    pub fn unschedule(&self, guard: &KeyLockGuard, key: &CredentialKey) -> RotationResult<bool> {
        self.check_guard(guard, key)?;
        Ok(self.shared.queue.lock().pop_by_key(key).is_some())
    }

    /// Delete every pending intent of `key`
    pub async fn discard_intents(
        &self,
        guard: &KeyLockGuard,
        key: &CredentialKey,
    ) -> RotationResult<usize> {
        self.check_guard(guard, key)?;
        let discarded = wal::discard_intents(self.shared.wal.as_ref(), key).await?;
        if discarded > 0 {
            tracing::info!(key = %key, discarded, "pending intents discarded");
        }
        Ok(discarded)
    }

    /// Rotate `key` now, outside the ticker
    ///
    /// A queued item for the key is taken out for the duration and put back
    /// according to the outcome.
    pub async fn rotate_now(&self, guard: &KeyLockGuard, key: &CredentialKey) -> RotationOutcome {
        if let Err(e) = self.check_guard(guard, key) {
            return RotationOutcome::Failed(e);
        }
        let queued = self.shared.queue.lock().pop_by_key(key);
        let outcome = self.shared.executor.rotate_locked(guard, key).await;
        if let Some(item) = queued {
            self.shared
                .reschedule(key.clone(), item.payload, &outcome, Utc::now());
        }
        outcome
    }

    /// Run one drain immediately, regardless of the ticker
    pub async fn drain_now(&self) -> usize {
        ticker::drain(&self.shared, &CancellationToken::new()).await
    }

    fn check_guard(&self, guard: &KeyLockGuard, key: &CredentialKey) -> RotationResult<()> {
        if self.shared.locks.guards(guard, key) {
            Ok(())
        } else {
            Err(RotationError::Config(format!(
                "lock entry {} does not cover '{key}'",
                guard.index()
            )))
        }
    }
}

impl std::fmt::Debug for RotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationScheduler")
            .field("role", &self.role())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DeploymentRole::Primary, true)]
    #[case(DeploymentRole::Local, true)]
    #[case(DeploymentRole::PerformanceSecondary, false)]
    #[case(DeploymentRole::PerformanceStandby, false)]
    fn rotation_ownership(#[case] role: DeploymentRole, #[case] owner: bool) {
        assert_eq!(role.is_rotation_owner(), owner);
        assert_eq!(role.to_string().parse::<DeploymentRole>().unwrap(), role);
    }
}
