//! Queue initializer
//!
//! Rebuilds the rotation queue from the durable records and, on rotation
//! owners, finishes every rotation the WAL says was interrupted before the
//! ticker starts.

use chrono::Utc;
use horizon_core::CredentialKey;

use crate::error::{RotationError, RotationResult};
use crate::queue::{QueueItem, RotationQueue};
use crate::executor::RotationOutcome;
use crate::scheduler::{RotationSchedule, Shared};
use crate::wal::{RotationIntent, STATIC_ROTATION_KIND, WalEntry, WalId};

/// What a startup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Items in the rebuilt queue
    pub queued: usize,
    /// Interrupted rotations finished
    pub replayed: usize,
    /// Interrupted rotations that failed again and were re-enqueued
    pub failed: usize,
    /// Stale or orphaned intents deleted
    pub discarded: usize,
    /// Undecodable intents moved to quarantine
    pub quarantined: usize,
}

/// Reload paused keys, rebuild the queue, and replay the WAL if `replay`
pub(crate) async fn initialize(shared: &Shared, replay: bool) -> RotationResult<InitReport> {
    let mut report = InitReport::default();

    shared.paused.reload(&shared.wal.list_quarantined().await?);
    populate(shared).await?;
    if replay {
        replay_wal(shared, &mut report).await?;
    }

    report.queued = shared.queue.lock().len();
    Ok(report)
}

/// Replace the queue with one item per periodically rotated record
pub(crate) async fn populate(shared: &Shared) -> RotationResult<usize> {
    let records = shared.rotator.list_records().await?;
    let now = Utc::now();
    let mut queue = RotationQueue::new();

    for (key, record) in records {
        let Some(due) = record.next_due(now) else {
            continue;
        };
        if shared.paused.contains(&key) {
            tracing::warn!(key = %key, "not scheduling paused credential");
            continue;
        }
        let item = QueueItem::new(key, due, RotationSchedule::new(record.interval));
        if let Err(e) = queue.insert(item) {
            tracing::error!(error = %e, "duplicate credential record while building queue");
        }
    }

    let len = queue.len();
    *shared.queue.lock() = queue;
    tracing::debug!(queued = len, "rotation queue rebuilt");
    Ok(len)
}

async fn replay_wal(shared: &Shared, report: &mut InitReport) -> RotationResult<()> {
    let mut intents = Vec::new();
    for id in shared.wal.list_ids().await? {
        let entry: WalEntry = match shared.wal.read(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(RotationError::WalCorrupt { reason, .. }) => {
                quarantine(shared, id, &reason, report).await;
                continue;
            }
            Err(e) => {
                tracing::error!(wal_id = %id, error = %e, "unreadable WAL entry left in place");
                continue;
            }
        };
        if entry.kind != STATIC_ROTATION_KIND {
            tracing::debug!(wal_id = %id, kind = %entry.kind, "ignoring foreign WAL entry");
            continue;
        }
        match RotationIntent::from_entry(entry) {
            Ok(intent) => intents.push(intent),
            Err(e) => quarantine(shared, id, &e.to_string(), report).await,
        }
    }

    // newest first, so older intents of the same key end up superseded
    intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if !intents.is_empty() {
        tracing::info!(count = intents.len(), "replaying interrupted rotations");
    }
    for intent in intents {
        replay_intent(shared, intent, report).await;
    }
    Ok(())
}

/// Finish one intent; failures stay with this key and leave the intent in place
async fn replay_intent(shared: &Shared, intent: RotationIntent, report: &mut InitReport) {
    let key = intent.key.clone();
    let guard = match shared.locks.acquire(&key, shared.config.lock_timeout).await {
        Ok(guard) => guard,
        Err(e) => {
            // the intent stays; the next attempt on this key picks it up
            tracing::warn!(key = %key, error = %e, "deferring replay");
            return;
        }
    };
    if shared.paused.contains(&key) {
        tracing::warn!(key = %key, wal_id = %intent.id, "key paused, leaving intent in place");
        return;
    }

    let record = match shared.rotator.load(&key).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::info!(key = %key, wal_id = %intent.id, "discarding intent of deleted credential");
            discard(shared, &intent, report).await;
            shared.queue.lock().pop_by_key(&key);
            return;
        }
        Err(e) => {
            tracing::error!(key = %key, wal_id = %intent.id, error = %e, "cannot load credential, leaving intent in place");
            report.failed += 1;
            return;
        }
    };

    if intent.is_superseded_by(record.last_rotation) {
        tracing::warn!(key = %key, wal_id = %intent.id, "discarding stale intent");
        discard(shared, &intent, report).await;
        return;
    }

    let outcome = shared.executor.resume_locked(&guard, &intent).await;
    match &outcome {
        RotationOutcome::Rotated { .. } => report.replayed += 1,
        RotationOutcome::Failed(_) => report.failed += 1,
        RotationOutcome::Dropped | RotationOutcome::Paused => {}
    }

    let previous = shared.queue.lock().pop_by_key(&key);
    let schedule = previous.map_or_else(
        || RotationSchedule::new(record.interval),
        |item| item.payload,
    );
    shared.reschedule(key, schedule, &outcome, Utc::now());
}

async fn discard(shared: &Shared, intent: &RotationIntent, report: &mut InitReport) {
    match shared.wal.delete(intent.id).await {
        Ok(()) => report.discarded += 1,
        // a stale intent is discarded again by the next attempt on its key
        Err(e) => tracing::warn!(wal_id = %intent.id, error = %e, "failed to delete intent"),
    }
}

async fn quarantine(shared: &Shared, id: WalId, reason: &str, report: &mut InitReport) {
    let record = match shared.wal.quarantine(id, reason).await {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(wal_id = %id, %reason, error = %e, "failed to quarantine corrupt intent");
            return;
        }
    };
    report.quarantined += 1;

    match record.key {
        Some(key) => {
            tracing::error!(wal_id = %id, key = %key, %reason, "corrupt intent quarantined, rotation paused");
            pause(shared, key, id);
        }
        None => {
            tracing::error!(wal_id = %id, %reason, "corrupt intent quarantined, key unknown");
        }
    }
}

fn pause(shared: &Shared, key: CredentialKey, id: WalId) {
    shared.queue.lock().pop_by_key(&key);
    shared.paused.pause(key, id);
}
