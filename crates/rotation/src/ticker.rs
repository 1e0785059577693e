//! Rotation ticker
//!
//! One background task per scheduler. Every tick it drains the items due at
//! that instant and runs them on a bounded set of workers, then waits for
//! the whole drain before the next tick. Rotations already holding a key
//! lock always run to the end; drained items still waiting for a worker when
//! the ticker is cancelled go back to the queue unrun.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::RotationError;
use crate::executor::RotationOutcome;
use crate::scheduler::Shared;

/// Running ticker task
#[derive(Debug)]
pub(crate) struct TickerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Stop ticking and wait for the in-flight drain
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "rotation ticker terminated abnormally");
        }
    }
}

/// Spawn the ticker for `shared`
pub(crate) fn spawn(shared: Arc<Shared>) -> TickerHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(shared, cancel.clone()));
    TickerHandle { cancel, task }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = shared.config.tick_interval;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(?period, "rotation ticker started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let drained = drain(&shared, &cancel).await;
                if drained > 0 {
                    tracing::debug!(drained, remaining = shared.queue.lock().len(), "tick finished");
                }
            }
        }
    }

    tracing::info!("rotation ticker stopped");
}

/// Run every item due now; returns how many were drained
pub(crate) async fn drain(shared: &Arc<Shared>, cancel: &CancellationToken) -> usize {
    let now = Utc::now();
    let due: Vec<_> = {
        let mut queue = shared.queue.lock();
        std::iter::from_fn(|| queue.pop_due(now)).collect()
    };
    if due.is_empty() {
        return 0;
    }
    let count = due.len();
    tracing::debug!(count, "draining due rotations");

    let workers = Arc::new(Semaphore::new(shared.config.workers));
    let mut tasks = JoinSet::new();
    let mut in_flight = HashMap::with_capacity(count);

    for item in due {
        let key = item.key.clone();
        let schedule = item.payload;
        let shared = Arc::clone(shared);
        let workers = Arc::clone(&workers);
        let cancel = cancel.clone();
        let handle = tasks.spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            if cancel.is_cancelled() {
                let outcome = RotationOutcome::Failed(RotationError::Cancelled);
                shared.reschedule(item.key, item.payload, &outcome, Utc::now());
                return;
            }
            shared.run_item(item).await;
        });
        in_flight.insert(handle.id(), (key, schedule));
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, ())) => {
                in_flight.remove(&id);
            }
            Err(e) => {
                // a panicking rotation must not take the others down
                let Some((key, schedule)) = in_flight.remove(&e.id()) else {
                    continue;
                };
                tracing::error!(key = %key, error = %e, "rotation task panicked");
                let outcome = RotationOutcome::Failed(RotationError::Internal(e.to_string()));
                shared.reschedule(key, schedule, &outcome, Utc::now());
            }
        }
    }

    count
}
