//! Change listener
//!
//! Bridges store change notifications into the work queue. The listener
//! never executes anything: it claims pending tasks (pending -> queued,
//! exactly-once thanks to the conditional update) and enqueues the winners.

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::domain::TaskStatus;
use crate::queue::WorkQueue;
use crate::store::{TaskEvent, TaskStore};

pub struct ChangeListener {
    store: TaskStore,
    queue: WorkQueue,
}

impl ChangeListener {
    pub fn new(store: TaskStore, queue: WorkQueue) -> Self {
        Self { store, queue }
    }

    /// Subscribe and pump notifications until the store goes away
    ///
    /// Subscribes before the backlog sweep so tasks created during the
    /// sweep are not missed; the conditional claim makes seeing a task
    /// twice harmless.
    pub async fn run(self) {
        let mut events = self.store.subscribe();

        self.sweep_backlog().await;

        info!("change listener started");
        loop {
            match events.recv().await {
                Ok(TaskEvent::Created { task }) => {
                    if task.status == TaskStatus::Pending {
                        self.claim_and_enqueue(&task.id).await;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Dropped notifications are only a latency problem: the
                    // affected tasks stay pending and a later sweep or
                    // restart picks them up
                    warn!(missed, "change listener lagged behind the store");
                }
                Err(RecvError::Closed) => {
                    info!("store closed, change listener exiting");
                    break;
                }
            }
        }
    }

    /// Claim pending tasks that predate our subscription
    async fn sweep_backlog(&self) {
        let pending = match self.store.list(Some(TaskStatus::Pending)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "backlog sweep failed");
                return;
            }
        };

        if !pending.is_empty() {
            info!(count = pending.len(), "claiming pending backlog");
        }
        for task in pending {
            self.claim_and_enqueue(&task.id).await;
        }
    }

    async fn claim_and_enqueue(&self, task_id: &str) {
        match self.store.claim_pending(task_id).await {
            Ok(true) => {
                // Re-fetch so the queued copy carries the claimed status
                match self.store.get(task_id).await {
                    Ok(Some(task)) => {
                        debug!(%task_id, "task claimed and queued");
                        self.queue.push(task).await;
                    }
                    Ok(None) => warn!(%task_id, "claimed task vanished from the store"),
                    Err(e) => error!(%task_id, error = %e, "failed to fetch claimed task"),
                }
            }
            Ok(false) => debug!(%task_id, "task already claimed"),
            Err(e) => error!(%task_id, error = %e, "claim failed"),
        }
    }
}
