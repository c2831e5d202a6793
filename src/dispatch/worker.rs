//! Per-endpoint dispatch worker
//!
//! Each worker drains the shared queue: acquire resources, run the task,
//! write the outcome back, release. A task failure never kills the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::allocator::{Allocation, Allocator};
use crate::automation::Automation;
use crate::config::DispatchConfig;
use crate::domain::{Task, TaskAction, TaskPatch, TaskStatus};
use crate::queue::WorkQueue;
use crate::store::TaskStore;
use crate::tracker::{HealthTracker, RetryTracker};

/// Granularity at which long sleeps re-check the stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

pub(super) struct Worker {
    pub(super) name: String,
    pub(super) config: DispatchConfig,
    pub(super) queue: WorkQueue,
    pub(super) allocator: Arc<Allocator>,
    pub(super) store: TaskStore,
    pub(super) retries: RetryTracker,
    pub(super) health: HealthTracker,
    pub(super) automation: Arc<dyn Automation>,
    pub(super) stop: Arc<AtomicBool>,
}

impl Worker {
    pub(super) async fn run(self) {
        info!(worker = %self.name, "worker started");

        while !self.stopping() {
            let Some(task) = self.queue.pop_timeout(self.config.queue_poll()).await else {
                continue;
            };

            self.handle_task(task).await;
        }

        info!(worker = %self.name, "worker stopped");
    }

    async fn handle_task(&self, task: Task) {
        let task_id = task.id.clone();
        debug!(worker = %self.name, %task_id, "Worker::handle_task: called");

        let attempts = self.retries.attempts(&task_id).await;
        if attempts >= self.config.max_attempts {
            self.abandon(&task_id).await;
            return;
        }

        let Some(allocation) = self.allocate_with_retry().await else {
            // Allocation exhaustion is not the task's fault; put it back
            // untouched and let the pool breathe
            debug!(worker = %self.name, %task_id, "no resources, requeueing");
            self.queue.push(task).await;
            if !self.stopping() {
                self.sleep_unless_stopped(self.config.requeue_delay()).await;
            }
            return;
        };

        self.execute(task, &allocation).await;

        self.allocator.release(&allocation).await;
    }

    /// One allocation attempt plus `alloc-retries` more, stop-aware
    async fn allocate_with_retry(&self) -> Option<Allocation> {
        for attempt in 0..=self.config.alloc_retries {
            if self.stopping() {
                return None;
            }

            if let Some(allocation) = self.allocator.allocate().await {
                return Some(allocation);
            }

            if attempt < self.config.alloc_retries {
                debug!(
                    worker = %self.name,
                    attempt = attempt + 1,
                    "allocation failed, retrying"
                );
                self.sleep_unless_stopped(self.config.alloc_retry_delay()).await;
            }
        }

        None
    }

    async fn execute(&self, task: Task, allocation: &Allocation) {
        let task_id = task.id.clone();

        let patch = TaskPatch {
            status: Some(TaskStatus::Processing),
            processing_started_at: Some(Utc::now()),
            processed_by_worker: Some(self.name.clone()),
            processed_by_device: Some(allocation.device_id.clone()),
            ..TaskPatch::default()
        };
        self.update_store(&task_id, patch).await;

        info!(
            worker = %self.name,
            %task_id,
            action = %task.action,
            device_id = %allocation.device_id,
            "task processing"
        );

        let outcome = match TaskAction::parse(&task.action, &task.parameters) {
            Ok(action) => self
                .automation
                .run(allocation, &action)
                .await
                .map_err(|e| e.to_string()),
            // Malformed tasks go through the same failure path as execution
            // errors; the retry bound stops them from looping forever
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(result) => {
                info!(worker = %self.name, %task_id, "task completed");
                self.update_store(
                    &task_id,
                    TaskPatch::default().status(TaskStatus::Completed).with_result(result),
                )
                .await;
                self.health.record_success(&allocation.endpoint_id).await;
                self.retries.clear(&task_id).await;
            }
            Err(message) => {
                warn!(worker = %self.name, %task_id, error = %message, "task failed");
                self.update_store(
                    &task_id,
                    TaskPatch::default().status(TaskStatus::Failed).with_error(message),
                )
                .await;
                self.health.record_failure(&allocation.endpoint_id).await;

                let attempts = self.retries.record_failure(&task_id).await;
                if attempts >= self.config.max_attempts {
                    self.abandon(&task_id).await;
                } else {
                    self.sleep_unless_stopped(self.config.retry_cooldown()).await;
                    let patch = TaskPatch {
                        status: Some(TaskStatus::Queued),
                        queued_at: Some(Utc::now()),
                        ..TaskPatch::default()
                    };
                    self.update_store(&task_id, patch).await;
                    match self.store.get(&task_id).await {
                        Ok(Some(task)) => self.queue.push(task).await,
                        Ok(None) => warn!(%task_id, "failed task vanished before requeue"),
                        Err(e) => error!(%task_id, error = %e, "requeue fetch failed"),
                    }
                }
            }
        }
    }

    async fn abandon(&self, task_id: &str) {
        warn!(worker = %self.name, %task_id, "task abandoned");
        let message =
            format!("exceeded maximum retry attempts ({})", self.config.max_attempts);
        self.update_store(
            task_id,
            TaskPatch::default().status(TaskStatus::Abandoned).with_error(message),
        )
        .await;
        self.retries.clear(task_id).await;
    }

    /// Store writes are advisory for the in-memory flow; a failed write is
    /// logged and execution carries on
    async fn update_store(&self, task_id: &str, patch: TaskPatch) {
        if let Err(e) = self.store.update(task_id, patch).await {
            error!(worker = %self.name, %task_id, error = %e, "store update failed");
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while tokio::time::Instant::now() < deadline && !self.stopping() {
            let remaining = deadline - tokio::time::Instant::now();
            tokio::time::sleep(remaining.min(STOP_POLL)).await;
        }
    }
}
