//! In-process work queue
//!
//! FIFO of claimed tasks shared by the change listener (producer) and the
//! dispatch workers (consumers). Pops are bounded in time so workers can
//! notice the stop flag between waits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::Task;

/// Shared FIFO work queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Mutex<VecDeque<Task>>>,
    notify: Arc<Notify>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append a task to the back of the queue
    pub async fn push(&self, task: Task) {
        debug!(task_id = %task.id, "WorkQueue::push: called");
        self.inner.lock().await.push_back(task);
        // notify_one stores a permit, so a push that races a not-yet-parked
        // consumer is not lost
        self.notify.notify_one();
    }

    /// Pop the oldest task, waiting up to `timeout` for one to arrive
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(task) = self.inner.lock().await.pop_front() {
                return Some(task);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            if tokio::time::timeout(remaining, self.notify.notified()).await.is_err() {
                return None;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn task(kw: &str) -> Task {
        Task::new("search_notes", json!({"keyword": kw}))
    }

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let queue = WorkQueue::new();
        queue.push(task("first")).await;
        queue.push(task("second")).await;

        let a = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        let b = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();

        assert_eq!(a.parameters["keyword"], "first");
        assert_eq!(b.parameters["keyword"], "second");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = WorkQueue::new();

        let started = Instant::now();
        let popped = queue.pop_timeout(Duration::from_millis(20)).await;

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = WorkQueue::new();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_timeout(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(task("late")).await;

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.parameters["keyword"], "late");
    }

    #[tokio::test]
    async fn test_each_task_popped_once() {
        let queue = WorkQueue::new();
        for i in 0..4 {
            queue.push(task(&format!("kw-{i}"))).await;
        }

        let mut seen = Vec::new();
        let mut consumers = Vec::new();
        for _ in 0..2 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(task) = queue.pop_timeout(Duration::from_millis(20)).await {
                    got.push(task.id);
                }
                got
            }));
        }
        for consumer in consumers {
            seen.extend(consumer.await.unwrap());
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }
}
