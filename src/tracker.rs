//! Retry and endpoint-health bookkeeping
//!
//! Both trackers are in-memory only; state resets with the process. Retry
//! counts are keyed by task id, health by endpoint id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Consecutive failures at which an endpoint is declared unhealthy
const UNHEALTHY_THRESHOLD: u32 = 3;

/// Per-task execution attempt counts
#[derive(Clone, Default)]
pub struct RetryTracker {
    counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed attempts recorded so far for this task
    pub async fn attempts(&self, task_id: &str) -> u32 {
        self.counts.lock().await.get(task_id).copied().unwrap_or(0)
    }

    /// Record one failed attempt, returning the new count
    pub async fn record_failure(&self, task_id: &str) -> u32 {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        debug!(%task_id, attempts = *count, "RetryTracker::record_failure: called");
        *count
    }

    /// Drop the count for a task that reached a terminal state
    pub async fn clear(&self, task_id: &str) {
        self.counts.lock().await.remove(task_id);
    }
}

/// Coarse endpoint condition derived from consecutive failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No attempt observed yet
    Unknown,
    Healthy,
    /// At least one consecutive failure
    Warning,
    /// Reached the consecutive-failure threshold
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Health record for one endpoint
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

/// Per-endpoint health derived from task execution outcomes
#[derive(Clone, Default)]
pub struct HealthTracker {
    records: Arc<Mutex<HashMap<String, EndpointHealth>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, endpoint_id: &str) {
        let mut records = self.records.lock().await;
        let record = records.entry(endpoint_id.to_string()).or_default();
        record.status = HealthStatus::Healthy;
        record.consecutive_failures = 0;
        record.last_success = Some(Utc::now());
    }

    pub async fn record_failure(&self, endpoint_id: &str) {
        let mut records = self.records.lock().await;
        let record = records.entry(endpoint_id.to_string()).or_default();
        record.consecutive_failures += 1;

        if record.consecutive_failures >= UNHEALTHY_THRESHOLD {
            if record.status != HealthStatus::Unhealthy {
                warn!(
                    %endpoint_id,
                    consecutive_failures = record.consecutive_failures,
                    "endpoint marked unhealthy"
                );
            }
            record.status = HealthStatus::Unhealthy;
        } else {
            record.status = HealthStatus::Warning;
            warn!(
                %endpoint_id,
                consecutive_failures = record.consecutive_failures,
                "endpoint health warning"
            );
        }
    }

    pub async fn status(&self, endpoint_id: &str) -> HealthStatus {
        self.records
            .lock()
            .await
            .get(endpoint_id)
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Copy of all health records, for the status surface
    pub async fn snapshot(&self) -> HashMap<String, EndpointHealth> {
        self.records.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_counts_accumulate_and_clear() {
        let tracker = RetryTracker::new();

        assert_eq!(tracker.attempts("t-1").await, 0);
        assert_eq!(tracker.record_failure("t-1").await, 1);
        assert_eq!(tracker.record_failure("t-1").await, 2);
        assert_eq!(tracker.attempts("t-1").await, 2);
        assert_eq!(tracker.attempts("t-2").await, 0);

        tracker.clear("t-1").await;
        assert_eq!(tracker.attempts("t-1").await, 0);
    }

    #[tokio::test]
    async fn test_health_warning_then_unhealthy() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.status("ep").await, HealthStatus::Unknown);

        tracker.record_failure("ep").await;
        assert_eq!(tracker.status("ep").await, HealthStatus::Warning);

        tracker.record_failure("ep").await;
        assert_eq!(tracker.status("ep").await, HealthStatus::Warning);

        tracker.record_failure("ep").await;
        assert_eq!(tracker.status("ep").await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_success_resets_health() {
        let tracker = HealthTracker::new();
        for _ in 0..3 {
            tracker.record_failure("ep").await;
        }
        assert_eq!(tracker.status("ep").await, HealthStatus::Unhealthy);

        tracker.record_success("ep").await;
        assert_eq!(tracker.status("ep").await, HealthStatus::Healthy);

        let snapshot = tracker.snapshot().await;
        let record = snapshot.get("ep").unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_success.is_some());
    }
}
