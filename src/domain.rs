//! Core task types
//!
//! Tasks are externally-created documents; drover never invents work, it
//! drains what the store feeds it. Status moves strictly forward:
//! pending -> queued -> processing -> {completed, failed, abandoned},
//! with failed -> queued on retry.

use chrono::{DateTime, Utc};
use eyre::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle state of a task document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created externally, not yet seen by the engine
    Pending,
    /// Claimed by the change listener, waiting in the work queue
    Queued,
    /// A worker holds resources and is executing it
    Processing,
    /// Finished with a result payload
    Completed,
    /// Finished with an error; may be retried
    Failed,
    /// Retry budget exhausted; terminal
    Abandoned,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "abandoned" => Ok(TaskStatus::Abandoned),
            other => bail!("Unknown task status: '{}'", other),
        }
    }

    /// Completed and abandoned tasks are never picked up again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Abandoned)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work, as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Raw action string; validated into a [`TaskAction`] at execution time
    pub action: String,
    pub parameters: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Endpoint id of the worker that last processed this task
    pub processed_by_worker: Option<String>,
    /// Device serial the last attempt ran against
    pub processed_by_device: Option<String>,
}

impl Task {
    pub fn new(action: &str, parameters: Value) -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string(), action, parameters)
    }

    pub fn with_id(id: String, action: &str, parameters: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            action: action.to_string(),
            parameters,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            queued_at: None,
            processing_started_at: None,
            processed_by_worker: None,
            processed_by_device: None,
        }
    }
}

/// Partial update applied to a stored task
///
/// `None` fields are left untouched; `apply` always bumps `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_by_worker: Option<String>,
    pub processed_by_device: Option<String>,
}

impl TaskPatch {
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            task.error = Some(error.clone());
        }
        if let Some(queued_at) = self.queued_at {
            task.queued_at = Some(queued_at);
        }
        if let Some(started) = self.processing_started_at {
            task.processing_started_at = Some(started);
        }
        if let Some(worker) = &self.processed_by_worker {
            task.processed_by_worker = Some(worker.clone());
        }
        if let Some(device) = &self.processed_by_device {
            task.processed_by_device = Some(device.clone());
        }
        task.updated_at = Utc::now();
    }
}

/// Parameters for a note-feed keyword search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchNotesParams {
    pub keyword: String,

    /// How many screenfuls to scroll through while collecting
    #[serde(default = "default_swipe_count")]
    pub swipe_count: u32,

    /// Optional UI filters applied before collecting (e.g. sort order)
    #[serde(default)]
    pub filters: Option<BTreeMap<String, String>>,
}

/// Parameters for a product-listing keyword search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProductsParams {
    pub keyword: String,

    #[serde(default = "default_swipe_count")]
    pub swipe_count: u32,
}

fn default_swipe_count() -> u32 {
    10
}

/// Validated action + parameters, parsed from the raw task document
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    SearchNotes(SearchNotesParams),
    SearchProducts(SearchProductsParams),
}

impl TaskAction {
    /// Validate a raw action string and its parameter document
    pub fn parse(action: &str, parameters: &Value) -> Result<Self> {
        match action {
            "search_notes" => {
                let params: SearchNotesParams = serde_json::from_value(parameters.clone())?;
                Ok(TaskAction::SearchNotes(params))
            }
            "search_products" => {
                let params: SearchProductsParams = serde_json::from_value(parameters.clone())?;
                Ok(TaskAction::SearchProducts(params))
            }
            other => bail!("Unknown action: '{}'", other),
        }
    }

    /// Operation name on the automation endpoint
    pub fn op_name(&self) -> &'static str {
        match self {
            TaskAction::SearchNotes(_) => "search_notes",
            TaskAction::SearchProducts(_) => "search_products",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Abandoned,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert!(TaskStatus::parse("running").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Abandoned.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("search_notes", json!({"keyword": "tea"}));

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.queued_at.is_none());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_patch_apply_bumps_updated_at() {
        let mut task = Task::new("search_notes", json!({"keyword": "tea"}));
        let before = task.updated_at;

        TaskPatch::default()
            .status(TaskStatus::Failed)
            .with_error("device lost")
            .apply(&mut task);

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("device lost"));
        assert!(task.updated_at >= before);
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let mut task = Task::new("search_notes", json!({"keyword": "tea"}));
        task.error = Some("old error".to_string());

        TaskPatch::default().status(TaskStatus::Queued).apply(&mut task);

        assert_eq!(task.error.as_deref(), Some("old error"));
    }

    #[test]
    fn test_parse_search_notes_defaults() {
        let action = TaskAction::parse("search_notes", &json!({"keyword": "camping gear"})).unwrap();

        match action {
            TaskAction::SearchNotes(p) => {
                assert_eq!(p.keyword, "camping gear");
                assert_eq!(p.swipe_count, 10);
                assert!(p.filters.is_none());
            }
            other => panic!("wrong action: {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_products() {
        let action = TaskAction::parse(
            "search_products",
            &json!({"keyword": "kettle", "swipe_count": 4}),
        )
        .unwrap();

        assert_eq!(action.op_name(), "search_products");
        match action {
            TaskAction::SearchProducts(p) => assert_eq!(p.swipe_count, 4),
            other => panic!("wrong action: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_action() {
        let err = TaskAction::parse("mine_bitcoin", &json!({})).unwrap_err();
        assert!(err.to_string().contains("Unknown action"));
    }

    #[test]
    fn test_parse_missing_keyword_fails() {
        assert!(TaskAction::parse("search_notes", &json!({"swipe_count": 2})).is_err());
    }
}
