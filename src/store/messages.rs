//! Task store messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Task, TaskPatch, TaskStatus};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Duplicate task id: {0}")]
    Duplicate(String),

    #[error("Store error: {0}")]
    Backend(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-status task totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.queued + self.processing + self.completed + self.failed + self.abandoned
    }
}

/// Change notification emitted by the store
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A new task document was created
    Created { task: Task },
}

/// Commands sent to the store actor
#[derive(Debug)]
pub enum StoreCommand {
    Create {
        task: Task,
        reply: oneshot::Sender<StoreResult<String>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<StoreResult<Option<Task>>>,
    },
    Update {
        id: String,
        patch: TaskPatch,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    List {
        status_filter: Option<TaskStatus>,
        reply: oneshot::Sender<StoreResult<Vec<Task>>>,
    },
    ClaimPending {
        id: String,
        reply: oneshot::Sender<StoreResult<bool>>,
    },
    Counts {
        reply: oneshot::Sender<StoreResult<StatusCounts>>,
    },
    Shutdown,
}
