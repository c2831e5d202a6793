//! Task store
//!
//! A SQLite-backed task collection behind an actor. Callers hold a cheap
//! cloneable [`TaskStore`] handle; the actor owns the connection and
//! serializes all access. Creation emits a [`TaskEvent`] on a broadcast
//! channel so the change listener can react without polling.

mod messages;
mod sqlite;

pub use messages::{StatusCounts, StoreCommand, StoreError, StoreResult, TaskEvent};

use std::path::Path;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error};

use crate::domain::{Task, TaskPatch, TaskStatus};

use sqlite::TaskDb;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Handle for interacting with the task store actor
#[derive(Clone)]
pub struct TaskStore {
    tx: mpsc::Sender<StoreCommand>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    /// Open the database and spawn the store actor
    pub fn open(path: &Path) -> StoreResult<Self> {
        debug!(path = %path.display(), "TaskStore::open: called");
        let db = TaskDb::open(path)?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        tokio::spawn(actor_loop(db, rx, events.clone()));

        Ok(Self { tx, events })
    }

    /// Subscribe to task change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Insert a new task document
    pub async fn create(&self, task: Task) -> StoreResult<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Create { task, reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Fetch one task by id
    pub async fn get(&self, id: &str) -> StoreResult<Option<Task>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Get { id: id.to_string(), reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Apply a patch to an existing task
    pub async fn update(&self, id: &str, patch: TaskPatch) -> StoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Update { id: id.to_string(), patch, reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// List tasks, optionally filtered by status
    pub async fn list(&self, status_filter: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::List { status_filter, reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Atomically move a pending task to queued; false if already claimed
    pub async fn claim_pending(&self, id: &str) -> StoreResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ClaimPending { id: id.to_string(), reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Per-status task totals
    pub async fn counts(&self) -> StoreResult<StatusCounts> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Counts { reply })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Ask the actor to exit
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelError)
    }
}

async fn actor_loop(
    db: TaskDb,
    mut rx: mpsc::Receiver<StoreCommand>,
    events: broadcast::Sender<TaskEvent>,
) {
    debug!("store actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Create { task, reply } => {
                let result = db.create(&task);
                if result.is_ok() {
                    // No receivers yet is fine; the listener may not be up
                    let _ = events.send(TaskEvent::Created { task });
                }
                let _ = reply.send(result);
            }
            StoreCommand::Get { id, reply } => {
                let _ = reply.send(db.get(&id));
            }
            StoreCommand::Update { id, patch, reply } => {
                let result = db.update(&id, &patch);
                if let Err(e) = &result {
                    error!(%id, error = %e, "store update failed");
                }
                let _ = reply.send(result);
            }
            StoreCommand::List { status_filter, reply } => {
                let _ = reply.send(db.list(status_filter));
            }
            StoreCommand::ClaimPending { id, reply } => {
                let _ = reply.send(db.claim_pending(&id));
            }
            StoreCommand::Counts { reply } => {
                let _ = reply.send(db.counts());
            }
            StoreCommand::Shutdown => break,
        }
    }

    debug!("store actor stopped");
}
