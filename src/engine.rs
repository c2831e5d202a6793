//! Engine wiring
//!
//! Builds the store, bridge, allocator, trackers, listener, and worker pool
//! from config and runs them until shutdown.

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::allocator::Allocator;
use crate::automation::{Automation, HttpAutomation};
use crate::bridge::{AdbBridge, DeviceBridge};
use crate::config::Config;
use crate::dispatch::WorkerPool;
use crate::listener::ChangeListener;
use crate::queue::WorkQueue;
use crate::store::TaskStore;
use crate::tracker::{HealthTracker, RetryTracker};

pub struct Engine {
    config: Config,
    store: TaskStore,
    allocator: Arc<Allocator>,
    automation: Arc<dyn Automation>,
    queue: WorkQueue,
    retries: RetryTracker,
    health: HealthTracker,
}

/// Running engine tasks, held until shutdown
pub struct EngineHandle {
    listener: JoinHandle<()>,
    pool: WorkerPool,
}

impl Engine {
    /// Build an engine with the real adb bridge and HTTP automation client
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = TaskStore::open(&config.storage.db_path)
            .context("Failed to open task store")?;
        let bridge: Arc<dyn DeviceBridge> = Arc::new(AdbBridge::new(&config.bridge));
        let automation: Arc<dyn Automation> = Arc::new(
            HttpAutomation::new(&config.automation).context("Failed to build automation client")?,
        );

        Ok(Self::with_parts(config, store, bridge, automation))
    }

    /// Build an engine around injected collaborators
    pub fn with_parts(
        config: Config,
        store: TaskStore,
        bridge: Arc<dyn DeviceBridge>,
        automation: Arc<dyn Automation>,
    ) -> Self {
        let health = HealthTracker::new();
        let allocator = Arc::new(Allocator::new(
            config.endpoints.clone(),
            bridge,
            health.clone(),
        ));

        Self {
            config,
            store,
            allocator,
            automation,
            queue: WorkQueue::new(),
            retries: RetryTracker::new(),
            health,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Start the listener and worker pool
    pub fn start(&self) -> EngineHandle {
        let listener = ChangeListener::new(self.store.clone(), self.queue.clone());
        let listener = tokio::spawn(listener.run());

        let pool = WorkerPool::spawn(
            &self.config.endpoints,
            self.config.dispatch.clone(),
            self.queue.clone(),
            self.allocator.clone(),
            self.store.clone(),
            self.retries.clone(),
            self.health.clone(),
            self.automation.clone(),
        );

        EngineHandle { listener, pool }
    }

    /// Run until ctrl-c, then shut down in order
    pub async fn run(self) -> Result<()> {
        let handle = self.start();
        info!(
            endpoints = self.config.endpoints.len(),
            "engine running, press ctrl-c to stop"
        );

        tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
        info!("shutdown signal received");

        handle.shutdown().await;
        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "store shutdown failed");
        }

        Ok(())
    }
}

impl EngineHandle {
    /// Stop ingesting, then let workers finish in-flight tasks
    pub async fn shutdown(self) {
        self.listener.abort();
        self.pool.shutdown().await;
    }
}
