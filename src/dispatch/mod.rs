//! Dispatch worker pool
//!
//! One worker per configured endpoint, all draining the shared queue.
//! Shutdown is cooperative: the stop flag is set and each worker exits
//! after finishing (or requeueing) whatever it holds.

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::allocator::Allocator;
use crate::automation::Automation;
use crate::config::{DispatchConfig, EndpointConfig};
use crate::queue::WorkQueue;
use crate::store::TaskStore;
use crate::tracker::{HealthTracker, RetryTracker};

use worker::Worker;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn one worker per endpoint
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        endpoints: &[EndpointConfig],
        config: DispatchConfig,
        queue: WorkQueue,
        allocator: Arc<Allocator>,
        store: TaskStore,
        retries: RetryTracker,
        health: HealthTracker,
        automation: Arc<dyn Automation>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let handles = endpoints
            .iter()
            .map(|endpoint| {
                let worker = Worker {
                    name: endpoint.id.clone(),
                    config: config.clone(),
                    queue: queue.clone(),
                    allocator: allocator.clone(),
                    store: store.clone(),
                    retries: retries.clone(),
                    health: health.clone(),
                    automation: automation.clone(),
                    stop: stop.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = endpoints.len(), "worker pool started");
        Self { handles, stop }
    }

    /// Signal all workers and wait for them to finish in-flight work
    pub async fn shutdown(self) {
        info!("stopping worker pool");
        self.stop.store(true, Ordering::SeqCst);

        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}
