//! Drover - Device Resource Allocation and Task Execution Engine
//!
//! Drover drives a fleet of emulator devices through keyword-search tasks
//! on a mobile app, via remote UI-automation endpoints. Tasks arrive in an
//! external store; drover claims them, pairs an automation endpoint with a
//! live device under mutual exclusion, executes, and writes the outcome
//! back with bounded retries.
//!
//! # Core Concepts
//!
//! - **Tasks are external**: drover never invents work, it drains the store
//! - **Exclusive pairs**: each endpoint and each device serves one task at a time
//! - **Bounded retries**: three failed attempts and a task is abandoned
//! - **Health is advisory**: endpoint health tracking warns, it never gates
//!
//! # Modules
//!
//! - [`store`] - SQLite task store behind an actor, with change notifications
//! - [`allocator`] - endpoint/device pairing under one lock
//! - [`dispatch`] - worker pool and per-task execution loop
//! - [`listener`] - claims pending tasks into the work queue
//! - [`automation`] - remote UI-automation session client
//! - [`bridge`] - adb fleet access
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod allocator;
pub mod automation;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod listener;
pub mod queue;
pub mod store;
pub mod tracker;

// Re-export commonly used types
pub use allocator::{Allocation, Allocator};
pub use automation::{Automation, AutomationError, HttpAutomation};
pub use bridge::{AdbBridge, DeviceBridge, probe_fleet};
pub use config::{Config, DispatchConfig, EndpointConfig};
pub use dispatch::WorkerPool;
pub use domain::{Task, TaskAction, TaskPatch, TaskStatus};
pub use engine::{Engine, EngineHandle};
pub use listener::ChangeListener;
pub use queue::WorkQueue;
pub use store::{StatusCounts, StoreError, StoreResult, TaskEvent, TaskStore};
pub use tracker::{EndpointHealth, HealthStatus, HealthTracker, RetryTracker};
