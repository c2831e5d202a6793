//! End-to-end engine tests over a real store with mocked fleet and
//! automation endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use drover::automation::mock::MockAutomation;
use drover::bridge::mock::MockBridge;
use drover::config::{Config, DispatchConfig, EndpointConfig};
use drover::domain::{Task, TaskStatus};
use drover::engine::Engine;
use drover::store::TaskStore;
use drover::tracker::HealthStatus;

fn fast_config(endpoints: &[(&str, Option<&str>)]) -> Config {
    let mut config = Config::default();
    config.endpoints = endpoints
        .iter()
        .map(|(id, intended)| EndpointConfig {
            id: id.to_string(),
            url: format!("http://127.0.0.1/{id}"),
            intended_device_id: intended.map(|s| s.to_string()),
            aux_ports: Default::default(),
        })
        .collect();
    config.dispatch = DispatchConfig {
        queue_poll_ms: 20,
        alloc_retries: 1,
        alloc_retry_delay_ms: 10,
        requeue_delay_ms: 10,
        retry_cooldown_ms: 10,
        max_attempts: 3,
    };
    config
}

fn engine(
    config: Config,
    bridge: MockBridge,
    automation: MockAutomation,
) -> (Engine, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(&dir.path().join("tasks.db")).unwrap();
    let engine = Engine::with_parts(config, store, Arc::new(bridge), Arc::new(automation));
    (engine, dir)
}

fn search_task(keyword: &str) -> Task {
    Task::new("search_notes", json!({"keyword": keyword, "swipe_count": 2}))
}

async fn wait_for_status(store: &TaskStore, id: &str, status: TaskStatus) -> Task {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = store.get(id).await.unwrap().unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never reached {status}"))
}

#[tokio::test]
async fn test_submitted_task_runs_to_completion() {
    let config = fast_config(&[("ep-1", Some("dev-a"))]);
    let bridge = MockBridge::new(&["dev-a"]);
    let automation = MockAutomation::new().succeed_with(json!({"notes": ["n1", "n2"]}));

    let (engine, _dir) = engine(config, bridge, automation);
    let store = engine.store().clone();
    let handle = engine.start();

    let id = store.create(search_task("city hikes")).await.unwrap();

    let task = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_eq!(task.result.unwrap()["notes"], json!(["n1", "n2"]));
    assert_eq!(task.processed_by_worker.as_deref(), Some("ep-1"));
    assert_eq!(task.processed_by_device.as_deref(), Some("dev-a"));

    assert_eq!(engine.health().status("ep-1").await, HealthStatus::Healthy);
    assert_eq!(engine.allocator().busy_counts().await, (0, 0));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_persistently_failing_endpoint_abandons_and_degrades_health() {
    let config = fast_config(&[("ep-1", Some("dev-a"))]);
    let bridge = MockBridge::new(&["dev-a"]);
    let automation = MockAutomation::new().fail_with("session refused");

    let (engine, _dir) = engine(config, bridge, automation);
    let store = engine.store().clone();
    let handle = engine.start();

    let id = store.create(search_task("thermal mugs")).await.unwrap();

    let task = wait_for_status(&store, &id, TaskStatus::Abandoned).await;
    assert_eq!(task.error.as_deref(), Some("exceeded maximum retry attempts (3)"));

    // Three consecutive failures push the endpoint to unhealthy
    assert_eq!(engine.health().status("ep-1").await, HealthStatus::Unhealthy);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_more_endpoints_than_devices_all_tasks_complete() {
    // Two endpoints compete for one device; tasks serialize but all finish
    let config = fast_config(&[("ep-1", None), ("ep-2", None)]);
    let bridge = MockBridge::new(&["dev-a"]);
    let automation = MockAutomation::new().succeed_with(json!({"notes": []}));

    let (engine, _dir) = engine(config, bridge, automation);
    let store = engine.store().clone();
    let handle = engine.start();

    let mut ids = Vec::new();
    for keyword in ["desks", "chairs", "lamps", "rugs"] {
        ids.push(store.create(search_task(keyword)).await.unwrap());
    }

    for id in &ids {
        let task = wait_for_status(&store, id, TaskStatus::Completed).await;
        assert_eq!(task.processed_by_device.as_deref(), Some("dev-a"));
    }

    assert_eq!(engine.allocator().busy_counts().await, (0, 0));
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.completed, 4);
    assert_eq!(counts.total(), 4);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_backlog_created_before_start_is_drained() {
    let config = fast_config(&[("ep-1", Some("dev-a"))]);
    let bridge = MockBridge::new(&["dev-a"]);
    let automation = MockAutomation::new().succeed_with(json!({"notes": []}));

    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(&dir.path().join("tasks.db")).unwrap();

    // Created while no engine is running
    let id = store.create(search_task("field recorders")).await.unwrap();

    let engine = Engine::with_parts(config, store.clone(), Arc::new(bridge), Arc::new(automation));
    let handle = engine.start();

    wait_for_status(&store, &id, TaskStatus::Completed).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_device_coming_online_unblocks_dispatch() {
    let config = fast_config(&[("ep-1", Some("dev-a"))]);
    let bridge = MockBridge::new(&["dev-a"]);
    bridge.kill("dev-a");
    let automation = MockAutomation::new().succeed_with(json!({"notes": []}));

    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(&dir.path().join("tasks.db")).unwrap();
    let bridge = Arc::new(bridge);
    let engine = Engine::with_parts(config, store.clone(), bridge.clone(), Arc::new(automation));
    let handle = engine.start();

    let id = store.create(search_task("tents")).await.unwrap();

    // With the only device dead the task keeps cycling through queued
    tokio::time::sleep(Duration::from_millis(100)).await;
    let task = store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    bridge.revive("dev-a");
    wait_for_status(&store, &id, TaskStatus::Completed).await;

    handle.shutdown().await;
}
