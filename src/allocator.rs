//! Resource allocator
//!
//! Pairs automation endpoints with live devices. The invariant: at any
//! moment each endpoint id and each device id appears in at most one
//! outstanding [`Allocation`]. Both busy sets live behind one lock, so
//! allocate and release are atomic with respect to each other.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::{DeviceBridge, probe_fleet};
use crate::config::EndpointConfig;
use crate::tracker::{HealthStatus, HealthTracker};

/// An endpoint/device pair held exclusively by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub endpoint_id: String,
    pub endpoint_url: String,
    pub device_id: String,
    pub aux_ports: BTreeMap<String, u16>,
}

#[derive(Default)]
struct BusySets {
    endpoints: HashSet<String>,
    devices: HashSet<String>,
}

/// Matches free endpoints to verified free devices
pub struct Allocator {
    endpoints: Vec<EndpointConfig>,
    bridge: Arc<dyn DeviceBridge>,
    health: HealthTracker,
    busy: Mutex<BusySets>,
}

impl Allocator {
    pub fn new(
        endpoints: Vec<EndpointConfig>,
        bridge: Arc<dyn DeviceBridge>,
        health: HealthTracker,
    ) -> Self {
        Self {
            endpoints,
            bridge,
            health,
            busy: Mutex::new(BusySets::default()),
        }
    }

    /// Try once to pair a free endpoint with a verified free device
    ///
    /// Never blocks waiting for resources; `None` means nothing matched
    /// right now. Endpoint order is randomized each call so a permanently
    /// broken endpoint early in the config cannot starve the rest.
    pub async fn allocate(&self) -> Option<Allocation> {
        debug!("Allocator::allocate: called");

        // Probe outside the lock; holding it across adb calls would stall
        // every concurrent release
        let verified = match probe_fleet(self.bridge.as_ref()).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "device probe failed");
                return None;
            }
        };
        if verified.is_empty() {
            debug!("no verified devices online");
            return None;
        }

        let mut order: Vec<usize> = (0..self.endpoints.len()).collect();
        order.shuffle(&mut rand::rng());

        let allocation = {
            let mut busy = self.busy.lock().await;

            let mut found = None;
            for idx in order {
                let endpoint = &self.endpoints[idx];
                if busy.endpoints.contains(&endpoint.id) {
                    continue;
                }

                let Some(device_id) = pick_device(endpoint, &verified, &busy.devices) else {
                    continue;
                };

                busy.endpoints.insert(endpoint.id.clone());
                busy.devices.insert(device_id.clone());
                found = Some(Allocation {
                    endpoint_id: endpoint.id.clone(),
                    endpoint_url: endpoint.url.clone(),
                    device_id,
                    aux_ports: endpoint.aux_ports.clone(),
                });
                break;
            }
            found
        }?;

        info!(
            endpoint_id = %allocation.endpoint_id,
            device_id = %allocation.device_id,
            "resources allocated"
        );

        // A previously failing endpoint gets its device scrubbed of stale
        // automation services before the next session
        if self.health.status(&allocation.endpoint_id).await == HealthStatus::Unhealthy {
            if let Err(e) = self.bridge.reset_automation(&allocation.device_id).await {
                warn!(device_id = %allocation.device_id, error = %e, "automation cleanup failed");
            }
        }

        Some(allocation)
    }

    /// Return an allocation's endpoint and device to the free pool
    ///
    /// Safe to call more than once for the same allocation.
    pub async fn release(&self, allocation: &Allocation) {
        debug!(
            endpoint_id = %allocation.endpoint_id,
            device_id = %allocation.device_id,
            "Allocator::release: called"
        );
        let mut busy = self.busy.lock().await;

        if !busy.endpoints.remove(&allocation.endpoint_id) {
            warn!(endpoint_id = %allocation.endpoint_id, "released endpoint was not busy");
        }
        if !busy.devices.remove(&allocation.device_id) {
            warn!(device_id = %allocation.device_id, "released device was not busy");
        }
    }

    /// (busy endpoints, busy devices)
    pub async fn busy_counts(&self) -> (usize, usize) {
        let busy = self.busy.lock().await;
        (busy.endpoints.len(), busy.devices.len())
    }
}

/// Intended device when verified and free, else any verified free device
fn pick_device(
    endpoint: &EndpointConfig,
    verified: &[String],
    busy_devices: &HashSet<String>,
) -> Option<String> {
    if let Some(intended) = &endpoint.intended_device_id {
        if verified.iter().any(|d| d == intended) && !busy_devices.contains(intended) {
            return Some(intended.clone());
        }
        debug!(
            endpoint_id = %endpoint.id,
            intended_device_id = %intended,
            "intended device unavailable, falling back"
        );
    }

    verified
        .iter()
        .find(|d| !busy_devices.contains(*d))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bridge::mock::MockBridge;

    fn endpoint(id: &str, intended: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            id: id.to_string(),
            url: format!("http://127.0.0.1/{id}"),
            intended_device_id: intended.map(|s| s.to_string()),
            aux_ports: BTreeMap::new(),
        }
    }

    fn allocator(endpoints: Vec<EndpointConfig>, bridge: MockBridge) -> Allocator {
        Allocator::new(endpoints, Arc::new(bridge), HealthTracker::new())
    }

    #[tokio::test]
    async fn test_allocates_intended_device() {
        let bridge = MockBridge::new(&["dev-a", "dev-b"]);
        let alloc = allocator(vec![endpoint("ep-1", Some("dev-b"))], bridge);

        let allocation = alloc.allocate().await.unwrap();

        assert_eq!(allocation.endpoint_id, "ep-1");
        assert_eq!(allocation.device_id, "dev-b");
        assert_eq!(alloc.busy_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_falls_back_when_intended_device_dead() {
        let bridge = MockBridge::new(&["dev-a", "dev-b"]);
        bridge.kill("dev-b");
        let alloc = allocator(vec![endpoint("ep-1", Some("dev-b"))], bridge);

        let allocation = alloc.allocate().await.unwrap();

        assert_eq!(allocation.device_id, "dev-a");
    }

    #[tokio::test]
    async fn test_mutual_exclusion_and_exhaustion() {
        let bridge = MockBridge::new(&["dev-a", "dev-b"]);
        let alloc = allocator(
            vec![
                endpoint("ep-1", Some("dev-a")),
                endpoint("ep-2", Some("dev-b")),
                endpoint("ep-3", None),
            ],
            bridge,
        );

        let first = alloc.allocate().await.unwrap();
        let second = alloc.allocate().await.unwrap();

        assert_ne!(first.endpoint_id, second.endpoint_id);
        assert_ne!(first.device_id, second.device_id);

        // Three endpoints, two devices: the third attempt finds no device
        assert!(alloc.allocate().await.is_none());
        assert_eq!(alloc.busy_counts().await, (2, 2));
    }

    #[tokio::test]
    async fn test_concurrent_allocate_release_never_overlaps() {
        use std::sync::Mutex as StdMutex;

        let bridge = MockBridge::new(&["dev-a", "dev-b"]);
        let alloc = Arc::new(allocator(
            vec![endpoint("ep-1", Some("dev-a")), endpoint("ep-2", Some("dev-b"))],
            bridge,
        ));

        // Ids held by some task right now, per the tasks' own bookkeeping;
        // an insert that reports a duplicate is an overlap
        let held: Arc<StdMutex<(HashSet<String>, HashSet<String>)>> =
            Arc::new(StdMutex::new((HashSet::new(), HashSet::new())));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let alloc = alloc.clone();
            let held = held.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let Some(allocation) = alloc.allocate().await else {
                        tokio::task::yield_now().await;
                        continue;
                    };

                    {
                        let mut held = held.lock().unwrap();
                        assert!(
                            held.0.insert(allocation.endpoint_id.clone()),
                            "endpoint {} allocated twice",
                            allocation.endpoint_id
                        );
                        assert!(
                            held.1.insert(allocation.device_id.clone()),
                            "device {} allocated twice",
                            allocation.device_id
                        );
                    }

                    let (endpoints, devices) = alloc.busy_counts().await;
                    assert!(endpoints <= 2, "busy endpoints exceeded configured total");
                    assert!(devices <= 2, "busy devices exceeded verified total");

                    tokio::task::yield_now().await;

                    {
                        let mut held = held.lock().unwrap();
                        held.0.remove(&allocation.endpoint_id);
                        held.1.remove(&allocation.device_id);
                    }
                    alloc.release(&allocation).await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(alloc.busy_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_release_returns_resources() {
        let bridge = MockBridge::new(&["dev-a"]);
        let alloc = allocator(vec![endpoint("ep-1", Some("dev-a"))], bridge);

        let allocation = alloc.allocate().await.unwrap();
        assert!(alloc.allocate().await.is_none());

        alloc.release(&allocation).await;
        assert_eq!(alloc.busy_counts().await, (0, 0));

        let again = alloc.allocate().await.unwrap();
        assert_eq!(again, allocation);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let bridge = MockBridge::new(&["dev-a"]);
        let alloc = allocator(vec![endpoint("ep-1", None)], bridge);

        let allocation = alloc.allocate().await.unwrap();
        alloc.release(&allocation).await;
        alloc.release(&allocation).await;

        assert_eq!(alloc.busy_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_no_devices_online() {
        let bridge = MockBridge::new(&[]);
        let alloc = allocator(vec![endpoint("ep-1", None)], bridge);

        assert!(alloc.allocate().await.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_endpoint_gets_device_reset() {
        let bridge = Arc::new(MockBridge::new(&["dev-a"]));
        let health = HealthTracker::new();
        for _ in 0..3 {
            health.record_failure("ep-1").await;
        }
        let alloc = Allocator::new(vec![endpoint("ep-1", Some("dev-a"))], bridge.clone(), health);

        alloc.allocate().await.unwrap();

        assert_eq!(*bridge.resets.lock().unwrap(), vec!["dev-a".to_string()]);
    }
}
