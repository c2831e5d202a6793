//! Device bridge
//!
//! Abstraction over the local device manager (adb). The allocator only ever
//! talks to the trait so tests can swap in a scripted fleet.

mod adb;

pub use adb::AdbBridge;

use async_trait::async_trait;
use eyre::Result;

/// Access to the connected emulator fleet
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Serials of devices currently reported online
    async fn list_devices(&self) -> Result<Vec<String>>;

    /// Probe one device; true only when it answers within the timeout
    async fn verify(&self, serial: &str) -> bool;

    /// Clear stale automation services on a device before a retry
    async fn reset_automation(&self, serial: &str) -> Result<()>;
}

/// List devices and keep only those that answer a liveness probe
pub async fn probe_fleet(bridge: &dyn DeviceBridge) -> Result<Vec<String>> {
    let serials = bridge.list_devices().await?;

    let mut verified = Vec::with_capacity(serials.len());
    for serial in serials {
        if bridge.verify(&serial).await {
            verified.push(serial);
        } else {
            tracing::warn!(%serial, "device listed but failed liveness probe");
        }
    }

    Ok(verified)
}

/// Scripted bridge for tests
pub mod mock {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory fleet with controllable health
    pub struct MockBridge {
        devices: Mutex<Vec<String>>,
        dead: Mutex<HashSet<String>>,
        pub resets: Mutex<Vec<String>>,
    }

    impl MockBridge {
        pub fn new(devices: &[&str]) -> Self {
            Self {
                devices: Mutex::new(devices.iter().map(|s| s.to_string()).collect()),
                dead: Mutex::new(HashSet::new()),
                resets: Mutex::new(Vec::new()),
            }
        }

        /// Keep the device listed but make it fail verification
        pub fn kill(&self, serial: &str) {
            self.dead.lock().unwrap().insert(serial.to_string());
        }

        pub fn revive(&self, serial: &str) {
            self.dead.lock().unwrap().remove(serial);
        }

        pub fn set_devices(&self, devices: &[&str]) {
            *self.devices.lock().unwrap() = devices.iter().map(|s| s.to_string()).collect();
        }
    }

    #[async_trait]
    impl DeviceBridge for MockBridge {
        async fn list_devices(&self) -> Result<Vec<String>> {
            Ok(self.devices.lock().unwrap().clone())
        }

        async fn verify(&self, serial: &str) -> bool {
            !self.dead.lock().unwrap().contains(serial)
        }

        async fn reset_automation(&self, serial: &str) -> Result<()> {
            self.resets.lock().unwrap().push(serial.to_string());
            Ok(())
        }
    }
}
