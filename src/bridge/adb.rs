//! adb-backed device bridge

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::BridgeConfig;

use super::DeviceBridge;

const LIST_RETRY_DELAY: Duration = Duration::from_secs(2);

// Stale uiautomator2 server processes are the most common cause of session
// startup failures after a crashed run
const AUTOMATION_PACKAGES: [&str; 2] =
    ["io.appium.uiautomator2.server", "io.appium.uiautomator2.server.test"];

/// Talks to the local adb server via the adb binary
pub struct AdbBridge {
    adb_path: String,
    command_timeout: Duration,
}

impl AdbBridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(adb = %self.adb_path, ?args, "AdbBridge::run: called");
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(&self.adb_path).args(args).output(),
        )
        .await
        .map_err(|_| eyre!("adb command timed out after {:?}", self.command_timeout))?
        .context("Failed to spawn adb")?;

        Ok(output)
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<String>> {
        // adb can answer erratically right after its server restarts, so one
        // failed listing gets a second chance
        let output = match self.run(&["devices"]).await {
            Ok(output) if output.status.success() => output,
            first => {
                if let Err(e) = &first {
                    warn!(error = %e, "adb devices failed, retrying");
                }
                tokio::time::sleep(LIST_RETRY_DELAY).await;
                let output = self.run(&["devices"]).await?;
                if !output.status.success() {
                    return Err(eyre!(
                        "adb devices failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ));
                }
                output
            }
        };

        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn verify(&self, serial: &str) -> bool {
        match self.run(&["-s", serial, "shell", "echo", "ping"]).await {
            Ok(output) if output.status.success() => {
                let answer = String::from_utf8_lossy(&output.stdout).trim().to_string();
                debug!(%serial, %answer, "device verified");
                answer == "ping"
            }
            Ok(output) => {
                warn!(%serial, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "device verification failed");
                false
            }
            Err(e) => {
                warn!(%serial, error = %e, "device verification errored");
                false
            }
        }
    }

    async fn reset_automation(&self, serial: &str) -> Result<()> {
        debug!(%serial, "AdbBridge::reset_automation: called");
        for package in AUTOMATION_PACKAGES {
            let output = self.run(&["-s", serial, "shell", "pm", "clear", package]).await?;
            if !output.status.success() {
                // The test package may not be installed; clearing is best-effort
                warn!(
                    %serial,
                    %package,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "pm clear failed"
                );
            }
        }

        Ok(())
    }
}

/// Parse `adb devices` output into serials in the `device` state
fn parse_devices(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.trim().split('\t');
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) if !serial.is_empty() => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let stdout = "List of devices attached\n\
                      127.0.0.1:16384\tdevice\n\
                      emulator-5554\tdevice\n\
                      127.0.0.1:16416\toffline\n\
                      \n";

        let serials = parse_devices(stdout);

        assert_eq!(serials, vec!["127.0.0.1:16384".to_string(), "emulator-5554".to_string()]);
    }

    #[test]
    fn test_parse_devices_empty_listing() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }
}
