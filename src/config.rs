//! Drover configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main drover configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Automation endpoint descriptors; one worker is started per entry
    pub endpoints: Vec<EndpointConfig>,

    /// Dispatch loop timing and retry knobs
    pub dispatch: DispatchConfig,

    /// Device bridge configuration
    pub bridge: BridgeConfig,

    /// Automation collaborator configuration
    pub automation: AutomationConfig,

    /// Task store configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(eyre::eyre!("No automation endpoints configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.is_empty() {
                return Err(eyre::eyre!("Endpoint with empty id"));
            }
            if endpoint.url.is_empty() {
                return Err(eyre::eyre!("Endpoint '{}' has an empty url", endpoint.id));
            }
            if !seen.insert(&endpoint.id) {
                return Err(eyre::eyre!("Duplicate endpoint id '{}'", endpoint.id));
            }
        }

        if self.dispatch.max_attempts == 0 {
            return Err(eyre::eyre!("dispatch.max-attempts must be at least 1"));
        }

        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .drover.yml
        let local_config = PathBuf::from(".drover.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/drover/drover.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("drover").join("drover.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Static descriptor of one remote automation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique endpoint id, used in busy-set tracking and health records
    pub id: String,

    /// Base address of the automation session endpoint
    pub url: String,

    /// Device this endpoint is meant to drive; falls back to any free
    /// verified device when unavailable
    #[serde(rename = "intended-device-id", default)]
    pub intended_device_id: Option<String>,

    /// Named auxiliary port assignments forwarded into the session
    #[serde(rename = "aux-ports", default)]
    pub aux_ports: BTreeMap<String, u16>,
}

/// Dispatch loop timing and retry knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Queue poll timeout; bounds how long a stop signal can go unnoticed
    #[serde(rename = "queue-poll-ms")]
    pub queue_poll_ms: u64,

    /// Allocation retries per cycle after the first attempt
    #[serde(rename = "alloc-retries")]
    pub alloc_retries: u32,

    /// Delay between allocation attempts
    #[serde(rename = "alloc-retry-delay-ms")]
    pub alloc_retry_delay_ms: u64,

    /// Worker pause after requeueing a task it could not get resources for
    #[serde(rename = "requeue-delay-ms")]
    pub requeue_delay_ms: u64,

    /// Cooldown before a failed task is requeued
    #[serde(rename = "retry-cooldown-ms")]
    pub retry_cooldown_ms: u64,

    /// Execution attempts before a task is abandoned
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_poll_ms: 1_000,
            alloc_retries: 2,
            alloc_retry_delay_ms: 5_000,
            requeue_delay_ms: 10_000,
            retry_cooldown_ms: 30_000,
            max_attempts: 3,
        }
    }
}

impl DispatchConfig {
    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn alloc_retry_delay(&self) -> Duration {
        Duration::from_millis(self.alloc_retry_delay_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }
}

/// Device bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path to the device bridge binary
    #[serde(rename = "adb-path")]
    pub adb_path: String,

    /// Timeout for single bridge commands
    #[serde(rename = "command-timeout-ms")]
    pub command_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            command_timeout_ms: 3_000,
        }
    }
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Automation collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// HTTP timeout for a single automation call; search-and-scroll runs
    /// can take tens of seconds
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 180_000,
        }
    }
}

impl AutomationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Task store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite task database
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = dirs::data_dir()
            .map(|d| d.join("drover"))
            .unwrap_or_else(|| PathBuf::from(".drover"))
            .join("tasks.db");

        Self { db_path }
    }
}
