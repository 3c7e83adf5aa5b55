//! Configuration for the coordination plane
//!
//! Loaded from TOML; every field has a serde default so a minimal file only
//! needs the instance list. Binaries layer CLI/env overrides on top.

use crate::error::{Error, Result};
use crate::topology::InstanceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Managed instances. The first entry is the bootstrap primary.
    #[serde(default)]
    pub instances: Vec<InstanceDescriptor>,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub seer: SeerConfig,
    #[serde(default)]
    pub container: ContainerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Account the followers use to stream from the primary
    #[serde(default = "default_replication_user")]
    pub replication_user: String,
    #[serde(default = "default_replication_password")]
    pub replication_password: String,
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_password() -> String {
    "rootpass".to_string()
}

fn default_db_name() -> String {
    "testdb".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_replication_user() -> String {
    "replicator".to_string()
}

fn default_replication_password() -> String {
    "replicator_password".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: default_db_user(),
            password: default_db_password(),
            database: default_db_name(),
            connect_timeout_ms: default_connect_timeout(),
            replication_user: default_replication_user(),
            replication_password: default_replication_password(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
    /// Timestamp shard endpoints, e.g. http://timestamp-1:8000
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_allocator_try_timeout")]
    pub try_timeout_ms: u64,
}

fn default_allocator_try_timeout() -> u64 {
    2000
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            try_timeout_ms: default_allocator_try_timeout(),
        }
    }
}

impl AllocatorConfig {
    pub fn try_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.try_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    #[serde(default = "default_sampler_period")]
    pub period_secs: u64,
    /// Latency above this marks the instance unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold_ms: f64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_sampler_period() -> u64 {
    5
}

fn default_unhealthy_threshold() -> f64 {
    5000.0
}

fn default_probe_timeout() -> u64 {
    5000
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_secs: default_sampler_period(),
            unhealthy_threshold_ms: default_unhealthy_threshold(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl SamplerConfig {
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.period_secs)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriteConfig {
    /// How long a STRONG write waits for its quorum to catch up
    #[serde(default = "default_catchup_timeout")]
    pub catchup_timeout_ms: u64,
    #[serde(default = "default_catchup_poll")]
    pub catchup_poll_ms: u64,
}

fn default_catchup_timeout() -> u64 {
    5000
}

fn default_catchup_poll() -> u64 {
    50
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            catchup_timeout_ms: default_catchup_timeout(),
            catchup_poll_ms: default_catchup_poll(),
        }
    }
}

impl WriteConfig {
    pub fn catchup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.catchup_timeout_ms)
    }

    pub fn catchup_poll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.catchup_poll_ms)
    }
}

/// Leader election scoring weights
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeerConfig {
    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,
    #[serde(default = "default_stability_weight")]
    pub stability_weight: f64,
    #[serde(default = "default_lag_weight")]
    pub lag_weight: f64,
    /// Each historical crash counts as this many seconds of downtime
    #[serde(default = "default_crash_penalty")]
    pub crash_penalty_secs: f64,
    #[serde(default = "default_election_attempts")]
    pub election_attempts: u32,
    #[serde(default = "default_election_backoff")]
    pub election_backoff_ms: u64,
}

fn default_latency_weight() -> f64 {
    0.4
}

fn default_stability_weight() -> f64 {
    0.4
}

fn default_lag_weight() -> f64 {
    0.2
}

fn default_crash_penalty() -> f64 {
    100.0
}

fn default_election_attempts() -> u32 {
    3
}

fn default_election_backoff() -> u64 {
    500
}

impl Default for SeerConfig {
    fn default() -> Self {
        Self {
            latency_weight: default_latency_weight(),
            stability_weight: default_stability_weight(),
            lag_weight: default_lag_weight(),
            crash_penalty_secs: default_crash_penalty(),
            election_attempts: default_election_attempts(),
            election_backoff_ms: default_election_backoff(),
        }
    }
}

impl SeerConfig {
    pub fn election_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.election_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerConfig {
    /// Container control binary used for stop/start/exec
    #[serde(default = "default_container_binary")]
    pub binary: String,
    #[serde(default = "default_stop_poll")]
    pub stop_poll_secs: u64,
    #[serde(default = "default_stop_wait")]
    pub stop_wait_secs: u64,
    /// How long to wait for a restarted engine to accept connections
    #[serde(default = "default_ready_wait")]
    pub ready_wait_secs: u64,
}

fn default_container_binary() -> String {
    "docker".to_string()
}

fn default_stop_poll() -> u64 {
    1
}

fn default_stop_wait() -> u64 {
    120
}

fn default_ready_wait() -> u64 {
    30
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            binary: default_container_binary(),
            stop_poll_secs: default_stop_poll(),
            stop_wait_secs: default_stop_wait(),
            ready_wait_secs: default_ready_wait(),
        }
    }
}

impl Config {
    /// Load from a TOML file, writing defaults when the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if !seen.insert(&instance.id) {
                return Err(Error::Config(format!(
                    "duplicate instance id: {}",
                    instance.id
                )));
            }
        }
        let weight_sum = self.seer.latency_weight + self.seer.stability_weight + self.seer.lag_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "seer weights must sum to 1.0, got {}",
                weight_sum
            )));
        }
        Ok(())
    }

    /// Split the instance list into (bootstrap primary, followers)
    pub fn bootstrap_topology(&self) -> Result<(InstanceDescriptor, Vec<InstanceDescriptor>)> {
        let mut instances = self.instances.iter();
        let primary = instances
            .next()
            .cloned()
            .ok_or_else(|| Error::Config("no instances configured".to_string()))?;
        Ok((primary, instances.cloned().collect()))
    }

    pub fn instance(&self, id: &str) -> Option<&InstanceDescriptor> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// 1-based server identifier for replication, derived from config order
    pub fn server_id(&self, id: &str) -> u32 {
        self.instances
            .iter()
            .position(|i| i.id == id)
            .map(|p| p as u32 + 1)
            .unwrap_or(100)
    }
}
