use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskGridError};

/// Coordinator tunables, deserialized from coordinator.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Port the HTTP server binds on 0.0.0.0.
    pub port: u16,
    /// Seconds without a heartbeat before a connection is considered dead.
    pub connection_timeout_secs: f64,
    /// Interval of the dead-connection sweep.
    pub cleanup_interval_secs: f64,
    /// Interval of the status log line.
    pub status_interval_secs: f64,
    /// Per-task cap on FAILED/RAW returns before the task is abandoned.
    /// Unset = re-queue forever.
    pub max_task_attempts: Option<u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: crate::api::DEFAULT_PORT,
            connection_timeout_secs: 10.0,
            cleanup_interval_secs: 3.0,
            status_interval_secs: 5.0,
            max_task_attempts: None,
        }
    }
}

/// Worker tunables, deserialized from worker.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Coordinator port probed during discovery.
    pub port: u16,
    /// Heartbeat cadence.
    pub heartbeat_interval_secs: f64,
    /// Per-request timeout on a heartbeat.
    pub heartbeat_timeout_secs: f64,
    /// Consecutive heartbeat failures before the worker gives up the job.
    pub heartbeat_retry_attempts: u32,
    /// Per-host timeout of a discovery probe.
    pub discovery_probe_timeout_ms: u64,
    /// Pause between full subnet scans.
    pub discovery_rescan_secs: f64,
    /// Tasks requested per fetch. Executed sequentially.
    pub max_concurrent_tasks: usize,
    /// Consecutive task-fetch failures before the worker exits.
    pub fetch_retry_attempts: u32,
    /// Back-off after a retriable fetch failure or a 503.
    pub fetch_backoff_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            port: crate::api::DEFAULT_PORT,
            heartbeat_interval_secs: 2.0,
            heartbeat_timeout_secs: 1.0,
            heartbeat_retry_attempts: 5,
            discovery_probe_timeout_ms: 75,
            discovery_rescan_secs: 1.0,
            max_concurrent_tasks: 1,
            fetch_retry_attempts: 5,
            fetch_backoff_secs: crate::api::RETRY_AFTER_SECS as f64,
        }
    }
}

/// Load a TOML config file. A missing file yields the defaults; a file that
/// exists but does not parse refuses start-up.
pub fn load_config<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        TaskGridError::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}
