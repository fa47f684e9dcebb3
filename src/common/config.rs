//! Configuration for the minigfs master

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Sync policy for the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSyncPolicy {
    /// fsync after every appended entry
    #[default]
    Always,
    /// Flush to the OS after every entry, fsync left to the kernel
    Interval,
    /// No explicit flush (tests only)
    Never,
}

/// Master configuration
///
/// Timing constants observe the safety ordering from the lease design:
/// lease duration < heartbeat timeout < reconciliation period, so a
/// crashed primary's lease expires before its chunks are re-replicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Path of the durable operation log
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Target replica count per chunk
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Virtual positions per storage node on the hash ring
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,

    /// Expected heartbeat interval (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Consecutive missed intervals before a suspect node is declared dead
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,

    /// Lease duration (seconds)
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// Replication reconciliation period (seconds)
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Garbage collection sweep period (seconds)
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    /// Grace period before an orphaned chunk is collected (seconds)
    #[serde(default = "default_gc_grace")]
    pub gc_grace_secs: u64,

    /// Destinations tried before a chunk is parked as unresolved
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    /// Concurrent replication task bound
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Timeout for a single replication command (seconds)
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Operation log sync policy
    #[serde(default)]
    pub log_sync: LogSyncPolicy,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:5000".parse().unwrap()
}
fn default_log_path() -> PathBuf {
    PathBuf::from("./master-data/oplog")
}
fn default_replicas() -> usize {
    3
}
fn default_virtual_nodes() -> u32 {
    20
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_miss_threshold() -> u32 {
    3
}
fn default_lease_duration() -> u64 {
    15
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_gc_interval() -> u64 {
    300
}
fn default_gc_grace() -> u64 {
    600
}
fn default_max_task_retries() -> u32 {
    3
}
fn default_max_concurrent_tasks() -> usize {
    8
}
fn default_task_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MasterConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; deserializing an empty
        // document yields exactly this value
        Self {
            bind_addr: default_bind_addr(),
            log_path: default_log_path(),
            replicas: default_replicas(),
            virtual_nodes: default_virtual_nodes(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            miss_threshold: default_miss_threshold(),
            lease_duration_secs: default_lease_duration(),
            reconcile_interval_secs: default_reconcile_interval(),
            gc_interval_secs: default_gc_interval(),
            gc_grace_secs: default_gc_grace(),
            max_task_retries: default_max_task_retries(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_secs: default_task_timeout(),
            log_sync: LogSyncPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl MasterConfig {
    /// Load configuration from `minigfs.toml` (if present) layered with
    /// `MINIGFS_`-prefixed environment variables.
    pub fn load() -> crate::Result<Self> {
        Self::load_from("minigfs")
    }

    /// Load from a named config file base (without extension)
    pub fn load_from(name: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::with_prefix("MINIGFS").separator("__"))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Wall-clock span after which a silent node is declared dead
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * (1 + self.miss_threshold as u64))
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Check the lease < heartbeat-timeout < reconciliation ordering
    pub fn validate(&self) -> crate::Result<()> {
        if self.replicas == 0 {
            return Err(crate::Error::InvalidConfig(
                "replicas must be at least 1".into(),
            ));
        }
        if self.virtual_nodes == 0 {
            return Err(crate::Error::InvalidConfig(
                "virtual_nodes must be at least 1".into(),
            ));
        }
        if self.lease_duration() >= self.heartbeat_timeout() {
            return Err(crate::Error::InvalidConfig(format!(
                "lease duration ({}s) must be shorter than the heartbeat timeout ({}s)",
                self.lease_duration_secs,
                self.heartbeat_timeout().as_secs()
            )));
        }
        if self.heartbeat_timeout() >= self.reconcile_interval() {
            return Err(crate::Error::InvalidConfig(format!(
                "heartbeat timeout ({}s) must be shorter than the reconciliation period ({}s)",
                self.heartbeat_timeout().as_secs(),
                self.reconcile_interval_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MasterConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_timing_ordering_enforced() {
        let config = MasterConfig {
            lease_duration_secs: 120,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MasterConfig {
            reconcile_interval_secs: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_timeout() {
        let config = MasterConfig::default();
        // interval 10s, threshold 3 -> 40s
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(40));
    }
}
