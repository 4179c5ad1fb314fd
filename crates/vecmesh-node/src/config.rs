//! Process-wide configuration.
//!
//! Priority, highest to lowest: environment variables (prefix `VECMESH__`),
//! a TOML configuration file, built-in defaults. Invalid construction is
//! fatal at startup; nothing here is re-read at runtime.
//!
//! # Environment variables
//!
//! - `VECMESH__LOCAL_RPC_ADDR=host:port`
//! - `VECMESH__ALL_RPC_ADDRS=host:port,host:port,...`
//! - `VECMESH__LOCAL_API_ADDR=host:port`
//! - `VECMESH__CM_INIT_CAPACITY=100`
//! - `VECMESH__CM_CENTROID_DP_THRESHOLD=10000`
//! - `VECMESH__EVENT_LOOP__TIMEOUT_LOOP_MS=5000`
//! - `VECMESH__EVENT_LOOP__TIMEOUT_STEP_MS=5000`

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vecmesh_core::search::Metric;
use vecmesh_core::Addr;

use crate::error::ConfigError;
use crate::event_loop::{EventLoopConfig, TaskSkipConfig};
use crate::index::{ManagerConfig, ManagerFactory};

/// Event-loop section of the configuration file. Durations are carried as
/// milliseconds so the file stays plain TOML numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopSection {
    pub timeout_loop_ms: u64,
    pub timeout_step_ms: u64,
    pub distribute_fast_n: usize,
    pub distribute_accurate_n: usize,
    pub distribute_internal_n: usize,
    /// Exclusive split range: centroids with `min < len < max` split.
    pub split_min: i64,
    pub split_max: i64,
    /// Exclusive merge range; -1 makes empty centroids valid merge targets.
    pub merge_min: i64,
    pub merge_max: i64,
    pub log_local_only: bool,
    /// Per-task skip counters. Keep last: TOML tables follow scalars.
    pub task_skip: TaskSkipConfig,
}

impl Default for EventLoopSection {
    fn default() -> Self {
        Self {
            timeout_loop_ms: 5000,
            timeout_step_ms: 5000,
            distribute_fast_n: 100,
            distribute_accurate_n: 50,
            distribute_internal_n: 200,
            split_min: 1000,
            split_max: 1_000_000,
            merge_min: -1,
            merge_max: 100,
            log_local_only: true,
            task_skip: TaskSkipConfig::default(),
        }
    }
}

/// Root configuration for one node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the RPC server binds and identifies as.
    pub local_rpc_addr: Addr,
    /// Every RPC address in the cluster; must include the local one.
    pub all_rpc_addrs: Vec<Addr>,
    /// Address the HTTP/JSON API binds.
    pub local_api_addr: Addr,

    /// The similarity metric. Cosine is the supported default; it is also
    /// what remote ranking assumes, so changing it cluster-wide is the only
    /// sane move.
    pub metric: Metric,

    /// Initial centroid-slice capacity for new managers.
    pub cm_init_capacity: usize,
    /// Datapoints per centroid before an auto-split; 0 disables.
    pub cm_centroid_dp_threshold: usize,

    /// Maintenance-loop cadence. Keep last: TOML tables follow scalars.
    pub event_loop: EventLoopSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let local_rpc_addr = Addr::new("localhost", 3500);
        Self {
            all_rpc_addrs: vec![local_rpc_addr.clone()],
            local_rpc_addr,
            local_api_addr: Addr::new("localhost", 3501),
            metric: Metric::Cosine,
            cm_init_capacity: 100,
            cm_centroid_dp_threshold: 10_000,
            event_loop: EventLoopSection::default(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration: defaults, then the file (when given and
    /// present), then environment overrides; validates the result.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)
                    .map_err(|e| ConfigError::Io(e.to_string()))?;
                config =
                    toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        fn env_parse<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
            if let Ok(raw) = std::env::var(key) {
                *target = raw
                    .parse()
                    .map_err(|_| ConfigError::Parse(format!("bad value for {key}: '{raw}'")))?;
            }
            Ok(())
        }

        env_parse("VECMESH__LOCAL_RPC_ADDR", &mut self.local_rpc_addr)?;
        env_parse("VECMESH__LOCAL_API_ADDR", &mut self.local_api_addr)?;
        env_parse("VECMESH__CM_INIT_CAPACITY", &mut self.cm_init_capacity)?;
        env_parse(
            "VECMESH__CM_CENTROID_DP_THRESHOLD",
            &mut self.cm_centroid_dp_threshold,
        )?;
        env_parse(
            "VECMESH__EVENT_LOOP__TIMEOUT_LOOP_MS",
            &mut self.event_loop.timeout_loop_ms,
        )?;
        env_parse(
            "VECMESH__EVENT_LOOP__TIMEOUT_STEP_MS",
            &mut self.event_loop.timeout_step_ms,
        )?;

        if let Ok(raw) = std::env::var("VECMESH__ALL_RPC_ADDRS") {
            let addrs: Result<Vec<Addr>, _> =
                raw.split(',').map(|s| s.trim().parse::<Addr>()).collect();
            self.all_rpc_addrs = addrs.map_err(|e| ConfigError::Parse(e.to_string()))?;
        }
        Ok(())
    }

    /// Structural checks that would otherwise fail confusingly at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.all_rpc_addrs.contains(&self.local_rpc_addr) {
            return Err(ConfigError::LocalAddrMissing {
                local: self.local_rpc_addr.to_string(),
            });
        }
        Ok(())
    }

    /// The manager recipe the node server hands out to new namespaces.
    pub fn manager_factory(&self) -> Result<ManagerFactory, ConfigError> {
        ManagerFactory::new(ManagerConfig {
            init_vec: Vec::new(),
            init_capacity: self.cm_init_capacity,
            centroid_capacity: 10,
            split_threshold: self.cm_centroid_dp_threshold,
            knn_metric: self.metric,
            kfn_metric: self.metric,
        })
    }

    /// The event-loop configuration for this node.
    pub fn event_loop_config(&self) -> EventLoopConfig {
        let el = &self.event_loop;
        EventLoopConfig {
            local_addr: self.local_rpc_addr.clone(),
            all_addrs: self.all_rpc_addrs.clone(),
            timeout_loop: Duration::from_millis(el.timeout_loop_ms),
            timeout_step: Duration::from_millis(el.timeout_step_ms),
            task_skip: el.task_skip,
            distribute_fast_n: el.distribute_fast_n,
            distribute_accurate_n: el.distribute_accurate_n,
            distribute_internal_n: el.distribute_internal_n,
            split_range: (el.split_min, el.split_max),
            merge_range: (el.merge_min, el.merge_max),
            log_local_only: el.log_local_only,
        }
    }

    /// Serializes the configuration to TOML (for `--print-config` style
    /// tooling).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
