//! Event-loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vecmesh_core::Addr;

/// Per-task skip counters. A task runs on iterations where
/// `iteration % skip == 0`: 1 means every iteration, 2 every second one,
/// and so on. The iteration counter wraps at 1000, so 1000 disables a task.
/// Values are clamped to `[1, 1000]` when the loop starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSkipConfig {
    /// Metadata polling for monitoring and the load-balancing decision.
    pub meta: u32,
    /// Datapoint expiration across local namespaces. Moving datapoints
    /// around often expires them as a side effect, but not reliably.
    pub expire: u32,
    /// Memory trimming across local namespaces.
    pub mem_trim: u32,
    /// Merging of undersized centroids.
    pub merge_centroids: u32,
    /// Splitting of oversized centroids.
    pub split_centroids: u32,
    /// Intra-node redistribution (node-level data integrity).
    pub distribute_internal: u32,
    /// Hasty cross-node redistribution, node granularity.
    pub distribute_fast: u32,
    /// Accurate cross-node redistribution, centroid granularity.
    pub distribute_accurate: u32,
    /// Whole-centroid load balancing, pulling into the local node.
    pub load_balancing: u32,
}

impl Default for TaskSkipConfig {
    fn default() -> Self {
        Self {
            meta: 1,
            expire: 20,
            mem_trim: 10,
            merge_centroids: 3,
            split_centroids: 3,
            distribute_internal: 3,
            distribute_fast: 4,
            distribute_accurate: 8,
            load_balancing: 7,
        }
    }
}

impl TaskSkipConfig {
    /// Clamps every counter into `[min, max]`. Zero would divide by zero in
    /// the modulus check, so the loop clamps to `[1, 1000]` on start.
    pub fn clamp(&mut self, min: u32, max: u32) {
        for skip in [
            &mut self.meta,
            &mut self.expire,
            &mut self.mem_trim,
            &mut self.merge_centroids,
            &mut self.split_centroids,
            &mut self.distribute_internal,
            &mut self.distribute_fast,
            &mut self.distribute_accurate,
            &mut self.load_balancing,
        ] {
            *skip = (*skip).clamp(min, max);
        }
    }
}

/// Full configuration for one node's event loop.
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// This node's address.
    pub local_addr: Addr,
    /// All addresses in the cluster, the local one included.
    pub all_addrs: Vec<Addr>,

    /// Sleep before each loop iteration.
    pub timeout_loop: Duration,
    /// Sleep before each task, so a stop can preempt the tail of an
    /// iteration.
    pub timeout_step: Duration,

    pub task_skip: TaskSkipConfig,

    /// Datapoints per fast cross-node distribution.
    pub distribute_fast_n: usize,
    /// Datapoints per accurate cross-node distribution.
    pub distribute_accurate_n: usize,
    /// Datapoints per intra-node redistribution.
    pub distribute_internal_n: usize,

    /// Centroids whose datapoint count falls strictly inside this range
    /// are split. Both bounds are exclusive.
    pub split_range: (i64, i64),
    /// Centroids whose datapoint count falls strictly inside this range
    /// are merged. Both bounds are exclusive; a lower bound of -1 makes
    /// zero-datapoint centroids valid merge targets.
    pub merge_range: (i64, i64),

    /// Pull metadata only from the local node instead of the whole cluster.
    pub log_local_only: bool,
}

impl EventLoopConfig {
    /// A configuration with the stock cadence for the given membership.
    pub fn new(local_addr: Addr, all_addrs: Vec<Addr>) -> Self {
        Self {
            local_addr,
            all_addrs,
            timeout_loop: Duration::from_secs(5),
            timeout_step: Duration::from_secs(5),
            task_skip: TaskSkipConfig::default(),
            distribute_fast_n: 100,
            distribute_accurate_n: 50,
            distribute_internal_n: 200,
            split_range: (1000, 1_000_000),
            merge_range: (-1, 100),
            log_local_only: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
