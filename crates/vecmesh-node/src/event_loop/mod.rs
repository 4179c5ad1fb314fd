//! The per-node periodic maintenance scheduler.
//!
//! Each iteration sleeps `timeout_loop`, bumps a counter (wrapping at
//! 1000), and walks the tasks in a fixed order, sleeping `timeout_step`
//! before each so a stop can preempt the tail of an iteration. The order is
//! not arbitrary - merge can undo a split from the same tick and internal
//! redistribution can re-concentrate after a merge - so it stays
//! `meta, expire, mem_trim, merge, split, distribute_internal,
//! distribute_fast, distribute_accurate, load_balancing`.
//!
//! Tasks that act on *other* nodes run only on the elected arbiter; when
//! consensus is broken the loop tries once to force a new election and
//! otherwise skips the task for this iteration. Local-only tasks always run
//! when their skip counter permits.

pub mod config;
pub mod tasks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::time::sleep;
use tracing::warn;

pub use config::{EventLoopConfig, TaskSkipConfig};

use crate::arbiter::ArbiterClient;
use crate::meta::MetaSnapshot;

/// Bounded retry count for forcing a new arbiter election.
const FORCE_ARBITER_RETRIES: u32 = 100;

/// The fixed task order. Interference between tasks makes this part of the
/// contract; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Meta,
    Expire,
    MemTrim,
    MergeCentroids,
    SplitCentroids,
    DistributeInternal,
    DistributeFast,
    DistributeAccurate,
    LoadBalancing,
}

const TASK_ORDER: [Task; 9] = [
    Task::Meta,
    Task::Expire,
    Task::MemTrim,
    Task::MergeCentroids,
    Task::SplitCentroids,
    Task::DistributeInternal,
    Task::DistributeFast,
    Task::DistributeAccurate,
    Task::LoadBalancing,
];

impl Task {
    fn skip(&self, cfg: &EventLoopConfig) -> u32 {
        match self {
            Task::Meta => cfg.task_skip.meta,
            Task::Expire => cfg.task_skip.expire,
            Task::MemTrim => cfg.task_skip.mem_trim,
            Task::MergeCentroids => cfg.task_skip.merge_centroids,
            Task::SplitCentroids => cfg.task_skip.split_centroids,
            Task::DistributeInternal => cfg.task_skip.distribute_internal,
            Task::DistributeFast => cfg.task_skip.distribute_fast,
            Task::DistributeAccurate => cfg.task_skip.distribute_accurate,
            Task::LoadBalancing => cfg.task_skip.load_balancing,
        }
    }

    /// True for tasks that act on other nodes and therefore only run on
    /// the elected arbiter. Split/merge touch only local centroids and
    /// stay ungated.
    fn arbiter_gated(&self) -> bool {
        matches!(
            self,
            Task::DistributeFast | Task::DistributeAccurate | Task::LoadBalancing
        )
    }

    async fn run(&self, cfg: &EventLoopConfig, snapshot: &RwLock<MetaSnapshot>) {
        match self {
            Task::Meta => tasks::meta(cfg, snapshot).await,
            Task::Expire => tasks::expire(cfg).await,
            Task::MemTrim => tasks::mem_trim(cfg).await,
            Task::MergeCentroids => tasks::merge_centroids(cfg).await,
            Task::SplitCentroids => tasks::split_centroids(cfg).await,
            Task::DistributeInternal => tasks::distribute_internal(cfg).await,
            Task::DistributeFast => tasks::distribute_fast(cfg).await,
            Task::DistributeAccurate => tasks::distribute_accurate(cfg).await,
            Task::LoadBalancing => tasks::load_balancing(cfg).await,
        }
    }
}

/// Consults the arbiter; on broken consensus, tries to force a new election
/// once (bounded retries inside) and re-checks. Returns whether the local
/// node may run arbiter-gated tasks this iteration.
async fn arbiter_allows(cfg: &EventLoopConfig, arbiter: &dyn ArbiterClient) -> bool {
    let elected = match arbiter.arbiter().await {
        Ok(addr) => Some(addr),
        Err(_) => {
            if arbiter.try_force_new_arbiter(FORCE_ARBITER_RETRIES).await {
                arbiter.arbiter().await.ok()
            } else {
                None
            }
        }
    };
    match elected {
        Some(addr) => addr == cfg.local_addr,
        None => {
            warn!("arbiter consensus unavailable; skipping cross-node task this iteration");
            false
        }
    }
}

/// Handle to a running event loop. Stopping is cooperative: queued tasks
/// short-circuit at the next step sleep; nothing is forcibly aborted.
#[derive(Clone)]
pub struct EventLoopHandle {
    stopped: Arc<AtomicBool>,
    snapshot: Arc<RwLock<MetaSnapshot>>,
}

impl EventLoopHandle {
    /// Signals the loop to stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// The latest metadata snapshot published by the meta task.
    pub fn meta_snapshot(&self) -> MetaSnapshot {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Spawns the event loop onto the current runtime and returns its handle.
/// Skip counters are clamped to `[1, 1000]` here.
pub fn start(mut cfg: EventLoopConfig, arbiter: Arc<dyn ArbiterClient>) -> EventLoopHandle {
    cfg.task_skip.clamp(1, 1000);
    let stopped = Arc::new(AtomicBool::new(false));
    let snapshot = Arc::new(RwLock::new(MetaSnapshot::default()));
    let handle = EventLoopHandle {
        stopped: Arc::clone(&stopped),
        snapshot: Arc::clone(&snapshot),
    };
    tokio::spawn(run(cfg, arbiter, stopped, snapshot));
    handle
}

async fn run(
    cfg: EventLoopConfig,
    arbiter: Arc<dyn ArbiterClient>,
    stopped: Arc<AtomicBool>,
    snapshot: Arc<RwLock<MetaSnapshot>>,
) {
    let mut iteration: u32 = 0;
    'outer: loop {
        sleep(cfg.timeout_loop).await;
        if stopped.load(Ordering::Relaxed) {
            break;
        }
        iteration += 1;
        if iteration > 1000 {
            iteration = 0;
        }

        for task in TASK_ORDER {
            sleep(cfg.timeout_step).await;
            if stopped.load(Ordering::Relaxed) {
                break 'outer;
            }
            if iteration % task.skip(&cfg) != 0 {
                continue;
            }
            if task.arbiter_gated() && !arbiter_allows(&cfg, arbiter.as_ref()).await {
                continue;
            }
            task.run(&cfg, &snapshot).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
