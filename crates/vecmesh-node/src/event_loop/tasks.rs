//! The individual maintenance tasks the event loop schedules.
//!
//! Each task is an async function over the loop configuration so tests can
//! drive a single task deterministically, without the scheduler or its
//! timing. Tasks recover from per-node errors by skipping that node; they
//! never abort the iteration.

use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::join_all;
use tracing::{debug, info, warn};
use vecmesh_core::Addr;

use super::EventLoopConfig;
use crate::error::ClientError;
use crate::meta::MetaSnapshot;
use crate::rpc::NodeClient;

/// Namespaces present on the local node.
async fn local_namespaces(cfg: &EventLoopConfig) -> Vec<String> {
    NodeClient::to(&cfg.local_addr, "")
        .namespaces()
        .await
        .unwrap_or_default()
}

/// Groups cluster addresses by the namespaces they carry, so data only ever
/// moves between equal namespaces.
async fn namespace_table(cfg: &EventLoopConfig) -> HashMap<String, Vec<Addr>> {
    let mut table: HashMap<String, Vec<Addr>> = HashMap::new();
    for addr in &cfg.all_addrs {
        let namespaces = NodeClient::to(addr, "").namespaces().await.unwrap_or_default();
        for ns in namespaces {
            table.entry(ns).or_default().push(addr.clone());
        }
    }
    table
}

/// Fetches per-node datapoint counts for one namespace, in parallel.
/// A missing namespace counts as zero; unreachable nodes drop out.
async fn fetch_len_dps(addrs: &[Addr], namespace: &str) -> HashMap<Addr, usize> {
    let fetches = addrs.iter().map(|addr| {
        let client = NodeClient::to(addr, namespace);
        let addr = addr.clone();
        async move {
            match client.len_dp().await {
                Ok(len) => Some((addr, len)),
                Err(ClientError::NamespaceMissing { .. }) => Some((addr, 0)),
                Err(_) => None,
            }
        }
    });
    join_all(fetches).await.into_iter().flatten().collect()
}

/// Polls per-node metadata into the shared snapshot and logs the totals.
pub async fn meta(cfg: &EventLoopConfig, snapshot: &RwLock<MetaSnapshot>) {
    let pull_from: Vec<Addr> = if cfg.log_local_only {
        vec![cfg.local_addr.clone()]
    } else {
        cfg.all_addrs.clone()
    };

    let mut items = HashMap::new();
    for addr in pull_from {
        match NodeClient::to(&addr, "").meta().await {
            Ok(meta) => {
                info!(
                    node = %addr,
                    namespaces = meta.data_points.len(),
                    centroids = meta.total_centroids(),
                    dps = meta.total_dps(),
                    "meta"
                );
                items.insert(addr, meta);
            }
            Err(err) => debug!(node = %addr, error = %err, "meta poll failed"),
        }
    }

    if let Ok(mut slot) = snapshot.write() {
        *slot = MetaSnapshot { items };
    }
}

/// Triggers datapoint expiration for every local namespace.
pub async fn expire(cfg: &EventLoopConfig) {
    for ns in local_namespaces(cfg).await {
        debug!(namespace = %ns, "expire");
        let _ = NodeClient::to(&cfg.local_addr, &ns).expire().await;
    }
}

/// Triggers memory trimming for every local namespace.
pub async fn mem_trim(cfg: &EventLoopConfig) {
    for ns in local_namespaces(cfg).await {
        debug!(namespace = %ns, "memtrim");
        let _ = NodeClient::to(&cfg.local_addr, &ns).mem_trim().await;
    }
}

/// Merges undersized centroids for every local namespace.
pub async fn merge_centroids(cfg: &EventLoopConfig) {
    for ns in local_namespaces(cfg).await {
        debug!(namespace = %ns, "merging");
        let _ = NodeClient::to(&cfg.local_addr, &ns)
            .merge_centroids(cfg.merge_range.0, cfg.merge_range.1)
            .await;
    }
}

/// Splits oversized centroids for every local namespace.
pub async fn split_centroids(cfg: &EventLoopConfig) {
    for ns in local_namespaces(cfg).await {
        debug!(namespace = %ns, "splitting");
        let _ = NodeClient::to(&cfg.local_addr, &ns)
            .split_centroids(cfg.split_range.0, cfg.split_range.1)
            .await;
    }
}

/// Redistributes datapoints between local centroids.
pub async fn distribute_internal(cfg: &EventLoopConfig) {
    for ns in local_namespaces(cfg).await {
        debug!(namespace = %ns, "distribute internal");
        let _ = NodeClient::to(&cfg.local_addr, &ns)
            .distribute_data_points_internal(cfg.distribute_internal_n)
            .await;
    }
}

/// Pushes worst-fit datapoints to best-fit nodes, node granularity.
pub async fn distribute_fast(cfg: &EventLoopConfig) {
    let table = namespace_table(cfg).await;
    for ns in local_namespaces(cfg).await {
        let Some(addrs) = table.get(&ns) else { continue };
        debug!(namespace = %ns, "distribute fast");
        let _ = NodeClient::to(&cfg.local_addr, &ns)
            .distribute_data_points_fast(addrs, cfg.distribute_fast_n)
            .await;
    }
}

/// Pushes worst-fit datapoints to best-fit nodes, centroid granularity.
pub async fn distribute_accurate(cfg: &EventLoopConfig) {
    let table = namespace_table(cfg).await;
    for ns in local_namespaces(cfg).await {
        let Some(addrs) = table.get(&ns) else { continue };
        debug!(namespace = %ns, "distribute accurate");
        let _ = NodeClient::to(&cfg.local_addr, &ns)
            .distribute_data_points_accurate(addrs, cfg.distribute_accurate_n)
            .await;
    }
}

/// Pulls whole centroids into the local node when it holds a below-average
/// share of a namespace. The census covers the *holders* of the namespace
/// (nodes that never touched it stay out of the mean); a holder whose slot
/// raced away counts as zero. The margin keeps nodes from shuffling data
/// forever, and the transfer is damped because stealing moves whole
/// centroids and tends to overshoot.
pub async fn load_balancing(cfg: &EventLoopConfig) {
    let table = namespace_table(cfg).await;
    for (ns, holders) in &table {
        let lens = fetch_len_dps(holders, ns).await;
        if lens.is_empty() {
            continue;
        }

        let total: usize = lens.values().sum();
        let holder_count = lens.len();
        let mean = total / holder_count;
        let margin = (mean as f64 * 0.4) as usize;
        let mut local_len = lens.get(&cfg.local_addr).copied().unwrap_or(0);
        let client = NodeClient::to(&cfg.local_addr, ns);

        for (other, &other_len) in &lens {
            // Data flows only toward the local node, and only while the
            // local node sits below the margin band.
            if *other == cfg.local_addr || local_len > mean.saturating_sub(margin) {
                continue;
            }

            let transfer = (mean - local_len) / holder_count / 3;
            if transfer == 0 {
                continue;
            }

            // Leave the donor above the band - unless it is the sole holder
            // of the namespace.
            if other_len.saturating_sub(transfer) < mean + margin && holder_count != 1 {
                continue;
            }

            match client.steal_centroids(other, transfer as u64).await {
                Ok((moved, ok)) => {
                    info!(
                        namespace = %ns,
                        donor = %other,
                        want = transfer,
                        got = moved,
                        ok,
                        "load balancing"
                    );
                    // Track the transfer so later donors in this sweep see
                    // the updated projection instead of oscillating.
                    local_len += moved as usize;
                }
                Err(err) => warn!(namespace = %ns, donor = %other, error = %err, "steal failed"),
            }
        }
    }
}
