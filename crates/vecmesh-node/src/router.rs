//! Put/get dispatch: rank candidate nodes by similarity, then direct the
//! operation.
//!
//! Three rankings exist. `rank_random` shuffles (the first-insert fallback
//! that triggers namespace auto-creation somewhere); `rank_fast` fetches
//! each candidate's manager vector once; `rank_accurate` asks each
//! candidate for its nearest *centroid* vector relative to the query -
//! more calls, better placement.

use futures::future::join_all;
use rand::seq::SliceRandom;
use tracing::debug;
use vecmesh_core::search::{knn, Metric};
use vecmesh_core::{Addr, DataPoint};

use crate::rpc::NodeClient;

/// How to order candidate nodes for a put/get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Uniform shuffle; no network calls.
    Random,
    /// Rank by manager-level vectors, one fetch per candidate.
    Fast,
    /// Rank by centroid-level vectors relative to the query.
    Accurate,
}

/// Uniform shuffle of the candidates.
pub fn rank_random(addrs: &[Addr]) -> Vec<Addr> {
    let mut shuffled = addrs.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    shuffled
}

/// Fetches one vector per candidate in parallel and ranks the candidates by
/// similarity to `target`. Candidates that fail to answer (or answer with
/// nothing) drop out of the ranking.
async fn rank_by<F, Fut>(addrs: &[Addr], target: &[f64], metric: Metric, fetch: F) -> Vec<Addr>
where
    F: Fn(Addr) -> Fut,
    Fut: std::future::Future<Output = Option<(Addr, Vec<f64>)>>,
{
    let fetched: Vec<(Addr, Vec<f64>)> = join_all(addrs.iter().cloned().map(fetch))
        .await
        .into_iter()
        .flatten()
        .collect();
    let ranked = knn(
        target,
        fetched.iter().map(|(_, v)| v.as_slice()),
        fetched.len(),
        metric,
    );
    ranked
        .into_iter()
        .map(|i| fetched[i].0.clone())
        .collect()
}

/// Ranks candidates by their manager vectors (one cheap call each).
pub async fn rank_fast(addrs: &[Addr], namespace: &str, target: &[f64], metric: Metric) -> Vec<Addr> {
    rank_by(addrs, target, metric, |addr| {
        let client = NodeClient::to(&addr, namespace);
        async move {
            match client.vec().await {
                Ok(vec) if !vec.is_empty() => Some((addr, vec)),
                _ => None,
            }
        }
    })
    .await
}

/// Ranks candidates by the vector of their centroid nearest to `target`
/// (one expensive call each).
pub async fn rank_accurate(
    addrs: &[Addr],
    namespace: &str,
    target: &[f64],
    metric: Metric,
) -> Vec<Addr> {
    rank_by(addrs, target, metric, |addr| {
        let client = NodeClient::to(&addr, namespace);
        let target = target.to_vec();
        async move {
            match client.nearest_centroid_vec(&target).await {
                Ok(Some(vec)) => Some((addr, vec)),
                _ => None,
            }
        }
    })
    .await
}

/// Arguments for [`put_data_point`].
#[derive(Debug, Clone)]
pub struct PutArgs {
    pub addrs: Vec<Addr>,
    pub namespace: String,
    pub dp: DataPoint,
    pub metric: Metric,
}

/// Tries candidates in rank order; the insert succeeds on the first
/// acceptance. When every ranked candidate fails - the namespace may not
/// exist anywhere yet - falls through to random order so some node
/// auto-creates it.
pub async fn put_data_point(args: PutArgs, mode: RouteMode) -> bool {
    let ranked = match mode {
        RouteMode::Random => rank_random(&args.addrs),
        RouteMode::Fast => rank_fast(&args.addrs, &args.namespace, &args.dp.vec, args.metric).await,
        RouteMode::Accurate => {
            rank_accurate(&args.addrs, &args.namespace, &args.dp.vec, args.metric).await
        }
    };
    if try_put(&ranked, &args.namespace, &args.dp).await {
        return true;
    }
    if mode == RouteMode::Random {
        return false;
    }
    debug!(namespace = %args.namespace, "ranked put failed, falling back to random order");
    try_put(&rank_random(&args.addrs), &args.namespace, &args.dp).await
}

async fn try_put(ranked: &[Addr], namespace: &str, dp: &DataPoint) -> bool {
    for addr in ranked {
        let accepted = NodeClient::to(addr, namespace)
            .add_data_point(dp.clone())
            .await
            .unwrap_or(false);
        if accepted {
            return true;
        }
    }
    false
}

/// Arguments for [`get_data_points`].
#[derive(Debug, Clone)]
pub struct GetArgs {
    pub addrs: Vec<Addr>,
    pub namespace: String,
    pub query_vec: Vec<f64>,
    pub n: usize,
    pub drain: bool,
    pub metric: Metric,
}

/// Walks the ranked candidates, requesting `n - collected` datapoints from
/// each until the budget is met. `drain` is forwarded to the nodes.
pub async fn get_data_points(args: GetArgs, mode: RouteMode) -> Vec<DataPoint> {
    let ranked = match mode {
        RouteMode::Random => rank_random(&args.addrs),
        RouteMode::Fast => rank_fast(&args.addrs, &args.namespace, &args.query_vec, args.metric).await,
        RouteMode::Accurate => {
            rank_accurate(&args.addrs, &args.namespace, &args.query_vec, args.metric).await
        }
    };

    let mut collected = Vec::with_capacity(args.n);
    for addr in ranked {
        if collected.len() >= args.n {
            break;
        }
        let found = NodeClient::to(&addr, &args.namespace)
            .knn_lookup(&args.query_vec, args.n - collected.len(), args.drain)
            .await
            .unwrap_or_default();
        collected.extend(found);
    }
    collected
}

// =============================================================================
// Tests
// =============================================================================
