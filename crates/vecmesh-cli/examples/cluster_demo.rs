//! Three-node in-process cluster demo.
//!
//! Boots three node servers on localhost, routes a handful of inserts
//! through the put dispatch, runs one maintenance pass, and queries back.
//!
//! ```bash
//! cargo run -p vecmesh-cli --example cluster_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use vecmesh_core::search::Metric;
use vecmesh_core::{Addr, DataPoint};
use vecmesh_node::arbiter::StaticArbiter;
use vecmesh_node::event_loop::{self, EventLoopConfig};
use vecmesh_node::router::{self, GetArgs, PutArgs, RouteMode};
use vecmesh_node::{logging, ManagerConfig, ManagerFactory, NodeClient, NodeServer};

const NAMESPACE: &str = "demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_default("info");

    let addrs: Vec<Addr> = (4540u16..4543).map(|p| Addr::new("localhost", p)).collect();

    // Boot the nodes.
    let factory = ManagerFactory::new(ManagerConfig {
        split_threshold: 50,
        ..ManagerConfig::default()
    })?;
    for addr in &addrs {
        let server = NodeServer::new(addr.clone(), factory.clone());
        let bind = ([127, 0, 0, 1], addr.port).into();
        tokio::spawn(server.serve(bind));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // One maintenance loop; the lowest address is the arbiter.
    let mut loop_cfg = EventLoopConfig::new(addrs[0].clone(), addrs.clone());
    loop_cfg.timeout_loop = Duration::from_millis(200);
    loop_cfg.timeout_step = Duration::from_millis(10);
    let loop_handle = event_loop::start(loop_cfg, Arc::new(StaticArbiter::new(addrs.clone())));

    // Insert a few clustered vectors through the router.
    let clusters: [[f64; 3]; 3] = [[1.0, 0.1, 0.1], [0.1, 1.0, 0.1], [0.1, 0.1, 1.0]];
    let mut inserted = 0;
    for (i, base) in clusters.iter().enumerate() {
        for j in 0..20 {
            let mut vec = base.to_vec();
            vec[i] += j as f64 * 0.01;
            let args = PutArgs {
                addrs: addrs.clone(),
                namespace: NAMESPACE.into(),
                dp: DataPoint::new(vec, format!("cluster-{i}/{j}").into_bytes()),
                metric: Metric::Cosine,
            };
            if router::put_data_point(args, RouteMode::Fast).await {
                inserted += 1;
            }
        }
    }
    println!("inserted {inserted} datapoints");

    // Let the maintenance loop tick a few times.
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Query each cluster center.
    for (i, base) in clusters.iter().enumerate() {
        let args = GetArgs {
            addrs: addrs.clone(),
            namespace: NAMESPACE.into(),
            query_vec: base.to_vec(),
            n: 3,
            drain: false,
            metric: Metric::Cosine,
        };
        let found = router::get_data_points(args, RouteMode::Accurate).await;
        let payloads: Vec<String> = found
            .iter()
            .map(|dp| String::from_utf8_lossy(&dp.payload).into_owned())
            .collect();
        println!("cluster {i}: nearest = {payloads:?}");
    }

    // Per-node counts.
    for addr in &addrs {
        let meta = NodeClient::to(addr, "").meta().await?;
        println!(
            "[{addr}] namespaces: {} | centroids: {} | dps: {}",
            meta.data_points.len(),
            meta.total_centroids(),
            meta.total_dps()
        );
    }

    loop_handle.stop();
    Ok(())
}
