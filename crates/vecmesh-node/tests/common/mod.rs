//! In-process multi-node fixture: real node servers on localhost ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use vecmesh_core::{Addr, DataPoint};
use vecmesh_node::index::{Centroid, CentroidConfig, CentroidManager, ManagerConfig, ManagerFactory};
use vecmesh_node::{NamespaceTable, NodeServer};

/// One running node: its address plus a handle on its table so tests can
/// seed and inspect state directly.
pub struct TestNode {
    pub addr: Addr,
    pub table: Arc<NamespaceTable>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestNetwork {
    pub nodes: Vec<TestNode>,
}

impl TestNetwork {
    pub fn addrs(&self) -> Vec<Addr> {
        self.nodes.iter().map(|n| n.addr.clone()).collect()
    }
}

/// The stock test recipe: cosine, small capacities, split threshold 10.
pub fn factory() -> ManagerFactory {
    ManagerFactory::new(ManagerConfig {
        split_threshold: 10,
        ..ManagerConfig::default()
    })
    .unwrap()
}

/// Spawns one node server per port and waits until every one accepts
/// connections.
pub async fn start_network(ports: &[u16]) -> TestNetwork {
    let mut nodes = Vec::with_capacity(ports.len());
    for &port in ports {
        let addr = Addr::new("localhost", port);
        let table = Arc::new(NamespaceTable::new());
        let server = NodeServer::with_table(addr.clone(), factory(), Arc::clone(&table));
        let bind: SocketAddr = ([127, 0, 0, 1], port).into();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve_with_shutdown(bind, async {
            let _ = rx.await;
        }));
        nodes.push(TestNode {
            addr,
            table,
            shutdown: Some(tx),
        });
    }
    for node in &nodes {
        wait_ready(&node.addr).await;
    }
    TestNetwork { nodes }
}

async fn wait_ready(addr: &Addr) {
    for _ in 0..200 {
        if tokio::net::TcpStream::connect(addr.to_string()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node at {addr} never came up");
}

pub fn dp(v: &[f64]) -> DataPoint {
    DataPoint::new(v.to_vec(), Vec::new())
}

/// A centroid whose mean is the mean of the given vectors.
pub fn centroid_from<V: AsRef<[f64]>>(vecs: &[V]) -> Centroid {
    let mut c = Centroid::new(vecs[0].as_ref().to_vec(), CentroidConfig::default());
    for v in vecs {
        c.add(dp(v.as_ref())).unwrap();
    }
    c
}

/// A manager seeded with `seed`, holding the given centroids.
pub fn manager_with(seed: &[f64], centroids: Vec<Centroid>) -> CentroidManager {
    let mut cm = factory().spawn(seed.to_vec());
    for c in centroids {
        cm.push_centroid(c);
    }
    cm
}
