//! The node server: the full RPC surface over one namespace table.
//!
//! Every handler follows the same skeleton: resolve the slot through the
//! table (table lock held only for the map lookup), then serialize the
//! operation on the slot mutex. Missing namespaces surface as NOT_FOUND,
//! except `add_data_point` which auto-creates a slot seeded from the
//! datapoint's vector.
//!
//! The cross-node handlers (fast/accurate distribution, steal) drain or
//! snapshot under the slot lock, run their network phase with the lock
//! released, and re-acquire it to land results - so a node's slot is never
//! held across a call into another node.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};
use vecmesh_core::search::{knn, Metric};
use vecmesh_core::{Addr, DataPoint};

use super::convert::{centroid_to_proto, dp_from_proto, dps_to_proto};
use super::proto::node_service_server::{NodeService, NodeServiceServer};
use super::proto::*;
use super::NodeClient;
use crate::index::{Centroid, ManagerFactory};
use crate::table::NamespaceTable;

fn namespace_missing(namespace: &str) -> Status {
    Status::not_found(format!("namespace not found: '{namespace}'"))
}

/// One node's RPC server. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct NodeServer {
    addr: Addr,
    table: Arc<NamespaceTable>,
    factory: ManagerFactory,
    metric: Metric,
}

impl NodeServer {
    /// Creates a server around a fresh namespace table.
    pub fn new(addr: Addr, factory: ManagerFactory) -> Self {
        Self::with_table(addr, factory, Arc::new(NamespaceTable::new()))
    }

    /// Creates a server around an existing table (test fixtures peek at it).
    pub fn with_table(addr: Addr, factory: ManagerFactory, table: Arc<NamespaceTable>) -> Self {
        let metric = factory.centroid_config().knn_metric;
        Self {
            addr,
            table,
            factory,
            metric,
        }
    }

    /// The address this server identifies as.
    pub fn addr(&self) -> &Addr {
        &self.addr
    }

    /// The underlying namespace table.
    pub fn table(&self) -> &Arc<NamespaceTable> {
        &self.table
    }

    /// Binds and serves until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        bind: SocketAddr,
        shutdown: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        tonic::transport::Server::builder()
            .add_service(NodeServiceServer::new(self))
            .serve_with_shutdown(bind, shutdown)
            .await
    }

    /// Binds and serves forever.
    pub async fn serve(self, bind: SocketAddr) -> Result<(), tonic::transport::Error> {
        tonic::transport::Server::builder()
            .add_service(NodeServiceServer::new(self))
            .serve(bind)
            .await
    }

    fn client(&self, addr: &str, namespace: &str) -> NodeClient {
        NodeClient::new(addr, namespace).with_centroid_config(self.factory.centroid_config())
    }

    /// Drains `n` worst-fit datapoints for the distribution handlers.
    async fn drain_for_distribution(
        &self,
        namespace: &str,
        n: usize,
    ) -> Result<Vec<DataPoint>, Status> {
        self.table
            .access(namespace, |cm| cm.drain_ordered(n))
            .await
            .ok_or_else(|| namespace_missing(namespace))
    }

    /// Re-inserts datapoints nobody accepted; nothing is lost.
    async fn reinsert(&self, namespace: &str, leftovers: Vec<DataPoint>) {
        if leftovers.is_empty() {
            return;
        }
        debug!(
            namespace,
            count = leftovers.len(),
            "re-inserting undistributed datapoints"
        );
        self.table
            .access(namespace, |cm| {
                for dp in leftovers {
                    let _ = cm.add_data_point(dp);
                }
            })
            .await;
    }

    /// Attempts to place one datapoint on the ranked candidates, nearest
    /// first. Returns the datapoint back when every candidate refuses.
    async fn place_ranked(
        &self,
        namespace: &str,
        dp: DataPoint,
        candidates: &[(String, Vec<f64>)],
    ) -> Option<DataPoint> {
        let ranked = knn(
            &dp.vec,
            candidates.iter().map(|(_, v)| v.as_slice()),
            candidates.len(),
            self.metric,
        );
        for index in ranked {
            let (addr, _) = &candidates[index];
            let accepted = self
                .client(addr, namespace)
                .add_data_point(dp.clone())
                .await
                .unwrap_or(false);
            if accepted {
                return None;
            }
        }
        Some(dp)
    }
}

#[tonic::async_trait]
impl NodeService for NodeServer {
    async fn namespaces(
        &self,
        _request: Request<NamespacesRequest>,
    ) -> Result<Response<NamespacesResponse>, Status> {
        Ok(Response::new(NamespacesResponse {
            namespaces: self.table.namespaces(),
        }))
    }

    async fn vec(&self, request: Request<VecRequest>) -> Result<Response<VecResponse>, Status> {
        let req = request.into_inner();
        let vec = self
            .table
            .access(&req.namespace, |cm| cm.vec().to_vec())
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(VecResponse { vec }))
    }

    async fn add_data_point(
        &self,
        request: Request<AddDataPointRequest>,
    ) -> Result<Response<AddDataPointResponse>, Status> {
        let req = request.into_inner();
        let dp = dp_from_proto(req.dp.ok_or_else(|| Status::invalid_argument("missing dp"))?);

        let slot = self
            .table
            .get_or_insert_with(&req.namespace, || self.factory.spawn(dp.vec.clone()));
        let ok = slot.lock().await.add_data_point(dp).is_ok();
        Ok(Response::new(AddDataPointResponse { ok }))
    }

    async fn drain_unordered(
        &self,
        request: Request<DrainRequest>,
    ) -> Result<Response<DrainResponse>, Status> {
        let req = request.into_inner();
        let dps = self
            .table
            .access(&req.namespace, |cm| cm.drain_unordered(req.n as usize))
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(DrainResponse {
            dps: dps_to_proto(dps),
        }))
    }

    async fn drain_ordered(
        &self,
        request: Request<DrainRequest>,
    ) -> Result<Response<DrainResponse>, Status> {
        let req = request.into_inner();
        let dps = self
            .table
            .access(&req.namespace, |cm| cm.drain_ordered(req.n as usize))
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(DrainResponse {
            dps: dps_to_proto(dps),
        }))
    }

    async fn expire(
        &self,
        request: Request<ExpireRequest>,
    ) -> Result<Response<ExpireResponse>, Status> {
        let req = request.into_inner();
        self.table
            .access(&req.namespace, |cm| cm.expire())
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(ExpireResponse {}))
    }

    async fn len_dp(
        &self,
        request: Request<LenDpRequest>,
    ) -> Result<Response<LenDpResponse>, Status> {
        let req = request.into_inner();
        let len = self
            .table
            .access(&req.namespace, |cm| cm.len_dp() as u64)
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(LenDpResponse { len }))
    }

    async fn mem_trim(
        &self,
        request: Request<MemTrimRequest>,
    ) -> Result<Response<MemTrimResponse>, Status> {
        let req = request.into_inner();
        self.table
            .access(&req.namespace, |cm| cm.mem_trim())
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(MemTrimResponse {}))
    }

    async fn move_vector(
        &self,
        request: Request<MoveVectorRequest>,
    ) -> Result<Response<MoveVectorResponse>, Status> {
        let req = request.into_inner();
        let moved = self
            .table
            .access(&req.namespace, |cm| cm.move_vector())
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(MoveVectorResponse { moved }))
    }

    async fn knn_lookup(
        &self,
        request: Request<KnnLookupRequest>,
    ) -> Result<Response<KnnLookupResponse>, Status> {
        let req = request.into_inner();
        let dps = self
            .table
            .access(&req.namespace, |cm| {
                cm.knn_lookup(&req.vec, req.k as usize, req.drain)
            })
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(KnnLookupResponse {
            dps: dps_to_proto(dps),
        }))
    }

    async fn nearest_centroids(
        &self,
        request: Request<NearestCentroidsRequest>,
    ) -> Result<Response<NearestCentroidsResponse>, Status> {
        let req = request.into_inner();
        let centroids: Vec<Centroid> = self
            .table
            .access(&req.namespace, |cm| {
                cm.nearest_centroids(&req.vec, req.n as usize, req.drain)
            })
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(NearestCentroidsResponse {
            centroids: centroids.into_iter().map(centroid_to_proto).collect(),
        }))
    }

    async fn nearest_centroid_vec(
        &self,
        request: Request<NearestCentroidVecRequest>,
    ) -> Result<Response<NearestCentroidVecResponse>, Status> {
        let req = request.into_inner();
        let vec = self
            .table
            .access(&req.namespace, |cm| cm.nearest_centroid_vec(&req.vec))
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(NearestCentroidVecResponse {
            vec: vec.unwrap_or_default(),
        }))
    }

    async fn split_centroids(
        &self,
        request: Request<RangeRequest>,
    ) -> Result<Response<RangeResponse>, Status> {
        let req = request.into_inner();
        self.table
            .access(&req.namespace, |cm| {
                cm.split_centroids(|c| {
                    let len = c.len_dp() as i64;
                    len > req.min && len < req.max
                })
            })
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(RangeResponse {}))
    }

    async fn merge_centroids(
        &self,
        request: Request<RangeRequest>,
    ) -> Result<Response<RangeResponse>, Status> {
        let req = request.into_inner();
        self.table
            .access(&req.namespace, |cm| {
                cm.merge_centroids(|c| {
                    let len = c.len_dp() as i64;
                    len > req.min && len < req.max
                })
            })
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(RangeResponse {}))
    }

    async fn distribute_data_points_internal(
        &self,
        request: Request<DistributeInternalRequest>,
    ) -> Result<Response<DistributeResponse>, Status> {
        let req = request.into_inner();
        self.table
            .access(&req.namespace, |cm| cm.distribute_internal(req.n as usize))
            .await
            .ok_or_else(|| namespace_missing(&req.namespace))?;
        Ok(Response::new(DistributeResponse {}))
    }

    /// Drains worst-fit datapoints, fetches each candidate's manager vector
    /// *once*, then places each datapoint on the best-ranked candidate that
    /// accepts it.
    async fn distribute_data_points_fast(
        &self,
        request: Request<DistributeRequest>,
    ) -> Result<Response<DistributeResponse>, Status> {
        let req = request.into_inner();
        let drained = self
            .drain_for_distribution(&req.namespace, req.n as usize)
            .await?;
        if drained.is_empty() {
            return Ok(Response::new(DistributeResponse {}));
        }

        let fetches = req.addrs.iter().map(|addr| {
            let client = self.client(addr, &req.namespace);
            let addr = addr.clone();
            async move {
                match client.vec().await {
                    Ok(vec) if !vec.is_empty() => Some((addr, vec)),
                    _ => None,
                }
            }
        });
        let candidates: Vec<(String, Vec<f64>)> =
            join_all(fetches).await.into_iter().flatten().collect();

        let mut leftovers = Vec::new();
        for dp in drained {
            if let Some(dp) = self.place_ranked(&req.namespace, dp, &candidates).await {
                leftovers.push(dp);
            }
        }
        self.reinsert(&req.namespace, leftovers).await;
        Ok(Response::new(DistributeResponse {}))
    }

    /// Same skeleton as the fast variant, but each datapoint is ranked
    /// against the candidates' *centroid-level* nearest vectors - one call
    /// per (datapoint, candidate) pair. Slower, better placement.
    async fn distribute_data_points_accurate(
        &self,
        request: Request<DistributeRequest>,
    ) -> Result<Response<DistributeResponse>, Status> {
        let req = request.into_inner();
        let drained = self
            .drain_for_distribution(&req.namespace, req.n as usize)
            .await?;

        let mut leftovers = Vec::new();
        for dp in drained {
            let fetches = req.addrs.iter().map(|addr| {
                let client = self.client(addr, &req.namespace);
                let addr = addr.clone();
                let query = dp.vec.clone();
                async move {
                    match client.nearest_centroid_vec(&query).await {
                        Ok(Some(vec)) if !vec.is_empty() => Some((addr, vec)),
                        _ => None,
                    }
                }
            });
            let candidates: Vec<(String, Vec<f64>)> =
                join_all(fetches).await.into_iter().flatten().collect();
            if let Some(dp) = self.place_ranked(&req.namespace, dp, &candidates).await {
                leftovers.push(dp);
            }
        }
        self.reinsert(&req.namespace, leftovers).await;
        Ok(Response::new(DistributeResponse {}))
    }

    /// Pulls whole centroids from the donor until the cumulative datapoint
    /// count meets the limit (whole-centroid transfer overshoots). The
    /// response encodes the four documented states through
    /// `(transferred, ok)`.
    async fn steal_centroids(
        &self,
        request: Request<StealCentroidsRequest>,
    ) -> Result<Response<StealCentroidsResponse>, Status> {
        let req = request.into_inner();
        let resp = |transferred: u64, ok: bool| {
            Ok(Response::new(StealCentroidsResponse { transferred, ok }))
        };
        if req.dp_limit == 0 {
            return resp(0, true);
        }

        // Reference vector for picking donor centroids: the local manager
        // vector when the namespace exists here, the donor's otherwise.
        let mut reference = match self
            .table
            .access(&req.namespace, |cm| cm.vec().to_vec())
            .await
        {
            Some(v) if !v.is_empty() => v,
            _ => match self.client(&req.from_addr, &req.namespace).vec().await {
                Ok(v) if !v.is_empty() => v,
                _ => return resp(0, false),
            },
        };

        let donor = self.client(&req.from_addr, &req.namespace);
        let mut transferred: u64 = 0;
        loop {
            let centroids = match donor.nearest_centroids(&reference, 1, true).await {
                Ok(cs) => cs,
                Err(err) => {
                    warn!(namespace = %req.namespace, donor = %req.from_addr, error = %err,
                        "steal aborted mid-transfer");
                    return resp(transferred, false);
                }
            };
            if centroids.is_empty() {
                // No network error, the donor is simply exhausted.
                return resp(transferred, true);
            }

            let slot = self.table.get_or_insert_with(&req.namespace, || {
                self.factory.spawn(centroids[0].vec().to_vec())
            });
            let mut cm = slot.lock().await;
            for centroid in centroids {
                transferred += centroid.len_dp() as u64;
                cm.push_centroid(centroid);
            }
            reference = cm.vec().to_vec();
            drop(cm);

            if transferred >= req.dp_limit {
                return resp(transferred, true);
            }
        }
    }

    async fn meta(&self, _request: Request<MetaRequest>) -> Result<Response<MetaResponse>, Status> {
        let mut namespaces = std::collections::HashMap::new();
        for ns in self.table.namespaces() {
            if let Some((data_points, centroids)) = self
                .table
                .access(&ns, |cm| (cm.len_dp() as u64, cm.len_centroids() as u64))
                .await
            {
                namespaces.insert(
                    ns,
                    NamespaceMeta {
                        data_points,
                        centroids,
                    },
                );
            }
        }
        Ok(Response::new(MetaResponse { namespaces }))
    }
}
