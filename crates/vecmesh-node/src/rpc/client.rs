//! Typed client for a remote node server.
//!
//! Thin per-call connection model: each method dials the remote, performs a
//! single typed call, and drops the connection. Methods map one-to-one onto
//! the server handlers; the exceptions are documented on the methods
//! (server-side distribution, client-side centroid re-seeding, numeric
//! split/merge ranges because predicates cannot cross the wire).

use tonic::transport::{Channel, Endpoint};
use vecmesh_core::{Addr, DataPoint};

use super::convert::{dp_to_proto, dps_from_proto};
use super::proto::node_service_client::NodeServiceClient;
use super::proto::*;
use crate::error::ClientError;
use crate::index::{Centroid, CentroidConfig};
use crate::meta::NodeMeta;

/// Client bound to one `(address, namespace)` pair.
#[derive(Debug, Clone)]
pub struct NodeClient {
    addr: String,
    namespace: String,
    centroid_cfg: CentroidConfig,
}

impl NodeClient {
    /// Creates a client for a namespace on a remote node. The default
    /// centroid configuration (cosine) is used for re-seeding wire
    /// centroids; override it with [`NodeClient::with_centroid_config`]
    /// when the cluster runs a different setup.
    pub fn new(addr: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            namespace: namespace.into(),
            centroid_cfg: CentroidConfig::default(),
        }
    }

    /// Convenience constructor from a structural address.
    pub fn to(addr: &Addr, namespace: impl Into<String>) -> Self {
        Self::new(addr.to_string(), namespace)
    }

    /// Sets the centroid configuration used to re-seed received centroids.
    pub fn with_centroid_config(mut self, cfg: CentroidConfig) -> Self {
        self.centroid_cfg = cfg;
        self
    }

    /// The remote address this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Dials the remote. One connection per call; dropping the client
    /// handle releases everything.
    async fn connect(&self) -> Result<NodeServiceClient<Channel>, ClientError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.addr))
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let channel = endpoint.connect().await?;
        Ok(NodeServiceClient::new(channel))
    }

    fn map_status(&self, status: tonic::Status) -> ClientError {
        ClientError::from_status(status, &self.namespace)
    }

    /// All namespaces stored on the remote node.
    pub async fn namespaces(&self) -> Result<Vec<String>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .namespaces(NamespacesRequest {})
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(resp.into_inner().namespaces)
    }

    /// The remote manager's mean vector.
    pub async fn vec(&self) -> Result<Vec<f64>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .vec(VecRequest {
                namespace: self.namespace.clone(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(resp.into_inner().vec)
    }

    /// Inserts a datapoint. The remote auto-creates the namespace when it
    /// does not exist yet.
    pub async fn add_data_point(&self, dp: DataPoint) -> Result<bool, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .add_data_point(AddDataPointRequest {
                namespace: self.namespace.clone(),
                dp: Some(dp_to_proto(dp)),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(resp.into_inner().ok)
    }

    pub async fn drain_unordered(&self, n: usize) -> Result<Vec<DataPoint>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .drain_unordered(DrainRequest {
                namespace: self.namespace.clone(),
                n: n as u64,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(dps_from_proto(resp.into_inner().dps))
    }

    pub async fn drain_ordered(&self, n: usize) -> Result<Vec<DataPoint>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .drain_ordered(DrainRequest {
                namespace: self.namespace.clone(),
                n: n as u64,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(dps_from_proto(resp.into_inner().dps))
    }

    pub async fn expire(&self) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .expire(ExpireRequest {
                namespace: self.namespace.clone(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    pub async fn len_dp(&self) -> Result<usize, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .len_dp(LenDpRequest {
                namespace: self.namespace.clone(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(resp.into_inner().len as usize)
    }

    pub async fn mem_trim(&self) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .mem_trim(MemTrimRequest {
                namespace: self.namespace.clone(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    pub async fn move_vector(&self) -> Result<bool, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .move_vector(MoveVectorRequest {
                namespace: self.namespace.clone(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(resp.into_inner().moved)
    }

    pub async fn knn_lookup(
        &self,
        vec: &[f64],
        k: usize,
        drain: bool,
    ) -> Result<Vec<DataPoint>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .knn_lookup(KnnLookupRequest {
                namespace: self.namespace.clone(),
                vec: vec.to_vec(),
                k: k as u64,
                drain,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(dps_from_proto(resp.into_inner().dps))
    }

    /// Fetches the `n` remote centroids nearest to `vec`. Wire centroids
    /// carry datapoints but no similarity configuration, so each one is
    /// re-seeded through this client's centroid configuration before use;
    /// empty centroids are filtered out.
    pub async fn nearest_centroids(
        &self,
        vec: &[f64],
        n: usize,
        drain: bool,
    ) -> Result<Vec<Centroid>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .nearest_centroids(NearestCentroidsRequest {
                namespace: self.namespace.clone(),
                vec: vec.to_vec(),
                n: n as u64,
                drain,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        let centroids = resp
            .into_inner()
            .centroids
            .into_iter()
            .filter_map(|msg| {
                Centroid::from_wire(dps_from_proto(msg.data_points), self.centroid_cfg)
            })
            .collect();
        Ok(centroids)
    }

    /// The vector of the remote centroid nearest to `vec`, if any.
    pub async fn nearest_centroid_vec(&self, vec: &[f64]) -> Result<Option<Vec<f64>>, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .nearest_centroid_vec(NearestCentroidVecRequest {
                namespace: self.namespace.clone(),
                vec: vec.to_vec(),
            })
            .await
            .map_err(|s| self.map_status(s))?;
        let vec = resp.into_inner().vec;
        Ok(if vec.is_empty() { None } else { Some(vec) })
    }

    /// Splits remote centroids whose datapoint count falls inside the
    /// range; both bounds are exclusive. A range stands in for the local
    /// predicate because closures cannot cross the wire.
    pub async fn split_centroids(&self, min: i64, max: i64) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .split_centroids(RangeRequest {
                namespace: self.namespace.clone(),
                min,
                max,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    /// Merges remote centroids whose datapoint count falls inside the
    /// range; both bounds are exclusive.
    pub async fn merge_centroids(&self, min: i64, max: i64) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .merge_centroids(RangeRequest {
                namespace: self.namespace.clone(),
                min,
                max,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    pub async fn distribute_data_points_internal(&self, n: usize) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .distribute_data_points_internal(DistributeInternalRequest {
                namespace: self.namespace.clone(),
                n: n as u64,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    /// Asks the remote node to emit `n` worst-fit datapoints to the
    /// best-fit nodes among `addrs`. The ranking work happens on the node
    /// being asked, not here.
    pub async fn distribute_data_points_fast(
        &self,
        addrs: &[Addr],
        n: usize,
    ) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .distribute_data_points_fast(DistributeRequest {
                namespace: self.namespace.clone(),
                addrs: addrs.iter().map(|a| a.to_string()).collect(),
                n: n as u64,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    /// Accurate counterpart of [`NodeClient::distribute_data_points_fast`]:
    /// centroid-level candidate ranking, one call per (datapoint, candidate).
    pub async fn distribute_data_points_accurate(
        &self,
        addrs: &[Addr],
        n: usize,
    ) -> Result<(), ClientError> {
        let mut client = self.connect().await?;
        client
            .distribute_data_points_accurate(DistributeRequest {
                namespace: self.namespace.clone(),
                addrs: addrs.iter().map(|a| a.to_string()).collect(),
                n: n as u64,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        Ok(())
    }

    /// Asks the node behind this client to pull whole centroids from
    /// `from` until at least `dp_limit` datapoints have moved (the transfer
    /// can overshoot). Returns `(transferred, ok)`:
    /// - `(0, false)`: donor error before anything moved.
    /// - `(>0, false)`: partial transfer, then an error.
    /// - `(0, true)`: no error, donor was empty.
    /// - `(>0, true)`: success.
    pub async fn steal_centroids(
        &self,
        from: &Addr,
        dp_limit: u64,
    ) -> Result<(u64, bool), ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .steal_centroids(StealCentroidsRequest {
                namespace: self.namespace.clone(),
                from_addr: from.to_string(),
                dp_limit,
            })
            .await
            .map_err(|s| self.map_status(s))?;
        let resp = resp.into_inner();
        Ok((resp.transferred, resp.ok))
    }

    /// The remote node's per-namespace datapoint/centroid counts.
    pub async fn meta(&self) -> Result<NodeMeta, ClientError> {
        let mut client = self.connect().await?;
        let resp = client
            .meta(MetaRequest {})
            .await
            .map_err(|s| self.map_status(s))?;
        let mut meta = NodeMeta::default();
        for (ns, counts) in resp.into_inner().namespaces {
            meta.data_points.insert(ns.clone(), counts.data_points);
            meta.centroids.insert(ns, counts.centroids);
        }
        Ok(meta)
    }
}
