//! The HTTP/JSON front end.
//!
//! Two endpoints, both POST:
//! - `/api/dp/put` - insert a datapoint through the router.
//! - `/api/dp/query` - fetch the n most similar datapoints.
//!
//! Both accept an `addressOptions` list of `host:port` candidates; when the
//! list is empty the node's configured cluster membership is used. Payload
//! bytes travel as base64 strings.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use vecmesh_core::search::Metric;
use vecmesh_core::{Addr, DataPoint};
use vecmesh_node::router::{self, GetArgs, PutArgs, RouteMode};

/// Shared state for the API handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    /// Cluster membership used when a request carries no address options.
    pub rpc_addrs: Vec<Addr>,
    /// Ranking metric forwarded to the router.
    pub metric: Metric,
}

/// Serde helper: `Vec<u8>` as a base64 string in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Wire shape of a datapoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpBody {
    pub vec: Vec<f64>,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(rename = "expireEnabled", default)]
    pub expire_enabled: bool,
}

impl DpBody {
    fn into_data_point(self) -> DataPoint {
        DataPoint {
            vec: self.vec,
            payload: self.payload,
            expires: self.expires.unwrap_or(DateTime::<Utc>::MIN_UTC),
            expire_enabled: self.expire_enabled,
        }
    }

    fn from_data_point(dp: DataPoint) -> Self {
        Self {
            vec: dp.vec,
            payload: dp.payload,
            expires: dp.expire_enabled.then_some(dp.expires),
            expire_enabled: dp.expire_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    #[serde(rename = "addressOptions", default)]
    address_options: Vec<String>,
    namespace: String,
    #[serde(default)]
    accurate: bool,
    dp: DpBody,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(rename = "addressOptions", default)]
    address_options: Vec<String>,
    namespace: String,
    #[serde(default)]
    accurate: bool,
    #[serde(rename = "queryVec")]
    query_vec: Vec<f64>,
    n: usize,
    #[serde(default)]
    drain: bool,
}

fn resolve_addrs(options: &[String], fallback: &[Addr]) -> Result<Vec<Addr>, StatusCode> {
    if options.is_empty() {
        return Ok(fallback.to_vec());
    }
    options
        .iter()
        .map(|s| s.parse::<Addr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| StatusCode::BAD_REQUEST)
}

async fn put_data_point(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PutRequest>,
) -> StatusCode {
    let addrs = match resolve_addrs(&req.address_options, &state.rpc_addrs) {
        Ok(addrs) => addrs,
        Err(status) => return status,
    };
    let mode = if req.accurate {
        RouteMode::Accurate
    } else {
        RouteMode::Fast
    };
    let args = PutArgs {
        addrs,
        namespace: req.namespace,
        dp: req.dp.into_data_point(),
        metric: state.metric,
    };
    // The router falls back to random order itself when no ranked node
    // accepts (namespace auto-creation).
    if router::put_data_point(args, mode).await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn query_data_points(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Vec<DpBody>>, StatusCode> {
    let addrs = resolve_addrs(&req.address_options, &state.rpc_addrs)?;
    let mode = if req.accurate {
        RouteMode::Accurate
    } else {
        RouteMode::Fast
    };
    let args = GetArgs {
        addrs,
        namespace: req.namespace,
        query_vec: req.query_vec,
        n: req.n,
        drain: req.drain,
        metric: state.metric,
    };
    let found = router::get_data_points(args, mode).await;
    Ok(Json(found.into_iter().map(DpBody::from_data_point).collect()))
}

/// Builds the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/dp/put", post(put_data_point))
        .route("/api/dp/query", post(query_data_points))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves the API until the process exits.
pub async fn serve(state: ApiState, bind: SocketAddr) -> std::io::Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "http api listening");
    axum::serve(listener, app).await
}

// =============================================================================
// Tests
// =============================================================================
