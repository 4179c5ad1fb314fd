//! Error types shared across the node crate.
//!
//! Index operations are total: a rejected insert or a failed lookup is a
//! value, not a panic. The kinds below map onto the wire as follows: missing
//! namespaces become NOT_FOUND statuses, everything else is surfaced through
//! booleans/empty results or the typed client error.

use thiserror::Error;
use vecmesh_core::search::Metric;

/// Rejections produced by the index (centroids and managers).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// The datapoint's vector dimension does not match the index.
    #[error("datapoint dimension {got} does not match index dimension {want}")]
    DimensionMismatch { want: usize, got: usize },

    /// The datapoint was already expired at insertion time.
    #[error("datapoint is already expired")]
    Expired,
}

/// Invalid construction; fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The nearest and furthest search metrics disagree. Cosine and
    /// euclidean order their scores in opposite directions, so mixing them
    /// silently flips drain/lookup semantics.
    #[error("knn metric {knn} and kfn metric {kfn} must agree")]
    MetricMismatch { knn: Metric, kfn: Metric },

    /// `all_rpc_addrs` must contain `local_rpc_addr`.
    #[error("all_rpc_addrs does not contain the local rpc address {local}")]
    LocalAddrMissing { local: String },

    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors produced by the typed RPC client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The namespace is not present on the remote node. The load balancer
    /// interprets this as "zero datapoints".
    #[error("namespace not found: '{namespace}'")]
    NamespaceMissing { namespace: String },

    /// Connection or decode failure. Retried at the granularity of the next
    /// event-loop tick, never inside the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote rejected the call for a non-namespace reason.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ClientError {
    /// Maps a tonic status onto the typed client error, decoding the
    /// NOT_FOUND convention used by the node server for missing namespaces.
    pub fn from_status(status: tonic::Status, namespace: &str) -> Self {
        match status.code() {
            tonic::Code::NotFound => ClientError::NamespaceMissing {
                namespace: namespace.to_string(),
            },
            _ => ClientError::Rpc(status.message().to_string()),
        }
    }
}

impl From<tonic::transport::Error> for ClientError {
    fn from(err: tonic::transport::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
