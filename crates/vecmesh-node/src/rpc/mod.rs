//! The RPC layer: typed client and server on top of the index.
//!
//! The wire protocol is one request/response pair per handler. Centroids
//! travel as `{mean, datapoints}` only - similarity configuration never
//! crosses the wire - and are re-seeded through the receiving side's
//! centroid configuration before re-entering live use.

mod client;
mod convert;
mod server;

/// Generated protobuf types for the node service.
pub mod proto {
    tonic::include_proto!("vecmesh");
}

pub use client::NodeClient;
pub use server::NodeServer;
