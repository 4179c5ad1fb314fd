//! # Vecmesh Node
//!
//! The per-node half of the vecmesh cluster: a hierarchical k-means-style
//! vector index, the RPC surface around it, the put/get router, and the
//! maintenance loop that keeps the whole thing balanced, accurate and
//! bounded in memory.
//!
//! ## Layout
//!
//! - [`index`] - `Centroid` and `CentroidManager`, the two-level index
//! - [`table`] - namespaced managers with per-slot locking
//! - [`rpc`] - tonic server + typed per-call client
//! - [`router`] - rank candidate nodes, dispatch puts/gets
//! - [`event_loop`] - periodic scheduler with arbiter gating
//! - [`arbiter`] - the consumed leader-election interface
//! - [`config`] - process-wide configuration (TOML + env overrides)

pub mod arbiter;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod index;
pub mod logging;
pub mod meta;
pub mod router;
pub mod rpc;
pub mod table;

pub use config::NodeConfig;
pub use error::{ClientError, ConfigError, IndexError};
pub use index::{Centroid, CentroidConfig, CentroidManager, ManagerConfig, ManagerFactory};
pub use meta::{MetaSnapshot, NodeMeta};
pub use rpc::{NodeClient, NodeServer};
pub use table::NamespaceTable;
