//! The per-node vector index.
//!
//! Two layers, each carrying a running mean vector:
//! - [`Centroid`] - owns datapoints; its mean tracks the live contents.
//! - [`CentroidManager`] - owns centroids; its mean tracks the centroid means.
//!
//! Both keep their mean consistent through incremental updates so no
//! mutation ever needs a full recomputation on the hot path.

mod centroid;
mod manager;

pub use centroid::{Centroid, CentroidConfig};
pub use manager::{CentroidManager, ManagerConfig, ManagerFactory};

use vecmesh_core::DataPoint;

/// Anything that can receive a datapoint: a local centroid, or a proxy for a
/// remote one. Receivers expose their vector so senders can rank them.
pub trait DataPointReceiver {
    /// The receiver's current mean vector.
    fn vec(&self) -> &[f64];

    /// Attempts to take ownership of the datapoint. Returns false on
    /// rejection (dimension mismatch, expiry), in which case the caller
    /// still owns the value.
    fn add_data_point(&mut self, dp: DataPoint) -> bool;
}
