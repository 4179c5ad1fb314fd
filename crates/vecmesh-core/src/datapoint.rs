//! The unit of stored data: a vector with an opaque payload and an optional
//! absolute expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable record owned by exactly one centroid at a time. DataPoints
/// move by value between centroids and nodes; they are destroyed on drain,
/// expiration, or overflow discard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// The vector; its dimension is fixed for the lifetime of the record.
    pub vec: Vec<f64>,
    /// Opaque payload bytes carried along with the vector.
    pub payload: Vec<u8>,
    /// Absolute expiry timestamp. Only meaningful when `expire_enabled`.
    pub expires: DateTime<Utc>,
    /// Enables the expiry timestamp.
    pub expire_enabled: bool,
}

impl DataPoint {
    /// Creates a datapoint that never expires.
    pub fn new(vec: Vec<f64>, payload: Vec<u8>) -> Self {
        Self {
            vec,
            payload,
            expires: DateTime::<Utc>::MIN_UTC,
            expire_enabled: false,
        }
    }

    /// Creates a datapoint that expires at the given instant.
    pub fn with_expiry(vec: Vec<f64>, payload: Vec<u8>, expires: DateTime<Utc>) -> Self {
        Self {
            vec,
            payload,
            expires,
            expire_enabled: true,
        }
    }

    /// True iff expiry is enabled and the wall clock is strictly past it.
    pub fn expired(&self) -> bool {
        self.expire_enabled && Utc::now() > self.expires
    }

    /// Dimension of the contained vector.
    pub fn dim(&self) -> usize {
        self.vec.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
