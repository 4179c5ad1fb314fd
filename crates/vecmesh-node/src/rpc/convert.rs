//! Conversions between index types and their wire messages.

use chrono::{DateTime, Utc};
use vecmesh_core::DataPoint;

use super::proto;
use crate::index::Centroid;

pub fn dp_to_proto(dp: DataPoint) -> proto::DataPointMsg {
    proto::DataPointMsg {
        vec: dp.vec,
        payload: dp.payload,
        expires_unix_ms: dp.expires.timestamp_millis(),
        expire_enabled: dp.expire_enabled,
    }
}

pub fn dp_from_proto(msg: proto::DataPointMsg) -> DataPoint {
    let expires = DateTime::<Utc>::from_timestamp_millis(msg.expires_unix_ms)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    DataPoint {
        vec: msg.vec,
        payload: msg.payload,
        expires,
        expire_enabled: msg.expire_enabled,
    }
}

pub fn dps_to_proto(dps: Vec<DataPoint>) -> Vec<proto::DataPointMsg> {
    dps.into_iter().map(dp_to_proto).collect()
}

pub fn dps_from_proto(msgs: Vec<proto::DataPointMsg>) -> Vec<DataPoint> {
    msgs.into_iter().map(dp_from_proto).collect()
}

pub fn centroid_to_proto(centroid: Centroid) -> proto::CentroidMsg {
    let (vec, dps) = centroid.into_parts();
    proto::CentroidMsg {
        vec,
        data_points: dps_to_proto(dps),
    }
}

// =============================================================================
// Tests
// =============================================================================
