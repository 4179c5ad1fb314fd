//! A cluster of datapoints with a running mean vector.
//!
//! Invariant (post-condition of every mutation): the mean equals the
//! component-wise mean of the vectors of all contained non-expired
//! datapoints, or retains its last value when the centroid is empty.
//! Expired datapoints are removed lazily - during drains, lookups and
//! explicit expiration - and every removal backs the mean out incrementally.

use serde::{Deserialize, Serialize};
use vecmesh_core::search::{kfn, knn, Metric};
use vecmesh_core::{vecmath, DataPoint};

use super::DataPointReceiver;
use crate::error::IndexError;

/// Construction parameters for a centroid. The manager owns one of these and
/// seeds every centroid it creates from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentroidConfig {
    /// Initial capacity of the datapoint storage.
    pub capacity: usize,
    /// Metric for nearest-neighbor ranking.
    pub knn_metric: Metric,
    /// Metric for furthest-neighbor ranking. Must agree with `knn_metric`;
    /// the manager validates this at construction.
    pub kfn_metric: Metric,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            knn_metric: Metric::Cosine,
            kfn_metric: Metric::Cosine,
        }
    }
}

/// A group of datapoints and their mean vector.
#[derive(Debug, Clone)]
pub struct Centroid {
    vec: Vec<f64>,
    data_points: Vec<DataPoint>,
    knn_metric: Metric,
    kfn_metric: Metric,
}

impl Centroid {
    /// Creates an empty centroid seeded with the given vector. The seed
    /// fixes the dimension accepted by [`Centroid::add`] and stands in as
    /// the mean until the first datapoint arrives.
    pub fn new(seed: Vec<f64>, cfg: CentroidConfig) -> Self {
        Self {
            vec: seed,
            data_points: Vec::with_capacity(cfg.capacity),
            knn_metric: cfg.knn_metric,
            kfn_metric: cfg.kfn_metric,
        }
    }

    /// Rebuilds a centroid received from the wire. Wire centroids carry only
    /// `{mean, datapoints}`; the local configuration supplies the similarity
    /// setup, and the mean is recomputed from the datapoints before the
    /// centroid re-enters live use. Returns `None` when there are no live
    /// datapoints to rebuild from.
    pub fn from_wire(dps: Vec<DataPoint>, cfg: CentroidConfig) -> Option<Self> {
        let seed = dps.iter().find(|dp| !dp.expired())?.vec.clone();
        let mut c = Self::new(seed, cfg);
        c.data_points = dps;
        if !c.move_vector() {
            return None;
        }
        Some(c)
    }

    /// The current mean vector.
    pub fn vec(&self) -> &[f64] {
        &self.vec
    }

    /// Number of contained datapoints. Expired datapoints that have not yet
    /// been swept still count; removal is lazy.
    pub fn len_dp(&self) -> usize {
        self.data_points.len()
    }

    /// Adds a datapoint, updating the mean incrementally:
    /// `m <- (m*n + v) / (n+1)`.
    pub fn add(&mut self, dp: DataPoint) -> Result<(), IndexError> {
        if dp.dim() != self.vec.len() {
            return Err(IndexError::DimensionMismatch {
                want: self.vec.len(),
                got: dp.dim(),
            });
        }
        if dp.expired() {
            return Err(IndexError::Expired);
        }
        let n = self.data_points.len() as f64;
        vecmath::scale_assign(&mut self.vec, n);
        // Dimensions were checked above, these cannot fail.
        let _ = vecmath::add_assign(&mut self.vec, &dp.vec);
        vecmath::scale_assign(&mut self.vec, 1.0 / (n + 1.0));
        self.data_points.push(dp);
        Ok(())
    }

    /// Removes the datapoint at `index`, backing its vector out of the mean:
    /// `m <- (m*n - v) / (n-1)`. When the last datapoint leaves, the mean
    /// keeps its last value.
    fn rm(&mut self, index: usize) -> DataPoint {
        let dp = self.data_points.remove(index);
        let n = (self.data_points.len() + 1) as f64;
        if self.data_points.is_empty() || dp.dim() != self.vec.len() {
            return dp;
        }
        vecmath::scale_assign(&mut self.vec, n);
        let _ = vecmath::sub_assign(&mut self.vec, &dp.vec);
        vecmath::scale_assign(&mut self.vec, 1.0 / (n - 1.0));
        dp
    }

    /// Removes up to `n` live datapoints from the front. Expired datapoints
    /// encountered on the way are discarded without counting toward `n`.
    pub fn drain_unordered(&mut self, n: usize) -> Vec<DataPoint> {
        let mut res = Vec::with_capacity(n.min(self.data_points.len()));
        while !self.data_points.is_empty() && res.len() < n {
            let dp = self.rm(0);
            if !dp.expired() {
                res.push(dp);
            }
        }
        res
    }

    /// Removes and returns up to `n` datapoints *furthest* from the mean,
    /// furthest-first. Expired datapoints are swept beforehand so they never
    /// count toward `n`.
    pub fn drain_ordered(&mut self, n: usize) -> Vec<DataPoint> {
        self.expire();
        let ranked = kfn(
            &self.vec,
            self.data_points.iter().map(|dp| dp.vec.as_slice()),
            n,
            self.kfn_metric,
        );
        self.remove_ranked(ranked)
    }

    /// Removes the datapoints at the given storage indices (ranked
    /// best-first) and returns them in rank order. Removal happens in
    /// descending index order so earlier removals never shift later ones.
    fn remove_ranked(&mut self, ranked: Vec<usize>) -> Vec<DataPoint> {
        let mut tagged: Vec<(usize, usize)> = ranked.into_iter().enumerate().collect();
        tagged.sort_by(|a, b| b.1.cmp(&a.1));
        let mut out: Vec<Option<DataPoint>> = (0..tagged.len()).map(|_| None).collect();
        for (rank, index) in tagged {
            out[rank] = Some(self.rm(index));
        }
        out.into_iter().flatten().collect()
    }

    /// Removes every currently expired datapoint, updating the mean.
    pub fn expire(&mut self) {
        for i in (0..self.data_points.len()).rev() {
            if self.data_points[i].expired() {
                self.rm(i);
            }
        }
    }

    /// Shrinks the datapoint storage to the live count; sweeps expired
    /// datapoints on the way.
    pub fn mem_trim(&mut self) {
        self.expire();
        self.data_points.shrink_to_fit();
    }

    /// Recomputes the mean from the live datapoint vectors. Returns false
    /// only when the centroid is empty (the mean then keeps its last value).
    pub fn move_vector(&mut self) -> bool {
        self.expire();
        match vecmath::mean(self.data_points.iter().map(|dp| dp.vec.as_slice())) {
            Some(m) => {
                self.vec = m;
                true
            }
            None => false,
        }
    }

    /// Returns the `k` datapoints nearest to `target`, nearest-first. With
    /// `drain` the returned datapoints are removed from the centroid.
    pub fn knn_lookup(&mut self, target: &[f64], k: usize, drain: bool) -> Vec<DataPoint> {
        self.expire();
        let ranked = knn(
            target,
            self.data_points.iter().map(|dp| dp.vec.as_slice()),
            k,
            self.knn_metric,
        );
        if drain {
            self.remove_ranked(ranked)
        } else {
            ranked
                .into_iter()
                .map(|i| self.data_points[i].clone())
                .collect()
        }
    }

    /// Drains up to `n` worst-fit datapoints and hands each to the receiver
    /// whose vector is nearest to it. The centroid itself competes in the
    /// ranking, so a datapoint that still fits best here stays. On receiver
    /// refusal or an empty receiver list the datapoint is re-added to self;
    /// nothing is lost.
    pub fn distribute(&mut self, n: usize, receivers: &mut [&mut dyn DataPointReceiver]) {
        for dp in self.drain_ordered(n) {
            let mut candidates: Vec<Vec<f64>> =
                receivers.iter().map(|r| r.vec().to_vec()).collect();
            candidates.push(self.vec.clone());
            let ranked = knn(
                &dp.vec,
                candidates.iter().map(|v| v.as_slice()),
                1,
                self.knn_metric,
            );
            let placed = match ranked.first() {
                Some(&i) if i < receivers.len() => receivers[i].add_data_point(dp.clone()),
                _ => false,
            };
            if !placed {
                // Best fit was self, every receiver refused, or nothing
                // matched the dimension.
                let _ = self.add(dp);
            }
        }
    }

    /// Consumes the centroid into its parts (mean, datapoints). Used by the
    /// wire layer; similarity configuration stays behind.
    pub fn into_parts(self) -> (Vec<f64>, Vec<DataPoint>) {
        (self.vec, self.data_points)
    }

    /// The contained datapoints, in storage order.
    pub fn data_points(&self) -> &[DataPoint] {
        &self.data_points
    }
}

impl DataPointReceiver for Centroid {
    fn vec(&self) -> &[f64] {
        &self.vec
    }

    fn add_data_point(&mut self, dp: DataPoint) -> bool {
        self.add(dp).is_ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use vecmesh_core::vecmath::{vec_eq, vec_in};

    fn dp(v: &[f64]) -> DataPoint {
        DataPoint::new(v.to_vec(), Vec::new())
    }

    // Expires after `units` sleep units.
    fn dp_expiring(v: &[f64], units: i64) -> DataPoint {
        DataPoint::with_expiry(
            v.to_vec(),
            Vec::new(),
            Utc::now() + ChronoDuration::milliseconds(10 * units),
        )
    }

    fn sleep_unit() {
        std::thread::sleep(Duration::from_millis(15));
    }

    fn centroid(seed: &[f64]) -> Centroid {
        Centroid::new(seed.to_vec(), CentroidConfig::default())
    }

    fn vecs(dps: &[DataPoint]) -> Vec<Vec<f64>> {
        dps.iter().map(|d| d.vec.clone()).collect()
    }

    fn assert_mean_invariant(c: &Centroid) {
        if c.len_dp() == 0 {
            return;
        }
        let expected =
            vecmesh_core::vecmath::mean(c.data_points().iter().map(|d| d.vec.as_slice())).unwrap();
        for (a, b) in c.vec().iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9, "mean drifted: {:?} vs {expected:?}", c.vec());
        }
    }

    #[test]
    fn test_add_moves_mean() {
        // Seed vector does not matter once datapoints arrive.
        let mut c = centroid(&[1.0, 1.0]);

        c.add(dp(&[3.0, 3.0])).unwrap();
        assert!(vec_eq(c.vec(), &[3.0, 3.0]));

        // (3,3) + (5,5) -> (4,4)
        c.add(dp(&[5.0, 5.0])).unwrap();
        assert!(vec_eq(c.vec(), &[4.0, 4.0]));
        assert_eq!(c.len_dp(), 2);
    }

    #[test]
    fn test_add_rejects_dimension_mismatch() {
        let mut c = centroid(&[1.0, 1.0]);
        let err = c.add(dp(&[1.0])).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { want: 2, got: 1 });
        assert_eq!(c.len_dp(), 0);
        assert!(vec_eq(c.vec(), &[1.0, 1.0]));
    }

    #[test]
    fn test_add_rejects_expired() {
        let mut c = centroid(&[1.0, 1.0]);
        c.add(dp_expiring(&[2.0, 2.0], 1)).unwrap();
        sleep_unit();
        let err = c.add(dp_expiring(&[3.0, 3.0], -1)).unwrap_err();
        assert_eq!(err, IndexError::Expired);
        assert_eq!(c.len_dp(), 1);
    }

    #[test]
    fn test_rm_backs_mean_out() {
        let mut c = centroid(&[0.0, 0.0]);
        for v in [[2.0, 2.0], [4.0, 4.0], [6.0, 6.0], [8.0, 8.0]] {
            c.add(dp(&v)).unwrap();
        }
        assert!(vec_eq(c.vec(), &[5.0, 5.0]));

        c.rm(3);
        assert_mean_invariant(&c);
        assert!(vec_eq(c.vec(), &[4.0, 4.0]));

        c.rm(0);
        assert!(vec_eq(c.vec(), &[5.0, 5.0]));

        c.rm(0);
        assert!(vec_eq(c.vec(), &[6.0, 6.0]));

        // Last removal leaves the mean untouched.
        c.rm(0);
        assert!(vec_eq(c.vec(), &[6.0, 6.0]));
        assert_eq!(c.len_dp(), 0);
    }

    #[test]
    fn test_drain_unordered_skips_expired() {
        let mut c = centroid(&[1.0, 1.0]);
        c.add(dp_expiring(&[2.0, 2.0], 1)).unwrap();
        c.add(dp(&[3.0, 3.0])).unwrap();
        c.add(dp(&[4.0, 4.0])).unwrap();

        sleep_unit();
        let drained = c.drain_unordered(1);
        assert_eq!(drained.len(), 1);
        assert!(vec_eq(&drained[0].vec, &[3.0, 3.0]));
        assert_eq!(c.len_dp(), 1);
        assert!(vec_eq(&c.data_points()[0].vec, &[4.0, 4.0]));
        assert_mean_invariant(&c);
    }

    #[test]
    fn test_drain_unordered_empty_keeps_mean() {
        let mut c = centroid(&[0.0, 0.0]);
        c.add(dp(&[2.0, 4.0])).unwrap();
        let drained = c.drain_unordered(5);
        assert_eq!(drained.len(), 1);
        assert!(vec_eq(c.vec(), &[2.0, 4.0]));
    }

    #[test]
    fn test_drain_ordered_prefers_outliers() {
        let mut c = centroid(&[0.0, 0.0]);
        for _ in 0..3 {
            c.add(dp(&[1.0, 3.0])).unwrap();
        }
        c.add(dp(&[1.0, 9.0])).unwrap();
        c.add(dp(&[5.0, 5.0])).unwrap();

        let drained = c.drain_ordered(2);
        assert_eq!(drained.len(), 2);
        assert!(vec_in(&[1.0, 9.0], &vecs(&drained)));
        assert!(vec_in(&[5.0, 5.0], &vecs(&drained)));

        assert_eq!(c.len_dp(), 3);
        for dp in c.data_points() {
            assert!(vec_eq(&dp.vec, &[1.0, 3.0]));
        }
        assert_mean_invariant(&c);
    }

    #[test]
    fn test_drain_ordered_drops_expired_uncounted() {
        let mut c = centroid(&[1.0, 1.0]);
        // The expired datapoint is the furthest but must not count.
        c.add(dp_expiring(&[1.0, 4.0], 1)).unwrap();
        c.add(dp(&[1.0, 2.0])).unwrap();
        c.add(dp(&[1.0, 3.0])).unwrap();

        sleep_unit();
        let drained = c.drain_ordered(1);
        assert_eq!(drained.len(), 1);
        assert!(vec_eq(&drained[0].vec, &[1.0, 3.0]));
        assert_eq!(c.len_dp(), 1);
        assert!(vec_eq(&c.data_points()[0].vec, &[1.0, 2.0]));
    }

    #[test]
    fn test_expire() {
        let mut c = centroid(&[1.0, 1.0]);
        c.add(dp_expiring(&[2.0, 2.0], 1)).unwrap();
        c.add(dp_expiring(&[3.0, 3.0], 100)).unwrap();
        c.add(dp_expiring(&[4.0, 4.0], 1)).unwrap();

        sleep_unit();
        c.expire();
        assert_eq!(c.len_dp(), 1);
        assert!(vec_eq(&c.data_points()[0].vec, &[3.0, 3.0]));
        assert_mean_invariant(&c);
    }

    #[test]
    fn test_move_vector() {
        let mut c = centroid(&[0.0, 0.0]);
        c.add(dp(&[1.0, 1.0])).unwrap();
        c.add(dp(&[3.0, 3.0])).unwrap();
        assert!(c.move_vector());
        assert!(vec_eq(c.vec(), &[2.0, 2.0]));

        let mut empty = centroid(&[1.0, 1.0]);
        assert!(!empty.move_vector());
    }

    #[test]
    fn test_mem_trim_shrinks_and_expires() {
        let mut c = Centroid::new(
            vec![1.0, 1.0],
            CentroidConfig {
                capacity: 64,
                ..CentroidConfig::default()
            },
        );
        c.add(dp_expiring(&[2.0, 2.0], 1)).unwrap();
        c.add(dp(&[3.0, 3.0])).unwrap();
        sleep_unit();
        c.mem_trim();
        assert_eq!(c.len_dp(), 1);
        assert!(c.data_points.capacity() <= 2);
    }

    #[test]
    fn test_knn_lookup_drain() {
        let mut c = centroid(&[0.0, 0.0, 0.0]);
        c.add(dp(&[1.0, 2.0, 3.0])).unwrap();
        c.add(dp(&[1.0, 3.0, 4.0])).unwrap();

        let found = c.knn_lookup(&[1.0, 1.0, 1.0], 1, true);
        assert_eq!(found.len(), 1);
        assert!(vec_eq(&found[0].vec, &[1.0, 2.0, 3.0]));
        assert_eq!(c.len_dp(), 1);
        assert_mean_invariant(&c);
    }

    #[test]
    fn test_knn_lookup_without_drain_keeps_contents() {
        let mut c = centroid(&[0.0, 0.0]);
        c.add(dp(&[1.0, 2.0])).unwrap();
        let found = c.knn_lookup(&[1.0, 2.0], 1, false);
        assert_eq!(found.len(), 1);
        assert_eq!(c.len_dp(), 1);
    }

    #[test]
    fn test_distribute_routes_to_nearest_receiver() {
        let mut r1 = centroid(&[1.0, 2.0]);
        let mut r2 = centroid(&[1.0, 3.0]);

        let mut sender = centroid(&[1.0, 1.0]);
        sender.add(dp(&[1.0, 2.0])).unwrap();
        sender.add(dp(&[1.0, 3.0])).unwrap();

        {
            let mut receivers: Vec<&mut dyn DataPointReceiver> = vec![&mut r1, &mut r2];
            sender.distribute(2, &mut receivers);
        }

        assert_eq!(sender.len_dp(), 0);
        assert_eq!(r1.len_dp(), 1);
        assert_eq!(r2.len_dp(), 1);
        assert!(vec_eq(&r1.data_points()[0].vec, &[1.0, 2.0]));
        assert!(vec_eq(&r2.data_points()[0].vec, &[1.0, 3.0]));
    }

    #[test]
    fn test_distribute_without_receivers_loses_nothing() {
        let mut sender = centroid(&[1.0, 1.0]);
        sender.add(dp(&[1.0, 2.0])).unwrap();
        sender.add(dp(&[1.0, 9.0])).unwrap();

        let mut receivers: Vec<&mut dyn DataPointReceiver> = vec![];
        sender.distribute(2, &mut receivers);
        assert_eq!(sender.len_dp(), 2);
        assert_mean_invariant(&sender);
    }

    #[test]
    fn test_distribute_on_refusal_readds() {
        // Receiver with a different dimension refuses everything.
        let mut r1 = centroid(&[1.0]);
        let mut sender = centroid(&[1.0, 1.0]);
        sender.add(dp(&[1.0, 2.0])).unwrap();

        let mut receivers: Vec<&mut dyn DataPointReceiver> = vec![&mut r1];
        sender.distribute(1, &mut receivers);
        assert_eq!(sender.len_dp(), 1);
        assert_eq!(r1.len_dp(), 0);
    }

    #[test]
    fn test_from_wire_reseeds_mean() {
        let dps = vec![dp(&[1.0, 1.0]), dp(&[3.0, 3.0])];
        let c = Centroid::from_wire(dps, CentroidConfig::default()).unwrap();
        assert!(vec_eq(c.vec(), &[2.0, 2.0]));
        assert_eq!(c.len_dp(), 2);

        assert!(Centroid::from_wire(Vec::new(), CentroidConfig::default()).is_none());
    }
}
