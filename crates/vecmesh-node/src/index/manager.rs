//! The two-level index: a set of centroids plus a running mean-of-means.
//!
//! Two invariants hold simultaneously: every owned centroid keeps its own
//! mean invariant, and the manager's vector equals the unweighted mean of
//! the centroid means. The latter is maintained in O(d) per mutation through
//! the snapshot/apply protocol of [`CentroidManager::apply_vec_update`]
//! rather than recomputation.

use serde::{Deserialize, Serialize};
use vecmesh_core::search::{knn, Metric};
use vecmesh_core::{vecmath, DataPoint};

use super::{Centroid, CentroidConfig, DataPointReceiver};
use crate::error::{ConfigError, IndexError};

/// Construction parameters for a [`CentroidManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Seed for the manager vector before the first insert.
    pub init_vec: Vec<f64>,
    /// Initial capacity of the centroid storage.
    pub init_capacity: usize,
    /// Initial capacity of each centroid's datapoint storage.
    pub centroid_capacity: usize,
    /// Centroids reaching this many datapoints are split on insert.
    /// Zero disables auto-splitting.
    pub split_threshold: usize,
    /// Metric for nearest-neighbor ranking.
    pub knn_metric: Metric,
    /// Metric for furthest-neighbor ranking. Must agree with `knn_metric`.
    pub kfn_metric: Metric,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            init_vec: Vec::new(),
            init_capacity: 10,
            centroid_capacity: 10,
            split_threshold: 0,
            knn_metric: Metric::Cosine,
            kfn_metric: Metric::Cosine,
        }
    }
}

impl ManagerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.knn_metric != self.kfn_metric {
            return Err(ConfigError::MetricMismatch {
                knn: self.knn_metric,
                kfn: self.kfn_metric,
            });
        }
        Ok(())
    }

    fn centroid_config(&self) -> CentroidConfig {
        CentroidConfig {
            capacity: self.centroid_capacity,
            knn_metric: self.knn_metric,
            kfn_metric: self.kfn_metric,
        }
    }
}

/// A validated recipe for spawning managers. The node server holds one and
/// seeds a manager from it whenever an insert hits a namespace that does not
/// exist yet.
#[derive(Debug, Clone)]
pub struct ManagerFactory {
    config: ManagerConfig,
}

impl ManagerFactory {
    /// Validates the configuration once so spawning can never fail later.
    pub fn new(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Spawns a manager seeded with the given vector.
    pub fn spawn(&self, seed: Vec<f64>) -> CentroidManager {
        let mut config = self.config.clone();
        config.init_vec = seed;
        CentroidManager::from_validated(config)
    }

    /// The centroid configuration used for client-side re-seeding of wire
    /// centroids.
    pub fn centroid_config(&self) -> CentroidConfig {
        self.config.centroid_config()
    }
}

/// Owner of a set of centroids; routes inserts, answers KNN queries, and
/// keeps itself balanced through splits, merges and redistribution.
#[derive(Debug, Clone)]
pub struct CentroidManager {
    vec: Vec<f64>,
    centroids: Vec<Centroid>,
    split_threshold: usize,
    knn_metric: Metric,
    centroid_cfg: CentroidConfig,
}

impl CentroidManager {
    /// Creates a manager. Fails when the knn/kfn metrics disagree; mixing
    /// cosine with euclidean flips ordering semantics.
    pub fn new(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: ManagerConfig) -> Self {
        Self {
            vec: config.init_vec.clone(),
            centroids: Vec::with_capacity(config.init_capacity),
            split_threshold: config.split_threshold,
            knn_metric: config.knn_metric,
            centroid_cfg: config.centroid_config(),
        }
    }

    /// The manager's mean-of-means vector.
    pub fn vec(&self) -> &[f64] {
        &self.vec
    }

    /// Total datapoints across all centroids.
    pub fn len_dp(&self) -> usize {
        self.centroids.iter().map(|c| c.len_dp()).sum()
    }

    /// Number of owned centroids.
    pub fn len_centroids(&self) -> usize {
        self.centroids.len()
    }

    /// The owned centroids, in storage order.
    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// The centroid configuration this manager seeds new centroids from.
    pub fn centroid_config(&self) -> CentroidConfig {
        self.centroid_cfg
    }

    // =========================================================================
    // Vector maintenance
    // =========================================================================

    /// Applies the snapshot/apply protocol: with `old` being a centroid's
    /// mean before a mutation and `new` its mean afterwards,
    /// `V <- ((V*N) - old + new) / N` keeps the manager vector consistent
    /// without a full recomputation. Falls back to recomputing when the
    /// dimensions drifted apart (only possible through a mismatched seed).
    fn apply_vec_update(&mut self, old: &[f64], new: &[f64]) {
        let n = self.centroids.len() as f64;
        if n == 0.0 {
            return;
        }
        if old.len() != self.vec.len() || new.len() != self.vec.len() {
            self.recompute_vec();
            return;
        }
        vecmath::scale_assign(&mut self.vec, n);
        let _ = vecmath::sub_assign(&mut self.vec, old);
        let _ = vecmath::add_assign(&mut self.vec, new);
        vecmath::scale_assign(&mut self.vec, 1.0 / n);
    }

    /// Deletion variant: backs a removed centroid's mean out of the manager
    /// vector with N shifted down. `n_before` is the centroid count *before*
    /// the removal; the `n_before > 1` bounds check leaves the vector
    /// untouched when the last centroid goes away.
    fn apply_vec_removal(&mut self, removed: &[f64], n_before: usize) {
        if n_before <= 1 || removed.len() != self.vec.len() {
            return;
        }
        let n = n_before as f64;
        vecmath::scale_assign(&mut self.vec, n);
        let _ = vecmath::sub_assign(&mut self.vec, removed);
        vecmath::scale_assign(&mut self.vec, 1.0 / (n - 1.0));
    }

    /// Insertion variant: folds a newly appended centroid's mean into the
    /// manager vector with N shifted up. Call *before* pushing the centroid.
    fn apply_vec_insertion(&mut self, added: &[f64]) {
        let n = self.centroids.len() as f64;
        if n == 0.0 || added.len() != self.vec.len() {
            self.vec = added.to_vec();
            return;
        }
        vecmath::scale_assign(&mut self.vec, n);
        let _ = vecmath::add_assign(&mut self.vec, added);
        vecmath::scale_assign(&mut self.vec, 1.0 / (n + 1.0));
    }

    fn recompute_vec(&mut self) {
        if let Some(m) = vecmath::mean(self.centroids.iter().map(|c| c.vec())) {
            self.vec = m;
        }
    }

    // =========================================================================
    // Portioning
    // =========================================================================

    /// Divides a requested `n` across centroids as uniformly as possible,
    /// capped by each centroid's datapoint count. Sweeps repeatedly,
    /// assigning one unit per centroid-with-capacity, until either the sum
    /// reaches `n` or a full sweep assigns nothing.
    fn portions(&self, n: usize) -> Vec<usize> {
        let mut portions = vec![0usize; self.centroids.len()];
        if n == 0 {
            return portions;
        }
        let mut assigned = 0;
        loop {
            let assigned_before = assigned;
            for (i, centroid) in self.centroids.iter().enumerate() {
                if centroid.len_dp() >= portions[i] + 1 {
                    portions[i] += 1;
                    assigned += 1;
                }
                if assigned >= n {
                    return portions;
                }
            }
            if assigned_before == assigned {
                // A full sweep assigned nothing; the centroids are exhausted.
                return portions;
            }
        }
    }

    // =========================================================================
    // Inserts and splits
    // =========================================================================

    /// Routes a datapoint to the nearest centroid; seeds the first centroid
    /// from the datapoint itself when the manager is empty. A successful
    /// insert may trigger an auto-split of the target centroid once it
    /// reaches the configured threshold.
    pub fn add_data_point(&mut self, dp: DataPoint) -> Result<(), IndexError> {
        if dp.expired() {
            return Err(IndexError::Expired);
        }

        if self.centroids.is_empty() {
            let mut c = Centroid::new(dp.vec.clone(), self.centroid_cfg);
            c.add(dp)?;
            self.vec = c.vec().to_vec();
            self.centroids.push(c);
            return Ok(());
        }

        let ranked = knn(
            &dp.vec,
            self.centroids.iter().map(|c| c.vec()),
            1,
            self.knn_metric,
        );
        let target = match ranked.first() {
            Some(&i) => i,
            // No centroid vector matched the datapoint's dimension.
            None => {
                return Err(IndexError::DimensionMismatch {
                    want: self.vec.len(),
                    got: dp.dim(),
                })
            }
        };

        let old = self.centroids[target].vec().to_vec();
        self.centroids[target].add(dp)?;
        let new = self.centroids[target].vec().to_vec();
        self.apply_vec_update(&old, &new);

        if self.split_threshold > 0 && self.centroids[target].len_dp() >= self.split_threshold {
            if let Some(split_off) = self.split_centroid(target, self.split_threshold / 2) {
                self.apply_vec_insertion(split_off.vec());
                self.centroids.push(split_off);
            }
        }
        Ok(())
    }

    /// Splits the centroid at `index`: a new centroid is seeded with the
    /// same mean and receives up to `trim_n` datapoints drained unordered
    /// from the old one. The caller appends the returned centroid. `trim_n`
    /// of zero is a no-op, which is what disables auto-splits when the
    /// threshold is unset.
    fn split_centroid(&mut self, index: usize, trim_n: usize) -> Option<Centroid> {
        if index >= self.centroids.len() || trim_n == 0 {
            return None;
        }
        let mut split_off = Centroid::new(self.centroids[index].vec().to_vec(), self.centroid_cfg);
        let old = self.centroids[index].vec().to_vec();
        for dp in self.centroids[index].drain_unordered(trim_n) {
            let _ = split_off.add(dp);
        }
        let new = self.centroids[index].vec().to_vec();
        self.apply_vec_update(&old, &new);
        Some(split_off)
    }

    /// Appends a whole centroid (the receiving half of a steal), folding its
    /// mean into the manager vector.
    pub fn push_centroid(&mut self, centroid: Centroid) {
        if self.centroids.is_empty() {
            self.vec = centroid.vec().to_vec();
        } else {
            self.apply_vec_insertion(centroid.vec());
        }
        self.centroids.push(centroid);
    }

    // =========================================================================
    // Drains, expiry, trimming
    // =========================================================================

    /// Drains up to `n` datapoints, portioned uniformly across centroids,
    /// in no particular order.
    pub fn drain_unordered(&mut self, n: usize) -> Vec<DataPoint> {
        let mut res = Vec::with_capacity(n);
        for (i, portion) in self.portions(n).into_iter().enumerate() {
            if portion == 0 {
                continue;
            }
            let old = self.centroids[i].vec().to_vec();
            res.extend(self.centroids[i].drain_unordered(portion));
            let new = self.centroids[i].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
        res
    }

    /// Drains up to `n` worst-fit datapoints, portioned uniformly across
    /// centroids.
    pub fn drain_ordered(&mut self, n: usize) -> Vec<DataPoint> {
        let mut res = Vec::with_capacity(n);
        for (i, portion) in self.portions(n).into_iter().enumerate() {
            if portion == 0 {
                continue;
            }
            let old = self.centroids[i].vec().to_vec();
            res.extend(self.centroids[i].drain_ordered(portion));
            let new = self.centroids[i].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
        res
    }

    /// Removes every expired datapoint in every centroid.
    pub fn expire(&mut self) {
        for i in 0..self.centroids.len() {
            let old = self.centroids[i].vec().to_vec();
            self.centroids[i].expire();
            let new = self.centroids[i].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
    }

    /// Trims every centroid's storage to its live count, then deletes
    /// centroids that trimmed down to empty.
    pub fn mem_trim(&mut self) {
        for i in 0..self.centroids.len() {
            let old = self.centroids[i].vec().to_vec();
            self.centroids[i].mem_trim();
            let new = self.centroids[i].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
        for i in (0..self.centroids.len()).rev() {
            if self.centroids[i].len_dp() == 0 {
                let n_before = self.centroids.len();
                let removed = self.centroids.remove(i);
                self.apply_vec_removal(removed.vec(), n_before);
            }
        }
        self.centroids.shrink_to_fit();
    }

    /// Recomputes every centroid mean and then the manager vector from
    /// scratch. Returns false when there are no centroids to average.
    pub fn move_vector(&mut self) -> bool {
        for centroid in self.centroids.iter_mut() {
            centroid.move_vector();
        }
        match vecmath::mean(self.centroids.iter().map(|c| c.vec())) {
            Some(m) => {
                self.vec = m;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Finds the `k` datapoints nearest to `target`, walking centroids in
    /// nearest-first order and accumulating from each. With `drain` the
    /// result is removed from storage - exactly `k`, no more: a centroid
    /// that over-returns after the budget is met gets the excess re-added.
    pub fn knn_lookup(&mut self, target: &[f64], k: usize, drain: bool) -> Vec<DataPoint> {
        let mut res = Vec::with_capacity(k);
        let ranked = knn(
            target,
            self.centroids.iter().map(|c| c.vec()),
            k,
            self.knn_metric,
        );
        for index in ranked {
            if res.len() >= k {
                break;
            }
            let old = self.centroids[index].vec().to_vec();
            let found = self.centroids[index].knn_lookup(target, k - res.len(), drain);
            for dp in found {
                if res.len() < k {
                    res.push(dp);
                } else if drain {
                    // Budget met; drained excess goes back where it came from.
                    let _ = self.centroids[index].add(dp);
                } else {
                    break;
                }
            }
            let new = self.centroids[index].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
        res
    }

    /// Returns the `n` centroids nearest to `target`, nearest-first. With
    /// `drain` the centroids are removed from the manager (deletion-variant
    /// vector updates applied per removal); otherwise they are cloned.
    pub fn nearest_centroids(&mut self, target: &[f64], n: usize, drain: bool) -> Vec<Centroid> {
        let ranked = knn(
            target,
            self.centroids.iter().map(|c| c.vec()),
            n,
            self.knn_metric,
        );
        if !drain {
            return ranked
                .into_iter()
                .map(|i| self.centroids[i].clone())
                .collect();
        }
        let mut tagged: Vec<(usize, usize)> = ranked.into_iter().enumerate().collect();
        tagged.sort_by(|a, b| b.1.cmp(&a.1));
        let mut out: Vec<Option<Centroid>> = (0..tagged.len()).map(|_| None).collect();
        for (rank, index) in tagged {
            let n_before = self.centroids.len();
            let removed = self.centroids.remove(index);
            self.apply_vec_removal(removed.vec(), n_before);
            out[rank] = Some(removed);
        }
        out.into_iter().flatten().collect()
    }

    /// The mean vector of the centroid nearest to `target`, if any centroid
    /// matches the dimension.
    pub fn nearest_centroid_vec(&self, target: &[f64]) -> Option<Vec<f64>> {
        let ranked = knn(
            target,
            self.centroids.iter().map(|c| c.vec()),
            1,
            self.knn_metric,
        );
        ranked.first().map(|&i| self.centroids[i].vec().to_vec())
    }

    // =========================================================================
    // Maintenance: redistribution, splits, merges
    // =========================================================================

    /// Drains up to `n` datapoints (portioned across centroids) and lets
    /// each centroid hand its share to whichever sibling fits best.
    /// Cross-centroid mean shifts are frequent here, so the manager vector
    /// is recomputed in bulk afterwards instead of per mutation.
    pub fn distribute_internal(&mut self, n: usize) {
        for (i, portion) in self.portions(n).into_iter().enumerate() {
            if portion == 0 {
                continue;
            }
            let (before, rest) = self.centroids.split_at_mut(i);
            let (sender, after) = match rest.split_first_mut() {
                Some(split) => split,
                None => continue,
            };
            let mut receivers: Vec<&mut dyn DataPointReceiver> = before
                .iter_mut()
                .map(|c| c as &mut dyn DataPointReceiver)
                .chain(after.iter_mut().map(|c| c as &mut dyn DataPointReceiver))
                .collect();
            sender.distribute(portion, &mut receivers);
        }
        self.move_vector();
    }

    /// Splits every centroid satisfying `pred` at half its datapoint count.
    /// New centroids are appended after the sweep.
    pub fn split_centroids<F>(&mut self, pred: F)
    where
        F: Fn(&Centroid) -> bool,
    {
        let mut split_offs = Vec::new();
        for i in 0..self.centroids.len() {
            if !pred(&self.centroids[i]) {
                continue;
            }
            let half = self.centroids[i].len_dp() / 2;
            if let Some(split_off) = self.split_centroid(i, half) {
                split_offs.push(split_off);
            }
        }
        for split_off in split_offs {
            self.apply_vec_insertion(split_off.vec());
            self.centroids.push(split_off);
        }
    }

    /// Merges every centroid satisfying `pred` with its nearest unmarked
    /// siblings until the predicate stops holding for it. Absorbed siblings
    /// are marked and deleted after the sweep in descending index order.
    /// A centroid never merges with itself and never re-absorbs a sibling
    /// that is already marked.
    pub fn merge_centroids<F>(&mut self, pred: F)
    where
        F: Fn(&Centroid) -> bool,
    {
        let mut marked = vec![false; self.centroids.len()];
        for i in 0..self.centroids.len() {
            if marked[i] || !pred(&self.centroids[i]) {
                continue;
            }
            let old = self.centroids[i].vec().to_vec();
            let ranked = knn(
                &old,
                self.centroids.iter().map(|c| c.vec()),
                self.centroids.len(),
                self.knn_metric,
            );
            for other in ranked {
                // Tolerate self-reference in the ranking and skip anything
                // already absorbed.
                if other == i || marked[other] {
                    continue;
                }
                marked[other] = true;
                let dps = {
                    let sibling = &mut self.centroids[other];
                    sibling.drain_unordered(sibling.len_dp())
                };
                for dp in dps {
                    let _ = self.centroids[i].add(dp);
                }
                if !pred(&self.centroids[i]) {
                    break;
                }
            }
            let new = self.centroids[i].vec().to_vec();
            self.apply_vec_update(&old, &new);
        }
        for i in (0..self.centroids.len()).rev() {
            if marked[i] {
                let n_before = self.centroids.len();
                let removed = self.centroids.remove(i);
                self.apply_vec_removal(removed.vec(), n_before);
            }
        }
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

    fn manager(init_vec: &[f64]) -> CentroidManager {
        manager_with_threshold(init_vec, 0)
    }

    fn manager_with_threshold(init_vec: &[f64], split_threshold: usize) -> CentroidManager {
        CentroidManager::new(ManagerConfig {
            init_vec: init_vec.to_vec(),
            split_threshold,
            ..ManagerConfig::default()
        })
        .unwrap()
    }

    fn centroid_from<V: AsRef<[f64]>>(vecs: &[V]) -> Centroid {
        let mut c = Centroid::new(vecs[0].as_ref().to_vec(), CentroidConfig::default());
        for v in vecs {
            c.add(dp(v.as_ref())).unwrap();
        }
        c
    }

    fn assert_vec_invariant(cm: &CentroidManager) {
        if cm.len_centroids() == 0 {
            return;
        }
        let expected = vecmath::mean(cm.centroids().iter().map(|c| c.vec())).unwrap();
        for (a, b) in cm.vec().iter().zip(expected.iter()) {
            assert!(
                (a - b).abs() < 1e-9,
                "manager vec drifted: {:?} vs {expected:?}",
                cm.vec()
            );
        }
    }

    #[test]
    fn test_metric_mismatch_is_fatal() {
        let err = CentroidManager::new(ManagerConfig {
            knn_metric: Metric::Cosine,
            kfn_metric: Metric::Euclidean,
            ..ManagerConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MetricMismatch { .. }));
    }

    #[test]
    fn test_first_insert_seeds_centroid() {
        let mut cm = manager(&[]);
        cm.add_data_point(dp(&[1.0, 2.0])).unwrap();
        assert_eq!(cm.len_centroids(), 1);
        assert_eq!(cm.len_dp(), 1);
        assert!(vec_eq(cm.vec(), &[1.0, 2.0]));
    }

    #[test]
    fn test_insert_routes_to_nearest_centroid() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));
        cm.recompute_vec();

        cm.add_data_point(dp(&[1.0, 8.0])).unwrap();
        assert_eq!(cm.centroids()[0].len_dp(), 1);
        assert_eq!(cm.centroids()[1].len_dp(), 2);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_insert_rejects_expired() {
        let mut cm = manager(&[]);
        cm.add_data_point(dp_expiring(&[1.0], 1)).unwrap();
        sleep_unit();
        let err = cm.add_data_point(dp_expiring(&[1.0], -1)).unwrap_err();
        assert_eq!(err, IndexError::Expired);
        assert_eq!(cm.len_dp(), 1);
    }

    #[test]
    fn test_auto_split_on_threshold() {
        let mut cm = manager_with_threshold(&[], 2);
        cm.add_data_point(dp(&[1.0, 1.0])).unwrap();
        cm.add_data_point(dp(&[2.0, 2.0])).unwrap();
        assert_eq!(cm.len_centroids(), 2);
        assert_eq!(cm.len_dp(), 2);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_zero_threshold_disables_auto_split() {
        let mut cm = manager(&[]);
        for i in 0..20 {
            cm.add_data_point(dp(&[1.0, i as f64])).unwrap();
        }
        assert_eq!(cm.len_centroids(), 1);
    }

    #[test]
    fn test_portions_uniform_and_capped() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0]; 3]));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));
        cm.recompute_vec();

        // Capped by capacity: sum(portions) = min(n, total).
        let p = cm.portions(10);
        assert_eq!(p, vec![3, 1]);

        let p = cm.portions(2);
        assert_eq!(p.iter().sum::<usize>(), 2);
        assert!(p.iter().all(|&x| x <= 3));

        let p = cm.portions(0);
        assert_eq!(p.iter().sum::<usize>(), 0);
    }

    #[test]
    fn test_drain_unordered_portions_evenly() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0], [1.0, 2.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 8.0], [1.0, 9.0]]));
        cm.recompute_vec();

        let drained = cm.drain_unordered(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(cm.centroids()[0].len_dp(), 1);
        assert_eq!(cm.centroids()[1].len_dp(), 1);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_drain_ordered_takes_worst_fit() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids
            .push(centroid_from(&[[1.0, 3.0], [1.0, 3.0], [1.0, 9.0]]));
        cm.recompute_vec();

        let drained = cm.drain_ordered(1);
        assert_eq!(drained.len(), 1);
        assert!(vec_eq(&drained[0].vec, &[1.0, 9.0]));
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_expire_updates_vec() {
        let mut cm = manager(&[]);
        cm.add_data_point(dp(&[1.0, 1.0])).unwrap();
        cm.add_data_point(dp_expiring(&[1.0, 9.0], 1)).unwrap();
        sleep_unit();
        cm.expire();
        assert_eq!(cm.len_dp(), 1);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_mem_trim_deletes_empty_centroids() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids
            .push(Centroid::new(vec![1.0, 1.0], CentroidConfig::default()));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));
        cm.recompute_vec();

        cm.mem_trim();
        assert_eq!(cm.len_centroids(), 1);
        assert!(vec_eq(cm.centroids()[0].vec(), &[1.0, 9.0]));
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_mem_trim_single_centroid_to_empty_keeps_vec() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids
            .push(Centroid::new(vec![2.0, 3.0], CentroidConfig::default()));
        cm.vec = vec![2.0, 3.0];

        cm.mem_trim();
        assert_eq!(cm.len_centroids(), 0);
        assert!(vec_eq(cm.vec(), &[2.0, 3.0]));
    }

    #[test]
    fn test_move_vector() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0]]));
        cm.centroids.push(centroid_from(&[[3.0, 3.0]]));

        assert!(cm.move_vector());
        assert!(vec_eq(cm.vec(), &[2.0, 2.0]));

        let mut empty = manager(&[1.0]);
        assert!(!empty.move_vector());
    }

    #[test]
    fn test_knn_lookup_drains_exactly_k() {
        let mut cm = manager(&[]);
        for v in [[1.0, 2.0], [1.0, 3.0], [1.0, 9.0]] {
            cm.add_data_point(dp(&v)).unwrap();
        }
        let found = cm.knn_lookup(&[1.0, 1.0], 2, true);
        assert_eq!(found.len(), 2);
        assert_eq!(cm.len_dp(), 1);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_knn_lookup_without_drain() {
        let mut cm = manager(&[]);
        cm.add_data_point(dp(&[1.0, 2.0])).unwrap();
        cm.add_data_point(dp(&[1.0, 9.0])).unwrap();

        let found = cm.knn_lookup(&[1.0, 3.0], 1, false);
        assert_eq!(found.len(), 1);
        assert!(vec_eq(&found[0].vec, &[1.0, 2.0]));
        assert_eq!(cm.len_dp(), 2);
    }

    #[test]
    fn test_nearest_centroids_drain_removes() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 4.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));
        cm.recompute_vec();

        let nearest = cm.nearest_centroids(&[1.0, 3.0], 1, true);
        assert_eq!(nearest.len(), 1);
        assert!(vec_eq(nearest[0].vec(), &[1.0, 4.0]));
        assert_eq!(cm.len_centroids(), 1);
        assert!(vec_eq(cm.centroids()[0].vec(), &[1.0, 9.0]));
    }

    #[test]
    fn test_nearest_centroid_vec() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));

        let v = cm.nearest_centroid_vec(&[1.0, 9.0]).unwrap();
        assert!(vec_eq(&v, &[1.0, 9.0]));

        let empty = manager(&[0.0, 0.0]);
        assert!(empty.nearest_centroid_vec(&[1.0, 1.0]).is_none());
    }

    #[test]
    fn test_distribute_internal_moves_misfits() {
        let mut cm = manager(&[0.0]);
        // dp4 sits in c1 but belongs with c2; dp8 vice versa.
        let c1 = centroid_from(&[[1.0, 3.0], [1.0, 3.0], [1.0, 3.0], [1.0, 9.0]]);
        let c2 = centroid_from(&[[1.0, 9.0], [1.0, 9.0], [1.0, 9.0], [1.0, 3.0]]);
        cm.centroids.push(c1);
        cm.centroids.push(c2);
        cm.recompute_vec();

        cm.distribute_internal(2);

        let c1_vecs: Vec<Vec<f64>> = cm.centroids()[0]
            .data_points()
            .iter()
            .map(|d| d.vec.clone())
            .collect();
        let c2_vecs: Vec<Vec<f64>> = cm.centroids()[1]
            .data_points()
            .iter()
            .map(|d| d.vec.clone())
            .collect();

        assert_eq!(c1_vecs.len(), 4);
        assert_eq!(c2_vecs.len(), 4);
        assert!(!vec_in(&[1.0, 9.0], &c1_vecs));
        assert!(!vec_in(&[1.0, 3.0], &c2_vecs));
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_split_centroids_by_predicate() {
        let mut cm = manager(&[0.0]);
        let c = centroid_from(&[[1.0]; 4]);
        cm.centroids.push(c);
        cm.recompute_vec();

        cm.split_centroids(|c| c.len_dp() > 0 && c.len_dp() < 5);
        assert_eq!(cm.len_centroids(), 2);
        assert_eq!(cm.centroids()[0].len_dp(), 2);
        assert_eq!(cm.centroids()[1].len_dp(), 2);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_merge_centroids_absorbs_nearest() {
        let mut cm = manager(&[0.0, 0.0]);
        let c1 = centroid_from(&[[1.0, 1.0]]);
        let c2 = centroid_from(&[[1.0, 9.0]]);
        let mut c3 = Centroid::new(vec![1.0, 2.0], CentroidConfig::default());
        c3.add(dp(&[1.0, 2.0])).unwrap();
        c3.add(dp(&[1.0, 2.0])).unwrap();
        cm.centroids.push(c1);
        cm.centroids.push(c2);
        cm.centroids.push(c3);
        cm.recompute_vec();

        // Only the two-dp centroid merges; its nearest sibling is c1.
        cm.merge_centroids(|c| c.len_dp() == 2);

        assert_eq!(cm.len_centroids(), 2);
        assert_eq!(cm.len_dp(), 4);
        // c1 was absorbed; the survivor holding 3 dps is the old c3.
        assert_eq!(cm.centroids()[1].len_dp(), 3);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_merge_all_into_one() {
        let mut cm = manager(&[0.0, 0.0]);
        for v in [[1.0, 1.0], [1.0, 2.0], [1.0, 3.0]] {
            cm.centroids.push(centroid_from(&[v]));
        }
        cm.recompute_vec();

        cm.merge_centroids(|_| true);
        assert_eq!(cm.len_centroids(), 1);
        assert_eq!(cm.len_dp(), 3);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_push_centroid_updates_vec() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.push_centroid(centroid_from(&[[1.0, 1.0]]));
        assert!(vec_eq(cm.vec(), &[1.0, 1.0]));

        cm.push_centroid(centroid_from(&[[3.0, 3.0]]));
        assert!(vec_eq(cm.vec(), &[2.0, 2.0]));
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_drains_on_empty_manager() {
        let mut cm = manager(&[1.0, 1.0]);
        assert!(cm.drain_unordered(5).is_empty());
        assert!(cm.drain_ordered(5).is_empty());
        assert!(cm.knn_lookup(&[1.0, 1.0], 3, true).is_empty());
        assert!(cm.nearest_centroids(&[1.0, 1.0], 1, true).is_empty());
        assert!(vec_eq(cm.vec(), &[1.0, 1.0]));
    }

    #[test]
    fn test_knn_lookup_spans_centroids() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 2.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 3.0]]));
        cm.recompute_vec();

        // k exceeds what the nearest centroid holds; the walk continues
        // into the next one.
        let found = cm.knn_lookup(&[1.0, 2.0], 2, false);
        assert_eq!(found.len(), 2);
        assert!(vec_eq(&found[0].vec, &[1.0, 2.0]));
        assert!(vec_eq(&found[1].vec, &[1.0, 3.0]));
        assert_eq!(cm.len_dp(), 2);
    }

    #[test]
    fn test_nearest_centroids_without_drain_clones() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 4.0]]));
        cm.recompute_vec();

        let nearest = cm.nearest_centroids(&[1.0, 4.0], 1, false);
        assert_eq!(nearest.len(), 1);
        assert_eq!(cm.len_centroids(), 1);
    }

    #[test]
    fn test_merge_noop_when_nothing_matches() {
        let mut cm = manager(&[0.0, 0.0]);
        cm.centroids.push(centroid_from(&[[1.0, 1.0]]));
        cm.centroids.push(centroid_from(&[[1.0, 9.0]]));
        cm.recompute_vec();

        cm.merge_centroids(|c| c.len_dp() > 100);
        assert_eq!(cm.len_centroids(), 2);
        assert_vec_invariant(&cm);
    }

    #[test]
    fn test_split_skips_singleton_centroids() {
        let mut cm = manager(&[0.0]);
        cm.centroids.push(centroid_from(&[[1.0]]));
        cm.recompute_vec();

        // len/2 == 0, so the split is a no-op rather than an empty twin.
        cm.split_centroids(|_| true);
        assert_eq!(cm.len_centroids(), 1);
    }

    #[test]
    fn test_randomized_operations_keep_invariants() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut cm = manager_with_threshold(&[], 8);
        let mut live: i64 = 0;

        for step in 0..400 {
            match rng.gen_range(0..8) {
                0..=3 => {
                    let v = vec![rng.gen_range(0.1..1.0), rng.gen_range(0.1..1.0)];
                    if cm.add_data_point(dp(&v)).is_ok() {
                        live += 1;
                    }
                }
                4 => {
                    let n = rng.gen_range(0..4);
                    live -= cm.drain_unordered(n).len() as i64;
                }
                5 => {
                    let n = rng.gen_range(0..4);
                    live -= cm.drain_ordered(n).len() as i64;
                }
                6 => cm.distribute_internal(rng.gen_range(0..16)),
                _ => {
                    if rng.gen_bool(0.5) {
                        cm.merge_centroids(|c| c.len_dp() < 3);
                    } else {
                        cm.mem_trim();
                    }
                }
            }

            assert_eq!(cm.len_dp() as i64, live, "lost or duplicated dps at step {step}");
            assert_vec_invariant(&cm);
            for c in cm.centroids() {
                if c.len_dp() == 0 {
                    continue;
                }
                let expected =
                    vecmath::mean(c.data_points().iter().map(|d| d.vec.as_slice())).unwrap();
                for (a, b) in c.vec().iter().zip(expected.iter()) {
                    assert!((a - b).abs() < 1e-6, "centroid mean drifted at step {step}");
                }
            }
        }
    }

    #[test]
    fn test_no_silent_loss_across_add_and_drain() {
        let mut cm = manager_with_threshold(&[], 4);
        let mut inserted = Vec::new();
        for i in 0..32 {
            let v = vec![1.0, (i % 7) as f64];
            inserted.push(v.clone());
            cm.add_data_point(dp(&v)).unwrap();
        }
        let mut drained = cm.drain_unordered(100);
        drained.extend(cm.drain_ordered(100));
        assert_eq!(drained.len(), 32);
        for d in &drained {
            assert!(vec_in(&d.vec, &inserted));
        }
        assert_eq!(cm.len_dp(), 0);
    }
}
