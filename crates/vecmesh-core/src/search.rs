//! Linear k-nearest / k-furthest search over vector streams.
//!
//! One brute-force routine serves both directions. The [`Metric`] enum
//! carries the scoring function *and* its ordering direction, so nearest vs
//! furthest never flips semantics behind a caller's back: cosine similarity
//! ranks greater-is-nearer, euclidean distance ranks smaller-is-nearer.

use serde::{Deserialize, Serialize};

use crate::vecmath;

/// Similarity measure used for ranking vectors.
///
/// Cosine is the system default; euclidean is not a drop-in replacement
/// because the two order their scores in opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity; greater score means nearer.
    #[default]
    Cosine,
    /// Euclidean distance; smaller score means nearer.
    Euclidean,
}

impl Metric {
    /// Scores a candidate against the target. `None` on dimension mismatch.
    pub fn score(&self, target: &[f64], candidate: &[f64]) -> Option<f64> {
        match self {
            Metric::Cosine => vecmath::cosine_similarity(target, candidate),
            Metric::Euclidean => vecmath::euclidean_distance(target, candidate),
        }
    }

    /// True when a greater score means a nearer candidate.
    pub fn greater_is_nearer(&self) -> bool {
        matches!(self, Metric::Cosine)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// A scored candidate kept while sweeping the stream.
#[derive(Clone, Copy)]
struct Ranked {
    index: usize,
    score: f64,
}

/// Brute-force top-k sweep. `prefer_greater` selects which end of the score
/// ordering counts as "best". Candidates whose score is undefined (dimension
/// mismatch) are skipped but still consume their stream index.
fn rank<'a, I>(target: &[f64], vecs: I, k: usize, metric: Metric, prefer_greater: bool) -> Vec<usize>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut best: Vec<Ranked> = Vec::with_capacity(k + 1);
    for (index, candidate) in vecs.into_iter().enumerate() {
        let score = match metric.score(target, candidate) {
            Some(s) => s,
            None => continue,
        };
        // Insert after equal scores so ties break toward the earlier index.
        let pos = best
            .iter()
            .position(|r| {
                if prefer_greater {
                    score > r.score
                } else {
                    score < r.score
                }
            })
            .unwrap_or(best.len());
        if pos < k {
            best.insert(pos, Ranked { index, score });
            best.truncate(k);
        }
    }
    best.into_iter().map(|r| r.index).collect()
}

/// Finds the indices of the `k` vectors in `vecs` nearest to `target`,
/// best-first. Indices refer to the traversal order of `vecs`.
pub fn knn<'a, I>(target: &[f64], vecs: I, k: usize, metric: Metric) -> Vec<usize>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    rank(target, vecs, k, metric, metric.greater_is_nearer())
}

/// Counterpart of [`knn`] that finds the `k` vectors furthest from `target`.
pub fn kfn<'a, I>(target: &[f64], vecs: I, k: usize, metric: Metric) -> Vec<usize>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    rank(target, vecs, k, metric, !metric.greater_is_nearer())
}

// =============================================================================
// Tests
// =============================================================================
