//! Component-wise vector arithmetic and similarity measures.
//!
//! Everything here operates on `&[f64]` slices. Dimension mismatches are
//! reported through `Option`/`Result` returns and never resolved by
//! truncation or padding; callers decide whether a mismatch is fatal.

use thiserror::Error;

/// Errors produced by vector arithmetic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VectorError {
    /// Two operands had different dimensions.
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Computes the cosine similarity between two vectors.
///
/// Returns `None` when the dimensions differ. When either operand has a zero
/// norm the similarity is defined as `0.0` so that degenerate vectors rank
/// as unrelated instead of poisoning a search with NaN.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Some(dot / norm_a / norm_b)
}

/// Computes the Euclidean (L2) distance between two vectors.
///
/// Returns `None` when the dimensions differ.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    Some(sum.sqrt())
}

/// Computes the norm of a vector.
fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Computes the component-wise mean of a stream of vectors.
///
/// Returns `None` when the stream is empty or a vector with a deviating
/// dimension shows up mid-stream.
pub fn mean<I>(vecs: I) -> Option<Vec<f64>>
where
    I: IntoIterator,
    I::Item: AsRef<[f64]>,
{
    let mut iter = vecs.into_iter();
    let first = iter.next()?;
    let mut acc: Vec<f64> = first.as_ref().to_vec();
    let mut n = 1.0;
    for v in iter {
        let v = v.as_ref();
        if v.len() != acc.len() {
            return None;
        }
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
        n += 1.0;
    }
    for a in acc.iter_mut() {
        *a /= n;
    }
    Some(acc)
}

/// Adds `b` into `a` in place. Returns an error when the dimensions differ.
pub fn add_assign(a: &mut [f64], b: &[f64]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x += y;
    }
    Ok(())
}

/// Subtracts `b` from `a` in place. Returns an error when the dimensions differ.
pub fn sub_assign(a: &mut [f64], b: &[f64]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x -= y;
    }
    Ok(())
}

/// Multiplies every component of `a` by `scalar` in place.
pub fn scale_assign(a: &mut [f64], scalar: f64) {
    for x in a.iter_mut() {
        *x *= scalar;
    }
}

/// Checks two vectors for exact equality (dimension and components).
pub fn vec_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Checks whether `vec` occurs in `vecs` (exact equality).
pub fn vec_in(vec: &[f64], vecs: &[Vec<f64>]) -> bool {
    vecs.iter().any(|other| vec_eq(vec, other))
}

// =============================================================================
// Tests
// =============================================================================
