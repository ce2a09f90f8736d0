//! Keypoint-driven recommendation from learned factors.
//!
//! A query is a handful of `(item, rating)` keypoints. The scorer:
//! 1. fits a row embedding by ridge regression in factor space, weighting keypoint
//!    columns 1.0 and every other column 0.1
//! 2. blends that embedding with its `knn_a` closest rows of `A` under a Gaussian kernel
//!    whose bandwidth is a quarter of the mean distance
//! 3. scores every item with `embedding · B`, drops scores at or below `threshold`
//!    and ranks the top `k` survivors

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use log::{debug, info, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::errors::{FactorError, FactorResult};
use crate::operators::{norm, solve_linear_system, RowMatrix};

/// Ridge term added to the normal equations.
pub const RIDGE_EPS: f64 = 2e-2;
/// Confidence of columns without a keypoint.
pub const BACKGROUND_CONFIDENCE: f64 = 0.1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScorerParams {
    /// number of items to return
    pub k: usize,
    /// scores at or below this value are treated as numerical noise
    pub threshold: f64,
    /// rows of `A` blended into the final embedding, at least 1
    pub knn_a: usize,
}

impl Default for ScorerParams {
    fn default() -> Self {
        Self {
            k: 10,
            threshold: 1e-10,
            knn_a: 50,
        }
    }
}

impl ScorerParams {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_knn(mut self, knn_a: usize) -> Self {
        self.knn_a = knn_a;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Recommendation {
    /// column indices of the recommended items, best first
    pub items: Vec<usize>,
    /// scores of `items`, descending
    pub scores: Vec<f64>,
    /// score of every column
    pub raw: Vec<f64>,
    /// blended row embedding the scores were computed from
    pub embedding: Vec<f64>,
}

/// Recommend items for keypoints given as `(column index, rating)`.
pub fn recommend_from_keypoints(
    a: &DenseMatrix<f64>,
    b: &DenseMatrix<f64>,
    keypoints: &[(usize, f64)],
    params: &ScorerParams,
) -> FactorResult<Recommendation> {
    if params.knn_a == 0 {
        return Err(FactorError::InvalidParameter(
            "knn_a must blend at least one row".into(),
        ));
    }
    let a = RowMatrix::from_dense(a);
    let b = RowMatrix::from_dense(b);
    let (rank, length) = b.shape();
    if a.ncols != rank {
        return Err(FactorError::DimensionMismatch {
            context: "row factor rank",
            expected: (a.nrows, rank),
            actual: a.shape(),
        });
    }
    info!(
        "Scoring {} items from {} keypoints (k={}, knn_a={})",
        length,
        keypoints.len(),
        params.k,
        params.knn_a
    );

    // 1) confidence mask and ratings
    let mut mask = vec![BACKGROUND_CONFIDENCE; length];
    let mut ratings = vec![0.0; length];
    for &(idx, rating) in keypoints {
        if idx >= length {
            return Err(FactorError::KeypointOutOfRange { index: idx, ncols: length });
        }
        mask[idx] = 1.0;
        ratings[idx] = rating;
    }

    // 2) ridge regression in factor space
    let row = ridge_embedding(&b, &mask, &ratings)?;
    trace!("Ridge embedding: {:?}", row);

    // 3-4) kernel-weighted blend of the nearest learned rows
    let embedding = blend_neighbours(&a, &row, params.knn_a);

    // 5) score, filter and rank
    let raw = b.t_mat_vec(&embedding);
    let (items, scores) = top_k(&raw, params.k, params.threshold);
    debug!("Recommended {} items, best score {:?}", items.len(), scores.first());

    Ok(Recommendation {
        items,
        scores,
        raw,
        embedding,
    })
}

/// Recommend items for keypoints keyed by external ids, resolved through `idmap`.
pub fn recommend_from_mapped_keypoints<K>(
    a: &DenseMatrix<f64>,
    b: &DenseMatrix<f64>,
    keypoints: &[(K, f64)],
    idmap: &HashMap<K, usize>,
    params: &ScorerParams,
) -> FactorResult<Recommendation>
where
    K: Eq + Hash + Debug,
{
    let resolved = keypoints
        .iter()
        .map(|(id, rating)| {
            idmap
                .get(id)
                .map(|&idx| (idx, *rating))
                .ok_or_else(|| FactorError::UnknownKeypoint(format!("{:?}", id)))
        })
        .collect::<FactorResult<Vec<_>>>()?;
    recommend_from_keypoints(a, b, &resolved, params)
}

/// Solve `(B·M·Bᵗ + εI) row = B·M·r` with `M = diag(mask)`.
fn ridge_embedding(b: &RowMatrix, mask: &[f64], ratings: &[f64]) -> FactorResult<Vec<f64>> {
    let rank = b.nrows;
    let mut z = RowMatrix::identity(rank);
    z.data.iter_mut().for_each(|x| *x *= RIDGE_EPS);
    let mut q = vec![0.0; rank];
    for r in 0..rank {
        let br = b.row(r);
        for s in r..rank {
            let bs = b.row(s);
            let v: f64 = (0..mask.len()).map(|j| br[j] * mask[j] * bs[j]).sum();
            z.set(r, s, z.get(r, s) + v);
            if s != r {
                z.set(s, r, z.get(s, r) + v);
            }
        }
        q[r] = (0..mask.len()).map(|j| br[j] * mask[j] * ratings[j]).sum();
    }
    solve_linear_system(&z, &q)
}

/// Weighted average of the `knn` rows of `a` closest to `row`.
///
/// Weights follow `exp(-d² / σ²)` with `σ = mean(d) / 4`; when all distances are zero
/// the weights are uniform. Without rows in `a` the ridge embedding is returned as is.
fn blend_neighbours(a: &RowMatrix, row: &[f64], knn: usize) -> Vec<f64> {
    if a.nrows == 0 {
        return row.to_vec();
    }
    let distances: Vec<f64> = (0..a.nrows)
        .into_par_iter()
        .map(|i| {
            let diff: Vec<f64> = a.row(i).iter().zip(row).map(|(x, y)| x - y).collect();
            norm(&diff)
        })
        .collect();
    let sigma = distances.iter().sum::<f64>() / distances.len() as f64 / 4.0;
    let weights: Vec<f64> = if sigma > 0.0 {
        distances
            .iter()
            .map(|d| (-(d * d) / (sigma * sigma)).exp())
            .collect()
    } else {
        vec![1.0; distances.len()]
    };

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&i, &j| {
        weights[j]
            .partial_cmp(&weights[i])
            .unwrap_or(Ordering::Equal)
            .then_with(|| i.cmp(&j))
    });
    let nb_elems = knn.min(weights.len());
    let top = &order[..nb_elems];
    debug!(
        "Blending {} neighbour rows (sigma={:.6}, best weight {:?})",
        nb_elems,
        sigma,
        top.first().map(|&i| weights[i])
    );

    let rank = a.ncols;
    let mut total = 0.0;
    let mut acc = vec![0.0; rank];
    for &i in top {
        total += weights[i];
        for (s, &x) in acc.iter_mut().zip(a.row(i)) {
            *s += weights[i] * x;
        }
    }
    if total > 0.0 {
        acc.iter_mut().for_each(|x| *x /= total);
    } else {
        // every kernel weight underflowed: plain mean of the selected rows
        acc = vec![0.0; rank];
        for &i in top {
            for (s, &x) in acc.iter_mut().zip(a.row(i)) {
                *s += x / nb_elems as f64;
            }
        }
    }
    acc
}

/// Indices and scores of the `k` largest entries above `threshold`, best first.
///
/// Partial selection isolates the top `k`, then only that subset is sorted.
pub fn top_k(raw: &[f64], k: usize, threshold: f64) -> (Vec<usize>, Vec<f64>) {
    let mut points: Vec<(usize, f64)> = raw
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v > threshold)
        .map(|(i, &v)| (i, v))
        .collect();
    let nb_elems = k.min(points.len());
    if nb_elems == 0 {
        return (Vec::new(), Vec::new());
    }
    let by_score_desc =
        |x: &(usize, f64), y: &(usize, f64)| y.1.partial_cmp(&x.1).unwrap_or(Ordering::Equal);
    if nb_elems < points.len() {
        points.select_nth_unstable_by(nb_elems - 1, by_score_desc);
        points.truncate(nb_elems);
    }
    points.sort_by(by_score_desc);
    points.into_iter().unzip()
}
