//! Interaction matrix input: capability trait over sparse storage, construction from
//! grouped item indices and Sinkhorn–Knopp doubly-stochastic scaling.

use log::{debug, info, trace};
use sprs::{CsMat, TriMat};

use crate::errors::{FactorError, FactorResult};

/// What the trainer needs from an interaction matrix.
pub trait InteractionSource {
    fn row_count(&self) -> usize;
    fn col_count(&self) -> usize;
    /// Stored entries as `(row, col, value)`.
    fn nonzeros(&self) -> Vec<(usize, usize, f64)>;
    fn to_compressed_row(&self) -> CsMat<f64>;
}

impl InteractionSource for CsMat<f64> {
    fn row_count(&self) -> usize {
        self.rows()
    }

    fn col_count(&self) -> usize {
        self.cols()
    }

    fn nonzeros(&self) -> Vec<(usize, usize, f64)> {
        self.iter().map(|(&v, (i, j))| (i, j, v)).collect()
    }

    fn to_compressed_row(&self) -> CsMat<f64> {
        if self.is_csr() {
            self.clone()
        } else {
            self.to_csr()
        }
    }
}

impl InteractionSource for TriMat<f64> {
    fn row_count(&self) -> usize {
        self.rows()
    }

    fn col_count(&self) -> usize {
        self.cols()
    }

    fn nonzeros(&self) -> Vec<(usize, usize, f64)> {
        self.triplet_iter().map(|(&v, (i, j))| (i, j, v)).collect()
    }

    fn to_compressed_row(&self) -> CsMat<f64> {
        self.to_csr()
    }
}

/// Options of the Sinkhorn–Knopp scaling.
#[derive(Clone, Copy, Debug)]
pub struct StochasticScaling {
    /// stop once every row sum is within this distance of 1
    pub stop_criterion: f64,
    pub max_iter: usize,
}

impl Default for StochasticScaling {
    fn default() -> Self {
        Self {
            stop_criterion: 1e-2,
            max_iter: 1,
        }
    }
}

/// Build the interaction matrix from groups of item indices: `C[i, j] = 1` when item
/// `j` belongs to group `i` (a playlist and its songs, a user and its items).
///
/// Repeated items inside a group count once. With `scaling`, the matrix is made
/// (approximately) doubly stochastic.
pub fn create_recommendation_matrix(
    groups: &[Vec<usize>],
    n_items: usize,
    scaling: Option<StochasticScaling>,
) -> FactorResult<CsMat<f64>> {
    info!(
        "Building interaction matrix: {} groups over {} items",
        groups.len(),
        n_items
    );
    let mut triplets: TriMat<f64> = TriMat::new((groups.len(), n_items));
    for (i, group) in groups.iter().enumerate() {
        let mut seen: Vec<usize> = Vec::with_capacity(group.len());
        for &j in group {
            if j >= n_items {
                return Err(FactorError::ItemOutOfRange {
                    group: i,
                    item: j,
                    nitems: n_items,
                });
            }
            if !seen.contains(&j) {
                seen.push(j);
                triplets.add_triplet(i, j, 1.0);
            }
        }
    }
    let c: CsMat<f64> = triplets.to_csr();
    debug!("Interaction matrix has {} non-zeros", c.nnz());

    Ok(match scaling {
        Some(opts) => double_stochastic(&c, opts),
        None => c,
    })
}

/// Alternate row and column normalisation of a non-negative sparse matrix, keeping
/// its sparsity pattern. Empty rows or columns are left untouched.
pub fn double_stochastic(c: &CsMat<f64>, opts: StochasticScaling) -> CsMat<f64> {
    let (nrows, ncols) = c.shape();
    let mut entries: Vec<(usize, usize, f64)> = c.iter().map(|(&v, (i, j))| (i, j, v)).collect();

    for it in 0..opts.max_iter {
        let mut row_sums = vec![0.0; nrows];
        for &(i, _, v) in &entries {
            row_sums[i] += v;
        }
        for e in entries.iter_mut() {
            if row_sums[e.0] > 1e-12 {
                e.2 /= row_sums[e.0];
            }
        }

        let mut col_sums = vec![0.0; ncols];
        for &(_, j, v) in &entries {
            col_sums[j] += v;
        }
        for e in entries.iter_mut() {
            if col_sums[e.1] > 1e-12 {
                e.2 /= col_sums[e.1];
            }
        }

        let mut row_sums = vec![0.0; nrows];
        for &(i, _, v) in &entries {
            row_sums[i] += v;
        }
        let deviation = row_sums
            .iter()
            .filter(|&&s| s > 0.0)
            .map(|s| (s - 1.0).abs())
            .fold(0.0, f64::max);
        trace!("Sinkhorn iteration {}: max row deviation {:.6}", it, deviation);
        if deviation < opts.stop_criterion {
            debug!("Sinkhorn scaling converged after {} iterations", it + 1);
            break;
        }
    }

    let mut triplets: TriMat<f64> = TriMat::new((nrows, ncols));
    for (i, j, v) in entries {
        triplets.add_triplet(i, j, v);
    }
    triplets.to_csr()
}
