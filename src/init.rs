//! Factor initialisation.
//!
//! Strategies for the starting pair `(A, B)`:
//! - normalised uniform random factors drawn from a caller-supplied RNG
//! - NNDSVD (non-negative double SVD), a deterministic seed built from the leading
//!   singular triplets of the interaction matrix
//! - factors supplied by the caller, or restored from a checkpoint

use std::path::PathBuf;

use log::{debug, info, trace};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use smartcore::linalg::basic::matrix::DenseMatrix;
use sprs::CsMat;

use crate::checkpoint::Checkpoint;
use crate::errors::{FactorError, FactorResult};
use crate::operators::{dot, norm, sparse_mat_vec, sparse_t_mat_vec, RowMatrix};

/// NNDSVD entries below this value are zeroed.
const NNDSVD_EPS: f64 = 1e-6;
const SVD_MAX_ITER: usize = 500;
const SVD_TOL: f64 = 1e-10;
const SVD_SEED: u64 = 42;
/// Components below this fraction of the leading singular value are treated as zero.
const SVD_RANK_RTOL: f64 = 1e-6;

/// How the trainer obtains its starting factors.
#[derive(Clone, Debug, Default)]
pub enum FactorInit {
    /// Uniform random entries, columns of A and rows of B normalised to unit L2.
    Random,
    #[default]
    Nndsvd,
    /// Caller-provided `A` (rows×rank) and `B` (rank×cols).
    Supplied {
        a: DenseMatrix<f64>,
        b: DenseMatrix<f64>,
    },
    Checkpoint(PathBuf),
}

/// Random factors: `A` is nrows×rank with unit columns, `B` is rank×ncols with unit rows.
pub fn init_factor_matrices<R: Rng>(
    nrows: usize,
    ncols: usize,
    rank: usize,
    rng: &mut R,
) -> (RowMatrix, RowMatrix) {
    debug!(
        "Random factor init: A {}x{}, B {}x{}",
        nrows, rank, rank, ncols
    );
    let a_data: Vec<f64> = (0..nrows * rank).map(|_| rng.random::<f64>()).collect();
    let b_data: Vec<f64> = (0..rank * ncols).map(|_| rng.random::<f64>()).collect();
    let mut a = RowMatrix::from_vec(a_data, nrows, rank);
    let mut b = RowMatrix::from_vec(b_data, rank, ncols);
    a.normalize_cols(0.0);
    b.normalize_rows(0.0);
    (a, b)
}

/// Leading `rank` singular triplets of `c`, computed by power iteration on `CᵗC` with
/// deflation against the right singular vectors already found.
///
/// Returns `(U, S, V)` with `U` nrows×rank, `V` rank×ncols. Components beyond the
/// numerical rank of `c` come back as zeros.
pub fn truncated_svd(c: &CsMat<f64>, rank: usize) -> (RowMatrix, Vec<f64>, RowMatrix) {
    let (m, n) = c.shape();
    let mut u_mat = RowMatrix::zeros(m, rank);
    let mut v_mat = RowMatrix::zeros(rank, n);
    let mut singular = vec![0.0; rank];
    let mut found: Vec<Vec<f64>> = Vec::with_capacity(rank);
    let mut rng = ChaCha8Rng::seed_from_u64(SVD_SEED);

    for k in 0..rank {
        let mut v: Vec<f64> = (0..n).map(|_| rng.random::<f64>() - 0.5).collect();
        orthogonalize(&mut v, &found);
        let nv = norm(&v);
        if nv <= f64::EPSILON {
            break;
        }
        v.iter_mut().for_each(|x| *x /= nv);

        let mut sigma = 0.0;
        for it in 0..SVD_MAX_ITER {
            let u = sparse_mat_vec(c, &v);
            let mut w = sparse_t_mat_vec(c, &u);
            orthogonalize(&mut w, &found);
            let nw = norm(&w);
            if nw <= f64::MIN_POSITIVE {
                sigma = 0.0;
                break;
            }
            let next_v: Vec<f64> = w.into_iter().map(|x| x / nw).collect();
            let delta = next_v
                .iter()
                .zip(&v)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            v = next_v;
            sigma = nw.sqrt();
            if delta <= SVD_TOL {
                trace!("singular vector {} converged after {} iterations", k, it + 1);
                break;
            }
        }

        if sigma <= f64::EPSILON || sigma <= SVD_RANK_RTOL * singular[0] {
            debug!("Interaction matrix has numerical rank {} < {}", k, rank);
            break;
        }
        let u = sparse_mat_vec(c, &v);
        let s = norm(&u);
        for i in 0..m {
            u_mat.set(i, k, u[i] / s);
        }
        for j in 0..n {
            v_mat.set(k, j, v[j]);
        }
        singular[k] = s;
        found.push(v);
    }
    (u_mat, singular, v_mat)
}

fn orthogonalize(v: &mut [f64], basis: &[Vec<f64>]) {
    for b in basis {
        let p = dot(v, b);
        v.iter_mut().zip(b).for_each(|(x, &bi)| *x -= p * bi);
    }
}

/// NNDSVD seed (Boutsidis & Gallopoulos): each singular pair is split into its
/// positive and negative parts and the dominant part is kept.
pub fn nndsvd_init(c: &CsMat<f64>, rank: usize) -> FactorResult<(RowMatrix, RowMatrix)> {
    if rank == 0 {
        return Err(FactorError::InvalidParameter("rank must be at least 1".into()));
    }
    let (m, n) = c.shape();
    info!("NNDSVD init of {}x{} matrix with rank {}", m, n, rank);
    let (u, s, v) = truncated_svd(c, rank);

    let mut w = RowMatrix::zeros(m, rank);
    let mut h = RowMatrix::zeros(rank, n);

    for j in 0..rank {
        if s[j] <= 0.0 {
            continue;
        }
        let x: Vec<f64> = (0..m).map(|i| u.get(i, j)).collect();
        let y: Vec<f64> = v.row(j).to_vec();

        let (uj, vj, scale) = if j == 0 {
            (
                x.iter().map(|a| a.abs()).collect::<Vec<_>>(),
                y.iter().map(|a| a.abs()).collect::<Vec<_>>(),
                s[0].sqrt(),
            )
        } else {
            let xp: Vec<f64> = x.iter().map(|&a| a.max(0.0)).collect();
            let yp: Vec<f64> = y.iter().map(|&a| a.max(0.0)).collect();
            let xn: Vec<f64> = x.iter().map(|&a| (-a).max(0.0)).collect();
            let yn: Vec<f64> = y.iter().map(|&a| (-a).max(0.0)).collect();
            let (xpn, ypn, xnn, ynn) = (norm(&xp), norm(&yp), norm(&xn), norm(&yn));
            let (mp, mn) = (xpn * ypn, xnn * ynn);

            let (a, b, an, bn, sigma) = if mp > mn {
                (xp, yp, xpn, ypn, mp)
            } else {
                (xn, yn, xnn, ynn, mn)
            };
            if sigma <= 0.0 {
                continue;
            }
            (
                a.into_iter().map(|t| t / an).collect(),
                b.into_iter().map(|t| t / bn).collect(),
                (s[j] * sigma).sqrt(),
            )
        };

        for i in 0..m {
            w.set(i, j, scale * uj[i]);
        }
        for k in 0..n {
            h.set(j, k, scale * vj[k]);
        }
    }

    w.data.iter_mut().filter(|x| **x < NNDSVD_EPS).for_each(|x| *x = 0.0);
    h.data.iter_mut().filter(|x| **x < NNDSVD_EPS).for_each(|x| *x = 0.0);
    Ok((w, h))
}

/// Produce `(A, B)` for an `nrows×ncols` problem according to `init`.
pub fn initialize_factors<R: Rng>(
    c: &CsMat<f64>,
    rank: usize,
    init: &FactorInit,
    rng: &mut R,
) -> FactorResult<(RowMatrix, RowMatrix)> {
    if rank == 0 {
        return Err(FactorError::InvalidParameter("rank must be at least 1".into()));
    }
    let (nrows, ncols) = c.shape();
    let (a, b) = match init {
        FactorInit::Random => init_factor_matrices(nrows, ncols, rank, rng),
        FactorInit::Nndsvd => nndsvd_init(c, rank)?,
        FactorInit::Supplied { a, b } => (RowMatrix::from_dense(a), RowMatrix::from_dense(b)),
        FactorInit::Checkpoint(path) => Checkpoint::load(path)?.factors(),
    };

    if a.shape() != (nrows, rank) {
        return Err(FactorError::DimensionMismatch {
            context: "initial factor A",
            expected: (nrows, rank),
            actual: a.shape(),
        });
    }
    if b.shape() != (rank, ncols) {
        return Err(FactorError::DimensionMismatch {
            context: "initial factor B",
            expected: (rank, ncols),
            actual: b.shape(),
        });
    }
    Ok((a, b))
}
