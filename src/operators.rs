//! Dense and sparse linear-algebra kernels used by the factorisation engine.
//!
//! - `RowMatrix`: row-major dense buffer the inner solver iterates on, convertible
//!   to and from smartcore `DenseMatrix<f64>` (the public factor type)
//! - Row-parallel dense products (rayon), sparse-operator products over CSR
//! - Largest singular value by power iteration, for dense and sparse operators
//! - Small dense linear solves with partial pivoting

use log::{debug, trace};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use smartcore::linalg::basic::arrays::{Array, Array2};
use smartcore::linalg::basic::matrix::DenseMatrix;
use sprs::CsMat;

use crate::errors::{FactorError, FactorResult};

/// Power iteration budget for singular value estimates.
pub const POWER_ITER_MAX: usize = 1000;
/// Relative tolerance between two successive singular value estimates.
pub const POWER_ITER_TOL: f64 = 1e-10;
/// Seed for the power-iteration start vector, keeps the estimates deterministic.
const POWER_ITER_SEED: u64 = 0x5eed_0f_c0ffee;

/// Computes the Euclidean norm (L2) without allocating.
#[inline]
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "Dimension mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Row-major dense matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct RowMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub data: Vec<f64>,
}

impl RowMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            data: vec![0.0; nrows * ncols],
        }
    }

    pub fn filled(nrows: usize, ncols: usize, value: f64) -> Self {
        Self {
            nrows,
            ncols,
            data: vec![value; nrows * ncols],
        }
    }

    pub fn from_vec(data: Vec<f64>, nrows: usize, ncols: usize) -> Self {
        assert_eq!(
            data.len(),
            nrows * ncols,
            "buffer of {} values cannot hold a {}x{} matrix",
            data.len(),
            nrows,
            ncols
        );
        Self { nrows, ncols, data }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Copy a smartcore matrix into row-major storage.
    pub fn from_dense(m: &DenseMatrix<f64>) -> Self {
        let (nrows, ncols) = m.shape();
        let mut data = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            data.extend(m.get_row(i).iterator(0).copied());
        }
        Self { nrows, ncols, data }
    }

    pub fn to_dense(&self) -> DenseMatrix<f64> {
        DenseMatrix::from_iterator(self.data.iter().copied(), self.nrows, self.ncols, 0)
    }

    /// Densify a sparse matrix.
    pub fn from_sparse(c: &CsMat<f64>) -> Self {
        let mut m = Self::zeros(c.rows(), c.cols());
        for (&v, (i, j)) in c.iter() {
            m.data[i * m.ncols + j] += v;
        }
        m
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.ncols + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.ncols + j] = value;
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn transpose(&self) -> Self {
        let mut out = Self::zeros(self.ncols, self.nrows);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                out.data[j * self.nrows + i] = self.data[i * self.ncols + j];
            }
        }
        out
    }

    /// `self · other`, parallel over output rows.
    pub fn matmul(&self, other: &RowMatrix) -> RowMatrix {
        assert_eq!(
            self.ncols, other.nrows,
            "matmul shape mismatch: {:?} x {:?}",
            self.shape(),
            other.shape()
        );
        let n = other.ncols;
        let mut out = vec![0.0; self.nrows * n];
        out.par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(i, out_row)| {
                for (k, &a) in self.row(i).iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    for (o, &b) in out_row.iter_mut().zip(other.row(k)) {
                        *o += a * b;
                    }
                }
            });
        RowMatrix::from_vec(out, self.nrows, n)
    }

    /// `selfᵗ · other` without materialising the transpose.
    pub fn t_matmul(&self, other: &RowMatrix) -> RowMatrix {
        assert_eq!(
            self.nrows, other.nrows,
            "t_matmul shape mismatch: {:?} x {:?}",
            self.shape(),
            other.shape()
        );
        let n = other.ncols;
        let mut out = vec![0.0; self.ncols * n];
        out.par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(i, out_row)| {
                for k in 0..self.nrows {
                    let a = self.get(k, i);
                    if a == 0.0 {
                        continue;
                    }
                    for (o, &b) in out_row.iter_mut().zip(other.row(k)) {
                        *o += a * b;
                    }
                }
            });
        RowMatrix::from_vec(out, self.ncols, n)
    }

    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols, v.len(), "mat_vec dimension mismatch");
        (0..self.nrows).map(|i| dot(self.row(i), v)).collect()
    }

    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows, v.len(), "t_mat_vec dimension mismatch");
        let mut out = vec![0.0; self.ncols];
        for (i, &vi) in v.iter().enumerate() {
            if vi == 0.0 {
                continue;
            }
            for (o, &a) in out.iter_mut().zip(self.row(i)) {
                *o += a * vi;
            }
        }
        out
    }

    pub fn row_norms(&self) -> Vec<f64> {
        (0..self.nrows).map(|i| norm(self.row(i))).collect()
    }

    pub fn col_norms(&self) -> Vec<f64> {
        let mut sq = vec![0.0; self.ncols];
        for i in 0..self.nrows {
            for (s, &x) in sq.iter_mut().zip(self.row(i)) {
                *s += x * x;
            }
        }
        sq.into_iter().map(f64::sqrt).collect()
    }

    /// Divide every row by its L2 norm plus `eps`.
    pub fn normalize_rows(&mut self, eps: f64) {
        let norms = self.row_norms();
        let ncols = self.ncols;
        for (row, n) in self.data.chunks_mut(ncols.max(1)).zip(norms) {
            let d = n + eps;
            row.iter_mut().for_each(|x| *x /= d);
        }
    }

    /// Divide every column by its L2 norm plus `eps`.
    pub fn normalize_cols(&mut self, eps: f64) {
        let divisors: Vec<f64> = self.col_norms().into_iter().map(|n| n + eps).collect();
        let ncols = self.ncols;
        for row in self.data.chunks_mut(ncols.max(1)) {
            row.iter_mut().zip(&divisors).for_each(|(x, d)| *x /= d);
        }
    }

    pub fn frobenius_norm(&self) -> f64 {
        norm(&self.data)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    pub fn min_value(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Largest singular value ‖self‖₂.
    pub fn spectral_norm(&self) -> f64 {
        power_iteration(
            self.ncols,
            |v| self.mat_vec(v),
            |u| self.t_mat_vec(u),
        )
    }
}

/// `K · Xᵗ` for a CSR operator `K` (E×n) and a dense `X` (r×n); result is E×r.
pub fn sparse_mul_transposed(k: &CsMat<f64>, x: &RowMatrix) -> RowMatrix {
    assert!(k.is_csr(), "operator must be stored as CSR");
    assert_eq!(
        k.cols(),
        x.ncols,
        "operator has {} columns, factor has {}",
        k.cols(),
        x.ncols
    );
    let r = x.nrows;
    let mut out = RowMatrix::zeros(k.rows(), r);
    for (e, edge) in k.outer_iterator().enumerate() {
        for (j, &w) in edge.iter() {
            for p in 0..r {
                out.data[e * r + p] += w * x.get(p, j);
            }
        }
    }
    out
}

/// `(Kᵗ · P)ᵗ` for a CSR operator `K` (E×n) and a dense `P` (E×r); result is r×n.
pub fn sparse_adjoint_transposed(k: &CsMat<f64>, p: &RowMatrix) -> RowMatrix {
    assert!(k.is_csr(), "operator must be stored as CSR");
    assert_eq!(
        k.rows(),
        p.nrows,
        "operator has {} rows, dual has {}",
        k.rows(),
        p.nrows
    );
    let n = k.cols();
    let mut out = RowMatrix::zeros(p.ncols, n);
    for (e, edge) in k.outer_iterator().enumerate() {
        let pe = p.row(e);
        for (j, &w) in edge.iter() {
            for (q, &pv) in pe.iter().enumerate() {
                out.data[q * n + j] += w * pv;
            }
        }
    }
    out
}

/// Sparse matrix-vector product for any storage order.
pub fn sparse_mat_vec(c: &CsMat<f64>, v: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; c.rows()];
    for (&w, (i, j)) in c.iter() {
        out[i] += w * v[j];
    }
    out
}

/// Transposed sparse matrix-vector product for any storage order.
pub fn sparse_t_mat_vec(c: &CsMat<f64>, u: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; c.cols()];
    for (&w, (i, j)) in c.iter() {
        out[j] += w * u[i];
    }
    out
}

/// Largest singular value of a sparse operator.
///
/// An operator without entries (a graph with no edges) has norm 0.
pub fn spectral_norm_sparse(k: &CsMat<f64>) -> f64 {
    if k.nnz() == 0 {
        debug!("Operator {}x{} has no entries, norm is 0", k.rows(), k.cols());
        return 0.0;
    }
    let s = power_iteration(k.cols(), |v| sparse_mat_vec(k, v), |u| sparse_t_mat_vec(k, u));
    debug!("Largest singular value of {}x{} operator: {:.6}", k.rows(), k.cols(), s);
    s
}

/// Power iteration on `AᵗA` given the products `A·v` and `Aᵗ·u`.
fn power_iteration<F, G>(n: usize, apply: F, apply_t: G) -> f64
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> Vec<f64>,
{
    if n == 0 {
        return 0.0;
    }
    // random start: a constant vector lies in the kernel of incidence operators
    let mut rng = ChaCha8Rng::seed_from_u64(POWER_ITER_SEED);
    let mut v: Vec<f64> = (0..n).map(|_| rng.random::<f64>() + 0.5).collect();
    let nv = norm(&v);
    v.iter_mut().for_each(|x| *x /= nv);

    let mut sigma = 0.0;
    for it in 0..POWER_ITER_MAX {
        let u = apply(&v);
        let w = apply_t(&u);
        let nw = norm(&w);
        if nw <= f64::MIN_POSITIVE {
            trace!("Power iteration collapsed at iteration {}", it);
            return norm(&u);
        }
        let next = nw.sqrt();
        v = w.into_iter().map(|x| x / nw).collect();
        if (next - sigma).abs() <= POWER_ITER_TOL * next {
            trace!("Power iteration converged after {} iterations", it + 1);
            return next;
        }
        sigma = next;
    }
    sigma
}

/// Solve the square system `z · x = q` by Gaussian elimination with partial pivoting.
pub fn solve_linear_system(z: &RowMatrix, q: &[f64]) -> FactorResult<Vec<f64>> {
    let n = z.nrows;
    if z.ncols != n || q.len() != n {
        return Err(FactorError::DimensionMismatch {
            context: "linear system",
            expected: (n, n),
            actual: (z.ncols, q.len()),
        });
    }
    let mut a = z.data.clone();
    let mut b = q.to_vec();

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col * n + col].abs();
        for row in (col + 1)..n {
            let v = a[row * n + col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }
        if max_val < 1e-15 || !max_val.is_finite() {
            return Err(FactorError::SingularMatrix {
                column: col,
                pivot: max_val,
            });
        }
        if max_row != col {
            for j in 0..n {
                a.swap(col * n + j, max_row * n + j);
            }
            b.swap(col, max_row);
        }
        let pivot = a[col * n + col];
        for row in (col + 1)..n {
            let factor = a[row * n + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[row * n + j] -= factor * a[col * n + j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let s: f64 = ((i + 1)..n).map(|j| a[i * n + j] * x[j]).sum();
        x[i] = (b[i] - s) / a[i * n + i];
    }
    Ok(x)
}

/// Reconstruction residual ‖C - A·B‖_F.
pub fn frobenius_residual(c: &CsMat<f64>, a: &RowMatrix, b: &RowMatrix) -> f64 {
    let mut diff = a.matmul(b);
    for (&v, (i, j)) in c.iter() {
        let idx = i * diff.ncols + j;
        diff.data[idx] -= v;
    }
    diff.frobenius_norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sprs::TriMat;

    #[test]
    fn test_dense_roundtrip_keeps_layout() {
        let dm = DenseMatrix::from_2d_vec(&vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let rm = RowMatrix::from_dense(&dm);
        assert_eq!(rm.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let back = rm.to_dense();
        assert_eq!(back.shape(), (2, 3));
        assert_eq!(*back.get((1, 0)), 4.0);
        assert_eq!(*back.get((0, 2)), 3.0);
    }

    #[test]
    fn test_products_agree() {
        let a = RowMatrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let b = RowMatrix::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], 3, 2);
        let ab = a.matmul(&b);
        assert_eq!(ab.data, vec![4.0, 5.0, 10.0, 11.0]);

        let at_a = a.t_matmul(&a);
        let expected = a.transpose().matmul(&a);
        assert_eq!(at_a, expected);
    }

    #[test]
    fn test_spectral_norm_diagonal() {
        let m = RowMatrix::from_vec(vec![3.0, 0.0, 0.0, 0.0, -5.0, 0.0], 2, 3);
        assert_relative_eq!(m.spectral_norm(), 5.0, epsilon = 1e-8);
    }

    #[test]
    fn test_spectral_norm_sparse_path_graph() {
        // incidence of a 2-node single edge: [1, -1] has norm sqrt(2)
        let mut t = TriMat::new((1, 2));
        t.add_triplet(0, 0, 1.0);
        t.add_triplet(0, 1, -1.0);
        let k: CsMat<f64> = t.to_csr();
        assert_relative_eq!(spectral_norm_sparse(&k), 2f64.sqrt(), epsilon = 1e-8);

        let empty: CsMat<f64> = TriMat::new((0, 3)).to_csr();
        assert_eq!(spectral_norm_sparse(&empty), 0.0);
    }

    #[test]
    fn test_solve_linear_system() {
        let z = RowMatrix::from_vec(vec![2.0, 1.0, 1.0, 3.0], 2, 2);
        let x = solve_linear_system(&z, &[3.0, 5.0]).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-12);

        let singular = RowMatrix::from_vec(vec![1.0, 2.0, 2.0, 4.0], 2, 2);
        assert!(matches!(
            solve_linear_system(&singular, &[1.0, 1.0]),
            Err(FactorError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_sparse_products_match_dense() {
        let mut t = TriMat::new((2, 3));
        t.add_triplet(0, 0, 2.0);
        t.add_triplet(0, 1, -2.0);
        t.add_triplet(1, 1, 0.5);
        t.add_triplet(1, 2, -0.5);
        let k: CsMat<f64> = t.to_csr();
        let kd = RowMatrix::from_sparse(&k);

        let x = RowMatrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        assert_eq!(sparse_mul_transposed(&k, &x), kd.matmul(&x.transpose()));

        let p = RowMatrix::from_vec(vec![1.0, -1.0, 0.5, 2.0], 2, 2);
        assert_eq!(sparse_adjoint_transposed(&k, &p), kd.t_matmul(&p).transpose());
    }
}
