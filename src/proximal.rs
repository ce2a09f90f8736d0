//! # Primal–dual proximal factor update
//!
//! Chambolle–Pock splitting for one factor of `C ≈ Y · X` with the companion factor
//! held fixed. The objective couples:
//!
//! - a weighted non-negative fidelity term on `Y · X` against the dense target `OC`,
//!   with observation weights `Omega` (dual variable `P1`, shape of `OC`)
//! - a graph smoothness term on the columns of `X` through the gradient operator `K`
//!   (dual variable `P2`, one row per edge): anisotropic total variation
//!   (soft-thresholding) or a Dirichlet energy (scalar shrinkage)
//! - the non-negative orthant constraint on `X`, applied as a projection
//!
//! Orientation: `X` is rank×n, `Y` is m×rank, `K` is E×n, `Omega` and `OC` are m×n.
//! Updating the row factor `A` reuses the same routine on transposed operands
//! (see [`update_step`]).
//!
//! The inner solver runs a fixed number of iterations; there is no convergence test.
//! Every iteration checks the new primal iterate for non-finite values.

use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::errors::{FactorError, FactorResult};
use crate::graph::GradientOperator;
use crate::operators::{sparse_adjoint_transposed, sparse_mul_transposed, RowMatrix};

/// Epsilon added to norms before normalising factor rows/columns.
pub const NORM_EPS: f64 = 1e-6;
/// Weight of unobserved entries in the default observation mask.
pub const UNOBSERVED_WEIGHT: f64 = 0.1;

/// Regulariser applied to the smoothness dual `P2`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegularizationMode {
    /// Anisotropic total variation: soft-thresholding of `P2`.
    #[default]
    TotalVariation,
    /// Dirichlet energy: `P2 *= θ / (θ + σ2)`.
    Dirichlet,
}

impl RegularizationMode {
    /// Numeric selector: `0` is total variation, anything else Dirichlet.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            RegularizationMode::TotalVariation
        } else {
            RegularizationMode::Dirichlet
        }
    }
}

/// Inner solver configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SolverParams {
    pub max_inner_iter: usize,
    pub mode: RegularizationMode,
    /// Adaptive step sizes with the accelerated extrapolation; off by default.
    pub acceleration_enabled: bool,
    /// Strong-convexity moduli used by the accelerated step-size update.
    pub gamma1: f64,
    pub gamma2: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_inner_iter: 300,
            mode: RegularizationMode::TotalVariation,
            acceleration_enabled: false,
            gamma1: 1e-1,
            gamma2: 1e-1,
        }
    }
}

/// Soft-thresholding of a single value.
///
/// `|x| < value` maps to `substitute`, otherwise `x` moves toward zero by `value`.
#[inline]
pub fn shrink(x: f64, value: f64, substitute: f64) -> f64 {
    if x.abs() < value {
        substitute
    } else if x >= value {
        x - value
    } else {
        x + value
    }
}

/// Element-wise soft-thresholding with a scalar threshold.
pub fn soft_thresholding(data: &[f64], value: f64, substitute: f64) -> Vec<f64> {
    data.iter().map(|&x| shrink(x, value, substitute)).collect()
}

/// Element-wise soft-thresholding with one threshold per entry.
pub fn soft_thresholding_elementwise(
    data: &[f64],
    values: &[f64],
    substitute: f64,
) -> Vec<f64> {
    assert_eq!(
        data.len(),
        values.len(),
        "one threshold per entry is required"
    );
    data.iter()
        .zip(values)
        .map(|(&x, &v)| shrink(x, v, substitute))
        .collect()
}

/// Observation weights and dense target, with their transposes for the row-factor update.
#[derive(Clone, Debug)]
pub struct ObservationMask {
    pub omega: RowMatrix,
    pub oc: RowMatrix,
    pub omega_t: RowMatrix,
    pub oc_t: RowMatrix,
}

impl ObservationMask {
    /// Densify `c` into `OC`; without `obs`, weight observed entries 1.0 and the rest 0.1.
    pub fn new(c: &CsMat<f64>, obs: Option<&RowMatrix>) -> FactorResult<Self> {
        let oc = RowMatrix::from_sparse(c);
        let omega = match obs {
            Some(o) => {
                if o.shape() != oc.shape() {
                    return Err(FactorError::DimensionMismatch {
                        context: "observation mask",
                        expected: oc.shape(),
                        actual: o.shape(),
                    });
                }
                o.clone()
            }
            None => {
                let mut o = RowMatrix::filled(oc.nrows, oc.ncols, UNOBSERVED_WEIGHT);
                for (&v, (i, j)) in c.iter() {
                    if v > 0.0 {
                        o.set(i, j, 1.0);
                    }
                }
                o
            }
        };
        debug!(
            "Observation mask {}x{}: {} dense entries materialised",
            oc.nrows,
            oc.ncols,
            oc.data.len()
        );
        Ok(Self {
            omega_t: omega.transpose(),
            oc_t: oc.transpose(),
            omega,
            oc,
        })
    }
}

#[inline]
fn step_size(norm: f64) -> f64 {
    if norm > 0.0 {
        1.0 / norm
    } else {
        0.0
    }
}

fn check_shape(
    context: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> FactorResult<()> {
    if expected != actual {
        return Err(FactorError::DimensionMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Update `x` (rank×n) with `y` (m×rank) fixed.
///
/// Returns the new `x` and the column-normalised `y`.
#[allow(clippy::too_many_arguments)]
pub fn update_factor(
    theta_tv: f64,
    mut x: RowMatrix,
    mut y: RowMatrix,
    k: &GradientOperator,
    norm_k: f64,
    omega: &RowMatrix,
    oc: &RowMatrix,
    params: &SolverParams,
) -> FactorResult<(RowMatrix, RowMatrix)> {
    let (rank, n) = x.shape();
    let m = y.nrows;
    check_shape("companion factor", (m, rank), y.shape())?;
    check_shape("gradient operator", (k.nedges, n), k.matrix.shape())?;
    check_shape("observation weights", (m, n), omega.shape())?;
    check_shape("dense target", (m, n), oc.shape())?;

    x.normalize_rows(NORM_EPS);
    y.normalize_cols(NORM_EPS);

    let mut p1 = y.matmul(&x);
    let mut p2 = sparse_mul_transposed(&k.matrix, &x);

    let norm_y = y.spectral_norm();
    let mut sigma1 = step_size(norm_y);
    let mut tau1 = sigma1;
    let mut sigma2 = step_size(norm_k);
    let mut tau2 = sigma2;
    debug!(
        "Factor update {}x{} against {}x{}: |Y|={:.6}, |K|={:.6}, theta={}, mode={:?}, iters={}",
        rank, n, m, rank, norm_y, norm_k, theta_tv, params.mode, params.max_inner_iter
    );

    let v: Vec<f64> = oc.data.iter().map(|&c| 4.0 * sigma1 * c).collect();

    let mut x_bar = x.clone();
    let mut x_old = x;

    for it in 0..params.max_inner_iter {
        // fidelity dual
        let yx = y.matmul(&x_bar);
        p1.data
            .par_iter_mut()
            .zip(yx.data.par_iter())
            .zip(omega.data.par_iter().zip(v.par_iter()))
            .for_each(|((p, &s), (&om, &vi))| {
                let ascent = *p + sigma1 * s;
                let t = (ascent - om) * (ascent - om) + vi;
                *p = 0.5 * (ascent + om - t.sqrt());
            });

        // smoothness dual
        if sigma2 > 0.0 {
            let kx = sparse_mul_transposed(&k.matrix, &x_bar);
            match params.mode {
                RegularizationMode::TotalVariation => {
                    let threshold = theta_tv / sigma2;
                    p2.data.iter_mut().zip(&kx.data).for_each(|(p, &d)| {
                        let ascent = *p + sigma2 * d;
                        *p = ascent - sigma2 * shrink(ascent / sigma2, threshold, 0.0);
                    });
                }
                RegularizationMode::Dirichlet => {
                    let factor = theta_tv / (theta_tv + sigma2);
                    p2.data.iter_mut().zip(&kx.data).for_each(|(p, &d)| {
                        *p = (*p + sigma2 * d) * factor;
                    });
                }
            }
        }

        // primal descent and projection on the non-negative orthant
        let fidelity_grad = y.t_matmul(&p1);
        let smooth_grad = sparse_adjoint_transposed(&k.matrix, &p2);
        let mut x_new = x_old.clone();
        x_new
            .data
            .par_iter_mut()
            .zip(fidelity_grad.data.par_iter().zip(smooth_grad.data.par_iter()))
            .for_each(|(xv, (&g1, &g2))| {
                *xv = (*xv - tau1 * g1 - tau2 * g2).max(0.0);
            });

        if !x_new.is_finite() {
            return Err(FactorError::NumericalInstability {
                stage: "proximal factor update",
                iteration: it,
            });
        }

        // extrapolation
        x_bar = if params.acceleration_enabled {
            let theta1 = 1.0 / (1.0 + 2.0 * params.gamma1 * tau1).sqrt();
            tau1 *= theta1;
            sigma1 /= theta1;
            let theta2 = 1.0 / (1.0 + 2.0 * params.gamma2 * tau2).sqrt();
            tau2 *= theta2;
            if sigma2 > 0.0 {
                sigma2 /= theta2;
            }
            let w = 0.5 * theta1 + 0.5 * theta2;
            let data = x_new
                .data
                .iter()
                .zip(&x_old.data)
                .map(|(&xn, &xo)| xn + w * (xn - xo))
                .collect();
            RowMatrix::from_vec(data, rank, n)
        } else {
            let data = x_new
                .data
                .iter()
                .zip(&x_old.data)
                .map(|(&xn, &xo)| 2.0 * xn - xo)
                .collect();
            RowMatrix::from_vec(data, rank, n)
        };
        x_old = x_new;

        if it % 100 == 0 {
            trace!(
                "inner iteration {}: |X|_F={:.6}, |P1|_F={:.6}, |P2|_F={:.6}",
                it,
                x_old.frobenius_norm(),
                p1.frobenius_norm(),
                p2.frobenius_norm()
            );
        }
    }

    Ok((x_old, y))
}

/// One outer iteration: update `B` against `A`, then `A` against the new `B`.
#[allow(clippy::too_many_arguments)]
pub fn update_step(
    theta_tv_a: f64,
    theta_tv_b: f64,
    a: RowMatrix,
    b: RowMatrix,
    ka: &GradientOperator,
    norm_ka: f64,
    kb: &GradientOperator,
    norm_kb: f64,
    mask: &ObservationMask,
    params: &SolverParams,
) -> FactorResult<(RowMatrix, RowMatrix)> {
    let (b, a) = update_factor(theta_tv_b, b, a, kb, norm_kb, &mask.omega, &mask.oc, params)?;
    let (a_t, b_t) = update_factor(
        theta_tv_a,
        a.transpose(),
        b.transpose(),
        ka,
        norm_ka,
        &mask.omega_t,
        &mask.oc_t,
        params,
    )?;
    Ok((a_t.transpose(), b_t.transpose()))
}
