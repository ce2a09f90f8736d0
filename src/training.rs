//! Alternating proximal training of the factor pair `(A, B)`.
//!
//! `ProximalTrainer` resolves both relation graphs into gradient operators, picks the
//! starting factors, estimates the operator norms, materialises the observation mask
//! and then runs a fixed number of outer iterations, each one updating `B` and then `A`
//! with the primal–dual solver. After every outer iteration the factors are written to
//! the configured checkpoint and the optional validation callback is evaluated.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use sprs::CsMat;

use crate::checkpoint::Checkpoint;
use crate::errors::{FactorError, FactorResult};
use crate::graph::{graph_gradient_operator, RelationGraph, WeightedGraph, WEIGHT_KEY};
use crate::init::{initialize_factors, FactorInit};
use crate::operators::{frobenius_residual, RowMatrix};
use crate::proximal::{update_step, ObservationMask, RegularizationMode, SolverParams};
use crate::sparse::InteractionSource;

/// Monitoring callback evaluated on `(A, B)` after each outer iteration.
pub type ValidationFn<'a> = Box<dyn FnMut(&DenseMatrix<f64>, &DenseMatrix<f64>) -> Vec<f64> + 'a>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrainingParams {
    /// TV weight on the row graph (factor A)
    pub theta_tv_a: f64,
    /// TV weight on the column graph (factor B)
    pub theta_tv_b: f64,
    pub max_outer_iter: usize,
    pub solver: SolverParams,
    pub weight_key: String,
    pub random_init: bool,
    pub load_from_disk: bool,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            theta_tv_a: 100.0,
            theta_tv_b: 0.01,
            max_outer_iter: 7,
            solver: SolverParams {
                max_inner_iter: 800,
                ..SolverParams::default()
            },
            weight_key: WEIGHT_KEY.to_string(),
            random_init: false,
            load_from_disk: false,
            checkpoint_path: None,
        }
    }
}

/// Summary of a completed run.
#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub outer_iterations: usize,
    /// ‖C - A·B‖_F after the last iteration
    pub residual: f64,
    pub elapsed: Duration,
    /// mean validation score per outer iteration, when a callback is set
    pub validation_means: Vec<f64>,
}

/// Learned factors: `a` is rows×rank, `b` is rank×cols.
#[derive(Clone, Debug)]
pub struct TrainedFactors {
    pub a: DenseMatrix<f64>,
    pub b: DenseMatrix<f64>,
    pub report: TrainingReport,
}

pub struct ProximalTrainer<'a> {
    params: TrainingParams,
    obs: Option<RowMatrix>,
    factors: Option<(DenseMatrix<f64>, DenseMatrix<f64>)>,
    validation: Option<ValidationFn<'a>>,
}

impl Default for ProximalTrainer<'_> {
    fn default() -> Self {
        debug!("Creating ProximalTrainer with default parameters");
        Self {
            params: TrainingParams::default(),
            obs: None,
            factors: None,
            validation: None,
        }
    }
}

impl<'a> ProximalTrainer<'a> {
    pub fn new() -> Self {
        info!("Initializing new ProximalTrainer");
        Self::default()
    }

    pub fn with_params(mut self, params: TrainingParams) -> Self {
        info!("Using training parameters: {:?}", params);
        self.params = params;
        self
    }

    /// Total-variation weights for the row graph (A) and the column graph (B).
    pub fn with_tv_weights(mut self, theta_tv_a: f64, theta_tv_b: f64) -> Self {
        info!(
            "Configuring TV weights: theta_a={}, theta_b={}",
            theta_tv_a, theta_tv_b
        );
        self.params.theta_tv_a = theta_tv_a;
        self.params.theta_tv_b = theta_tv_b;
        self
    }

    pub fn with_iterations(mut self, max_outer_iter: usize, max_inner_iter: usize) -> Self {
        info!(
            "Configuring iterations: outer={}, inner={}",
            max_outer_iter, max_inner_iter
        );
        self.params.max_outer_iter = max_outer_iter;
        self.params.solver.max_inner_iter = max_inner_iter;
        self
    }

    pub fn with_mode(mut self, mode: RegularizationMode) -> Self {
        info!("Setting regularization mode: {:?}", mode);
        self.params.solver.mode = mode;
        self
    }

    pub fn with_acceleration(mut self, enabled: bool) -> Self {
        info!("Setting step-size acceleration: {}", enabled);
        self.params.solver.acceleration_enabled = enabled;
        self
    }

    pub fn with_weight_key(mut self, key: &str) -> Self {
        info!("Reading edge weights under key '{}'", key);
        self.params.weight_key = key.to_string();
        self
    }

    /// Observation weights, same shape as the interaction matrix.
    pub fn with_observation_mask(mut self, obs: &DenseMatrix<f64>) -> Self {
        info!("Using caller-supplied observation mask");
        self.obs = Some(RowMatrix::from_dense(obs));
        self
    }

    /// Starting factors, used unless random init or a checkpoint load is requested.
    pub fn with_factors(mut self, a: DenseMatrix<f64>, b: DenseMatrix<f64>) -> Self {
        info!("Using caller-supplied initial factors");
        self.factors = Some((a, b));
        self
    }

    pub fn with_random_init(mut self, random_init: bool) -> Self {
        info!("Setting random init: {}", random_init);
        self.params.random_init = random_init;
        self
    }

    /// Write `(A, B, θa, θb)` to `path` after every outer iteration.
    pub fn with_checkpoint<P: AsRef<Path>>(mut self, path: P) -> Self {
        info!("Checkpointing to {}", path.as_ref().display());
        self.params.checkpoint_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Start from the checkpoint file instead of a fresh initialisation.
    pub fn with_load_from_disk(mut self, load: bool) -> Self {
        info!("Setting load from disk: {}", load);
        self.params.load_from_disk = load;
        self
    }

    pub fn with_validation<F>(mut self, f: F) -> Self
    where
        F: FnMut(&DenseMatrix<f64>, &DenseMatrix<f64>) -> Vec<f64> + 'a,
    {
        info!("Validation callback registered");
        self.validation = Some(Box::new(f));
        self
    }

    pub fn params(&self) -> &TrainingParams {
        &self.params
    }

    /// Priority: checkpoint load, random init, supplied factors, NNDSVD.
    fn resolve_init(&mut self) -> FactorInit {
        match (&self.params.checkpoint_path, self.params.load_from_disk) {
            (Some(path), true) => return FactorInit::Checkpoint(path.clone()),
            (None, true) => warn!("Load from disk requested without a checkpoint path, ignoring"),
            _ => {}
        }
        if self.params.random_init {
            return FactorInit::Random;
        }
        match self.factors.take() {
            Some((a, b)) => FactorInit::Supplied { a, b },
            None => FactorInit::Nndsvd,
        }
    }

    /// Train with relation graphs given as square weighted adjacency matrices.
    pub fn train_with_adjacency<S, R>(
        self,
        c: &S,
        wa: &CsMat<f64>,
        wb: &CsMat<f64>,
        rank: usize,
        rng: &mut R,
    ) -> FactorResult<TrainedFactors>
    where
        S: InteractionSource,
        R: Rng,
    {
        let ga = RelationGraph::from_adjacency(wa)?;
        let gb = RelationGraph::from_adjacency(wb)?;
        self.train(c, &ga, &gb, rank, rng)
    }

    /// Learn `A` (rows×rank) and `B` (rank×cols) with `A·B ≈ C`.
    ///
    /// `wa` is the graph over rows, `wb` the graph over columns. Always runs exactly
    /// `max_outer_iter` outer iterations.
    pub fn train<S, GA, GB, R>(
        mut self,
        c: &S,
        wa: &GA,
        wb: &GB,
        rank: usize,
        rng: &mut R,
    ) -> FactorResult<TrainedFactors>
    where
        S: InteractionSource,
        GA: WeightedGraph,
        GB: WeightedGraph,
        R: Rng,
    {
        let start = Instant::now();
        let c = c.to_compressed_row();
        let (nrows, ncols) = c.shape();
        info!(
            "Proximal training: C {}x{} ({} nnz), rank {}",
            nrows,
            ncols,
            c.nnz(),
            rank
        );
        debug!("Training parameters: {:?}", self.params);

        if wa.node_count() != nrows {
            return Err(FactorError::DimensionMismatch {
                context: "row graph nodes",
                expected: (nrows, 1),
                actual: (wa.node_count(), 1),
            });
        }
        if wb.node_count() != ncols {
            return Err(FactorError::DimensionMismatch {
                context: "column graph nodes",
                expected: (ncols, 1),
                actual: (wb.node_count(), 1),
            });
        }

        // 1) gradient operators
        let ka = graph_gradient_operator(wa, &self.params.weight_key)?;
        let kb = graph_gradient_operator(wb, &self.params.weight_key)?;

        // 2) starting factors
        let init = self.resolve_init();
        info!("Initialising factors: {}", init_label(&init));
        let (mut a, mut b) = initialize_factors(&c, rank, &init, rng)?;

        // 3) operator norms
        let norm_ka = ka.norm();
        let norm_kb = kb.norm();
        debug!("Operator norms: |KA|={:.6}, |KB|={:.6}", norm_ka, norm_kb);

        // 4-5) observation weights and dense target
        let mask = ObservationMask::new(&c, self.obs.as_ref())?;

        let theta_a = self.params.theta_tv_a;
        let theta_b = self.params.theta_tv_b;
        let mut validation_means = Vec::new();
        let mut nb_iter = 0;

        while nb_iter < self.params.max_outer_iter {
            let tick = Instant::now();
            let (next_a, next_b) = update_step(
                theta_a,
                theta_b,
                a,
                b,
                &ka,
                norm_ka,
                &kb,
                norm_kb,
                &mask,
                &self.params.solver,
            )?;
            a = next_a;
            b = next_b;
            nb_iter += 1;

            if !(a.is_finite() && b.is_finite()) {
                return Err(FactorError::NumericalInstability {
                    stage: "outer iteration",
                    iteration: nb_iter,
                });
            }

            if let Some(path) = &self.params.checkpoint_path {
                Checkpoint::new(&a, &b, theta_a, theta_b).save(path)?;
            }

            if let Some(validate) = self.validation.as_mut() {
                let scores = validate(&a.to_dense(), &b.to_dense());
                if scores.is_empty() {
                    warn!("Validation callback returned no scores at step {}", nb_iter);
                } else {
                    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                    info!("Step {} validation: {:?} (mean {:.6})", nb_iter, scores, mean);
                    validation_means.push(mean);
                }
            }

            info!(
                "Step {} done in {:.3} seconds",
                nb_iter,
                tick.elapsed().as_secs_f64()
            );
        }

        let residual = frobenius_residual(&c, &a, &b);
        let elapsed = start.elapsed();
        info!(
            "Max iterations reached: {} steps, reconstruction error: {:.6}",
            nb_iter, residual
        );
        info!("Total elapsed time: {:.3} seconds", elapsed.as_secs_f64());

        Ok(TrainedFactors {
            a: a.to_dense(),
            b: b.to_dense(),
            report: TrainingReport {
                outer_iterations: nb_iter,
                residual,
                elapsed,
                validation_means,
            },
        })
    }
}

fn init_label(init: &FactorInit) -> String {
    match init {
        FactorInit::Random => "random".to_string(),
        FactorInit::Nndsvd => "nndsvd".to_string(),
        FactorInit::Supplied { .. } => "supplied".to_string(),
        FactorInit::Checkpoint(p) => format!("checkpoint {}", p.display()),
    }
}
