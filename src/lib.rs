//! # tvfactor
//!
//! Graph-regularised non-negative matrix factorisation for recommendation.
//!
//! A sparse interaction matrix `C` (rows: users or playlists, columns: items or songs)
//! is approximated by `A · B` with non-negative factors that vary smoothly along two
//! relation graphs, one over rows and one over columns. Smoothness is imposed through
//! total-variation (or Dirichlet) penalties on the graph gradient of each factor and
//! the problem is solved by alternating primal–dual proximal updates.
//! Learned factors then score items for a query made of a few known ratings.
//!
//! ```ignore
//! use tvfactor::graph::RelationGraph;
//! use tvfactor::training::ProximalTrainer;
//! use tvfactor::recommend::{recommend_from_keypoints, ScorerParams};
//! use rand::SeedableRng;
//!
//! let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
//! let trained = ProximalTrainer::new()
//!     .with_tv_weights(100.0, 0.01)
//!     .with_iterations(7, 800)
//!     .train(&c, &row_graph, &col_graph, 10, &mut rng)?;
//!
//! let hits = recommend_from_keypoints(&trained.a, &trained.b, &[(3, 1.0)], &ScorerParams::new(5))?;
//! ```

pub mod checkpoint;
pub mod errors;
pub mod graph;
pub mod init;
pub mod operators;
pub mod proximal;
pub mod recommend;
pub mod sparse;
pub mod training;

pub use errors::{FactorError, FactorResult};

#[cfg(test)]
mod tests;
