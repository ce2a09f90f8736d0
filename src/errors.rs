//! Error types shared by every stage of the factorisation pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for factorisation operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Errors raised while building operators, training factors or scoring items
#[derive(Error, Debug)]
pub enum FactorError {
    /// An edge references a node outside the graph's `0..nnodes` range
    #[error("edge {edge} references node {node}, outside [0, {nnodes})")]
    OutOfRangeNode {
        edge: usize,
        node: usize,
        nnodes: usize,
    },

    /// The requested edge weight key is not stored on the graph
    #[error("graph has no edge weight stored under key '{0}'")]
    MissingEdgeWeight(String),

    /// Operand shapes do not agree
    #[error("dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A non-finite value appeared while iterating
    #[error("numerical instability in {stage} at iteration {iteration}")]
    NumericalInstability { stage: &'static str, iteration: usize },

    /// A linear system could not be solved
    #[error("singular matrix: pivot {pivot:e} at column {column}")]
    SingularMatrix { column: usize, pivot: f64 },

    /// A keypoint column index is outside the item range
    #[error("keypoint column {index} outside [0, {ncols})")]
    KeypointOutOfRange { index: usize, ncols: usize },

    /// A keypoint id is missing from the id map
    #[error("keypoint id '{0}' not found in id map")]
    UnknownKeypoint(String),

    /// An item index used to build the interaction matrix is out of range
    #[error("group {group} references item {item}, outside [0, {nitems})")]
    ItemOutOfRange {
        group: usize,
        item: usize,
        nitems: usize,
    },

    /// Invalid configuration value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Checkpoint file does not exist
    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Checkpoint archive could not be decoded or is inconsistent
    #[error("malformed checkpoint: {0}")]
    CheckpointFormat(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for FactorError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io_err) => FactorError::Io(io_err),
            other => FactorError::CheckpointFormat(other.to_string()),
        }
    }
}
