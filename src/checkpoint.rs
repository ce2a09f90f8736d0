//! Factor checkpoint: a bincode archive of the factors `A`, `B` and the regularisation
//! weights `theta_tv_a`, `theta_tv_b`.
//!
//! The layout is positional (bincode stores no field names): `A`, `B`, `theta_tv_a`,
//! `theta_tv_b` in that order. Arrays are stored as their shape followed by the row-major
//! values. `f64` values keep their exact bit pattern, so a save/load round-trip reproduces
//! the factors bit for bit.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::errors::{FactorError, FactorResult};
use crate::operators::RowMatrix;

/// Row-major dense array with its shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredArray {
    pub shape: (usize, usize),
    pub data: Vec<f64>,
}

impl StoredArray {
    fn validate(&self, name: &str) -> FactorResult<()> {
        let (r, c) = self.shape;
        if r.checked_mul(c) != Some(self.data.len()) {
            return Err(FactorError::CheckpointFormat(format!(
                "array '{}' declares shape {:?} but holds {} values",
                name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl From<&RowMatrix> for StoredArray {
    fn from(m: &RowMatrix) -> Self {
        Self {
            shape: m.shape(),
            data: m.data.clone(),
        }
    }
}

impl From<StoredArray> for RowMatrix {
    fn from(s: StoredArray) -> Self {
        RowMatrix::from_vec(s.data, s.shape.0, s.shape.1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub a: StoredArray,
    pub b: StoredArray,
    pub theta_tv_a: f64,
    pub theta_tv_b: f64,
}

impl Checkpoint {
    pub fn new(a: &RowMatrix, b: &RowMatrix, theta_tv_a: f64, theta_tv_b: f64) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            theta_tv_a,
            theta_tv_b,
        }
    }

    pub fn from_dense(
        a: &DenseMatrix<f64>,
        b: &DenseMatrix<f64>,
        theta_tv_a: f64,
        theta_tv_b: f64,
    ) -> Self {
        Self::new(
            &RowMatrix::from_dense(a),
            &RowMatrix::from_dense(b),
            theta_tv_a,
            theta_tv_b,
        )
    }

    /// Write the archive, replacing any file at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> FactorResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        debug!(
            "Checkpoint written to {} (A {:?}, B {:?})",
            path.display(),
            self.a.shape,
            self.b.shape
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> FactorResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FactorError::CheckpointNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;
        checkpoint.a.validate("A")?;
        checkpoint.b.validate("B")?;
        if checkpoint.a.shape.1 != checkpoint.b.shape.0 {
            return Err(FactorError::CheckpointFormat(format!(
                "rank of A ({}) differs from rank of B ({})",
                checkpoint.a.shape.1, checkpoint.b.shape.0
            )));
        }
        info!(
            "Loaded checkpoint {}: A {:?}, B {:?}, theta_tv_a={}, theta_tv_b={}",
            path.display(),
            checkpoint.a.shape,
            checkpoint.b.shape,
            checkpoint.theta_tv_a,
            checkpoint.theta_tv_b
        );
        Ok(checkpoint)
    }

    /// Factors as row-major matrices `(A, B)`.
    pub fn factors(&self) -> (RowMatrix, RowMatrix) {
        (self.a.clone().into(), self.b.clone().into())
    }

    /// Factors as smartcore matrices `(A, B)`.
    pub fn dense_factors(&self) -> (DenseMatrix<f64>, DenseMatrix<f64>) {
        let (a, b) = self.factors();
        (a.to_dense(), b.to_dense())
    }
}
