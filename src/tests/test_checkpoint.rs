use std::fs;

use tempfile::TempDir;

use crate::checkpoint::*;
use crate::errors::FactorError;
use crate::operators::RowMatrix;
use crate::tests::{dense, init_logging};

#[test]
fn test_checkpoint_roundtrip_is_bit_exact() {
    init_logging();
    let a = RowMatrix::from_vec(vec![0.1, 1.0 / 3.0, 2e-300, 7.25, 0.0, 1e300], 3, 2);
    let b = RowMatrix::from_vec(vec![std::f64::consts::PI, 0.5, -0.0, 1.0 / 7.0], 2, 2);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("roundtrip.bin");

    Checkpoint::new(&a, &b, 100.0, 0.01).save(&path).unwrap();
    let loaded = Checkpoint::load(&path).unwrap();
    let (la, lb) = loaded.factors();

    assert_eq!(la.shape(), (3, 2));
    assert_eq!(lb.shape(), (2, 2));
    for (x, y) in a.data.iter().zip(&la.data) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    for (x, y) in b.data.iter().zip(&lb.data) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    assert_eq!(loaded.theta_tv_a, 100.0);
    assert_eq!(loaded.theta_tv_b, 0.01);

}

#[test]
fn test_checkpoint_from_dense() {
    let a = dense(&[&[1.0, 2.0], &[3.0, 4.0]]);
    let b = dense(&[&[5.0, 6.0, 7.0], &[8.0, 9.0, 10.0]]);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dense.bin");
    Checkpoint::from_dense(&a, &b, 1.0, 2.0).save(&path).unwrap();

    let (da, db) = Checkpoint::load(&path).unwrap().dense_factors();
    assert_eq!(RowMatrix::from_dense(&da).data, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(RowMatrix::from_dense(&db).data, vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

}

#[test]
fn test_checkpoint_save_overwrites() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("overwrite.bin");
    let one = RowMatrix::filled(2, 1, 1.0);
    let two = RowMatrix::filled(1, 2, 2.0);
    Checkpoint::new(&one, &two, 1.0, 1.0).save(&path).unwrap();
    Checkpoint::new(&one, &two, 5.0, 6.0).save(&path).unwrap();
    let loaded = Checkpoint::load(&path).unwrap();
    assert_eq!((loaded.theta_tv_a, loaded.theta_tv_b), (5.0, 6.0));
}

#[test]
fn test_missing_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.bin");
    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, FactorError::CheckpointNotFound(_)));
}

#[test]
fn test_malformed_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("garbage.bin");
    fs::write(&path, b"not a checkpoint").unwrap();
    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, FactorError::CheckpointFormat(_) | FactorError::Io(_)));
}

#[test]
fn test_inconsistent_rank_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("rank.bin");
    let a = RowMatrix::filled(3, 2, 1.0);
    let b = RowMatrix::filled(3, 4, 1.0);
    Checkpoint::new(&a, &b, 1.0, 1.0).save(&path).unwrap();
    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, FactorError::CheckpointFormat(_)));
}

#[test]
fn test_archive_layout_is_positional() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("layout.bin");
    let a = RowMatrix::from_vec(vec![1.5, 2.5, 3.5], 3, 1);
    let b = RowMatrix::from_vec(vec![4.0, 5.0], 1, 2);
    Checkpoint::new(&a, &b, 0.25, 0.5).save(&path).unwrap();

    // A leads the archive as its shape followed by the row-major values
    let bytes = fs::read(&path).unwrap();
    let (shape, data): ((usize, usize), Vec<f64>) = bincode::deserialize(&bytes).unwrap();
    assert_eq!(shape, (3, 1));
    assert_eq!(data, vec![1.5, 2.5, 3.5]);

    let whole: (StoredArray, StoredArray, f64, f64) = bincode::deserialize(&bytes).unwrap();
    assert_eq!(whole.1.shape, (1, 2));
    assert_eq!((whole.2, whole.3), (0.25, 0.5));
}
