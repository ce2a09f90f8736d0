use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use crate::errors::FactorError;
use crate::init::*;
use crate::tests::{block_interactions, dense, init_logging};

#[test]
fn test_random_factors_are_normalised() {
    init_logging();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let (a, b) = init_factor_matrices(7, 4, 3, &mut rng);

    assert_eq!(a.shape(), (7, 3));
    assert_eq!(b.shape(), (3, 4));
    assert!(a.min_value() >= 0.0);
    assert!(b.min_value() >= 0.0);
    for n in a.col_norms() {
        assert_relative_eq!(n, 1.0, epsilon = 1e-12);
    }
    for n in b.row_norms() {
        assert_relative_eq!(n, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_random_factors_follow_the_seed() {
    let (a1, b1) = init_factor_matrices(5, 6, 2, &mut ChaCha8Rng::seed_from_u64(1));
    let (a2, b2) = init_factor_matrices(5, 6, 2, &mut ChaCha8Rng::seed_from_u64(1));
    let (a3, _) = init_factor_matrices(5, 6, 2, &mut ChaCha8Rng::seed_from_u64(2));
    assert_eq!(a1, a2);
    assert_eq!(b1, b2);
    assert_ne!(a1, a3);
}

#[test]
fn test_truncated_svd_of_block_matrix() {
    // CᵗC has eigenvalues 12 and 6 on the span of the two blocks
    let c = block_interactions();
    let (u, s, v) = truncated_svd(&c, 3);
    assert_eq!(u.shape(), (6, 3));
    assert_eq!(v.shape(), (3, 5));
    assert_relative_eq!(s[0], 12f64.sqrt(), epsilon = 1e-6);
    assert_relative_eq!(s[1], 6f64.sqrt(), epsilon = 1e-6);
    assert!(s[2] < 1e-6);
}

#[test]
fn test_nndsvd_is_non_negative() {
    let c = block_interactions();
    let (w, h) = nndsvd_init(&c, 2).unwrap();
    assert_eq!(w.shape(), (6, 2));
    assert_eq!(h.shape(), (2, 5));
    assert!(w.min_value() >= 0.0);
    assert!(h.min_value() >= 0.0);
    assert!(w.frobenius_norm() > 0.0);
    assert!(h.frobenius_norm() > 0.0);
}

#[test]
fn test_nndsvd_rejects_zero_rank() {
    let c = block_interactions();
    let err = nndsvd_init(&c, 0).unwrap_err();
    assert!(matches!(err, FactorError::InvalidParameter(_)));
}

#[test]
fn test_supplied_factors_are_shape_checked() {
    let c = block_interactions();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let init = FactorInit::Supplied {
        a: dense(&[&[1.0], &[1.0]]),
        b: dense(&[&[1.0, 1.0, 1.0, 1.0, 1.0]]),
    };
    let err = initialize_factors(&c, 1, &init, &mut rng).unwrap_err();
    assert!(matches!(err, FactorError::DimensionMismatch { context: "initial factor A", .. }));
}

#[test]
fn test_supplied_factors_pass_through() {
    let c = block_interactions();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let a = dense(&[&[1.0], &[2.0], &[3.0], &[4.0], &[5.0], &[6.0]]);
    let b = dense(&[&[0.5, 0.25, 0.0, 1.0, 2.0]]);
    let init = FactorInit::Supplied { a, b };
    let (ra, rb) = initialize_factors(&c, 1, &init, &mut rng).unwrap();
    assert_eq!(ra.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(rb.data, vec![0.5, 0.25, 0.0, 1.0, 2.0]);
}

#[test]
fn test_missing_checkpoint_init_fails() {
    let c = block_interactions();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing_init.bin");
    let init = FactorInit::Checkpoint(path.clone());
    let err = initialize_factors(&c, 2, &init, &mut rng).unwrap_err();
    assert!(matches!(err, FactorError::CheckpointNotFound(p) if p == path));
}

#[test]
fn test_default_strategy_is_nndsvd() {
    assert!(matches!(FactorInit::default(), FactorInit::Nndsvd));
}
