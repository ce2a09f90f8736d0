use approx::assert_abs_diff_eq;
use sprs::TriMat;

use crate::errors::FactorError;
use crate::graph::*;
use crate::tests::{init_logging, path_graph};

fn weighted_triangle() -> RelationGraph {
    RelationGraph::from_edges(3, &[(0, 1, 0.5), (1, 2, 2.0), (2, 0, 1.5)])
}

#[test]
fn test_gradient_operator_shape_and_rows() {
    init_logging();
    let g = weighted_triangle();
    let k = graph_gradient_operator(&g, WEIGHT_KEY).unwrap();

    assert_eq!(k.nedges, 3);
    assert_eq!(k.nnodes, 3);
    assert_eq!(k.matrix.shape(), (3, 3));

    // every edge row carries +w at its source and -w at its target
    let expected = [(0, 1, 0.5), (1, 2, 2.0), (2, 0, 1.5)];
    for (e, row) in k.matrix.outer_iterator().enumerate() {
        let (src, tgt, w) = expected[e];
        assert_eq!(row.nnz(), 2);
        assert_abs_diff_eq!(*row.get(src).unwrap(), w, epsilon = 1e-15);
        assert_abs_diff_eq!(*row.get(tgt).unwrap(), -w, epsilon = 1e-15);
        let sum: f64 = row.iter().map(|(_, &v)| v).sum();
        assert_abs_diff_eq!(sum, 0.0, epsilon = 1e-15);
    }
}

#[test]
fn test_gradient_of_constant_signal_vanishes() {
    let g = path_graph(6);
    let k = graph_gradient_operator(&g, WEIGHT_KEY).unwrap();
    let diffs = k.apply(&[3.0; 6]);
    assert_eq!(diffs.len(), 5);
    for d in diffs {
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-15);
    }

    let ramp: Vec<f64> = (0..6).map(|i| i as f64).collect();
    for d in k.apply(&ramp) {
        assert_abs_diff_eq!(d, -1.0, epsilon = 1e-15);
    }
}

#[test]
fn test_gradient_operator_norm_of_single_edge() {
    let g = RelationGraph::from_edges(2, &[(0, 1, 1.0)]);
    let k = graph_gradient_operator(&g, WEIGHT_KEY).unwrap();
    assert_abs_diff_eq!(k.norm(), 2f64.sqrt(), epsilon = 1e-6);
}

#[test]
fn test_edgeless_graph_has_zero_norm() {
    let g = RelationGraph::new(4);
    let k = graph_gradient_operator(&g, WEIGHT_KEY).unwrap();
    assert_eq!(k.matrix.shape(), (0, 4));
    assert_eq!(k.norm(), 0.0);
}

#[test]
fn test_out_of_range_node_is_rejected() {
    let g = RelationGraph::from_edges(3, &[(0, 1, 1.0), (1, 7, 1.0)]);
    let err = graph_gradient_operator(&g, WEIGHT_KEY).unwrap_err();
    match err {
        FactorError::OutOfRangeNode { edge, node, nnodes } => {
            assert_eq!((edge, node, nnodes), (1, 7, 3));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_missing_weight_key_is_rejected() {
    let g = weighted_triangle();
    let err = graph_gradient_operator(&g, "similarity").unwrap_err();
    assert!(matches!(err, FactorError::MissingEdgeWeight(ref k) if k == "similarity"));
}

#[test]
fn test_alternate_weight_table() {
    let g = weighted_triangle()
        .with_weights("similarity", vec![1.0, 1.0, 4.0])
        .unwrap();
    let k = graph_gradient_operator(&g, "similarity").unwrap();
    let row = k.matrix.outer_view(2).unwrap();
    assert_abs_diff_eq!(*row.get(2).unwrap(), 4.0, epsilon = 1e-15);
    assert_abs_diff_eq!(*row.get(0).unwrap(), -4.0, epsilon = 1e-15);

    let short = weighted_triangle().with_weights("similarity", vec![1.0]);
    assert!(matches!(short, Err(FactorError::DimensionMismatch { .. })));
}

#[test]
fn test_from_adjacency_symmetric_pairs() {
    let mut tri = TriMat::new((4, 4));
    tri.add_triplet(0, 1, 2.0);
    tri.add_triplet(1, 0, 2.0);
    tri.add_triplet(2, 3, 0.5);
    tri.add_triplet(3, 2, 0.7);
    tri.add_triplet(1, 1, 9.0);
    let adj = tri.to_csr();

    let g = RelationGraph::from_adjacency(&adj).unwrap();
    assert_eq!(g.node_count(), 4);
    assert_eq!(g.edges(), &[(0, 1), (2, 3)]);
    let weighted = g.weighted_edges(WEIGHT_KEY).unwrap();
    assert_abs_diff_eq!(weighted[1].2, 0.5, epsilon = 1e-15);
}

#[test]
fn test_from_adjacency_rejects_rectangular() {
    let tri: TriMat<f64> = TriMat::new((3, 4));
    let err = RelationGraph::from_adjacency(&tri.to_csr()).unwrap_err();
    assert!(matches!(err, FactorError::DimensionMismatch { .. }));
}
