mod test_checkpoint;
mod test_graph;
mod test_init;

use smartcore::linalg::basic::matrix::DenseMatrix;
use sprs::{CsMat, TriMat};

use crate::graph::RelationGraph;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Block-structured 6x5 interaction matrix: rows 0-2 like items 0-2, rows 3-5 like items 2-4.
pub fn block_interactions() -> CsMat<f64> {
    let mut tri = TriMat::new((6, 5));
    for i in 0..3 {
        for j in 0..3 {
            tri.add_triplet(i, j, 1.0);
        }
    }
    for i in 3..6 {
        for j in 2..5 {
            tri.add_triplet(i, j, 1.0);
        }
    }
    tri.to_csr()
}

/// Path graph over `n` nodes with unit weights.
pub fn path_graph(n: usize) -> RelationGraph {
    let edges: Vec<(usize, usize, f64)> = (1..n).map(|i| (i - 1, i, 1.0)).collect();
    RelationGraph::from_edges(n, &edges)
}

pub fn dense(rows: &[&[f64]]) -> DenseMatrix<f64> {
    let vecs: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
    DenseMatrix::from_2d_vec(&vecs).unwrap()
}
