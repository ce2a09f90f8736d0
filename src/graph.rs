//! Relation graphs and their signed incidence (gradient) operators.
//!
//! - `RelationGraph`: undirected weighted graph over the rows or the columns of the
//!   interaction matrix, with one or more named edge weight tables
//! - `GradientOperator`: E×N CSR operator, row `e` holds `+w` at the source node and
//!   `-w` at the target node, so `K · x` yields per-edge differences of a node signal

use std::collections::BTreeMap;

use log::{debug, info, trace};
use sprs::{CsMat, TriMat};

use crate::errors::{FactorError, FactorResult};
use crate::operators::spectral_norm_sparse;

/// Default key of the edge weight table.
pub const WEIGHT_KEY: &str = "weight";

/// Minimal capability set the gradient operator needs from a graph.
pub trait WeightedGraph {
    fn node_count(&self) -> usize;
    fn edge_count(&self) -> usize;
    /// Edges as `(source, target, weight)` with the weight read under `key`.
    fn weighted_edges(&self, key: &str) -> FactorResult<Vec<(usize, usize, f64)>>;
}

/// Undirected weighted graph with dense node indices `0..nnodes`.
#[derive(Clone, Debug, Default)]
pub struct RelationGraph {
    pub nnodes: usize,
    edges: Vec<(usize, usize)>,
    // one weight per edge, per key
    weights: BTreeMap<String, Vec<f64>>,
}

impl RelationGraph {
    pub fn new(nnodes: usize) -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(WEIGHT_KEY.to_string(), Vec::new());
        Self {
            nnodes,
            edges: Vec::new(),
            weights,
        }
    }

    /// Build from `(source, target, weight)` triples stored under the default key.
    pub fn from_edges(nnodes: usize, edges: &[(usize, usize, f64)]) -> Self {
        let mut g = Self::new(nnodes);
        for &(s, t, w) in edges {
            g.add_edge(s, t, w);
        }
        g
    }

    /// Append an edge under the default weight key.
    ///
    /// Other weight tables receive `0.0` for this edge.
    pub fn add_edge(&mut self, source: usize, target: usize, weight: f64) {
        self.edges.push((source, target));
        for (key, table) in self.weights.iter_mut() {
            table.push(if key == WEIGHT_KEY { weight } else { 0.0 });
        }
    }

    /// Attach an extra weight table, one value per existing edge.
    pub fn with_weights(mut self, key: &str, values: Vec<f64>) -> FactorResult<Self> {
        if values.len() != self.edges.len() {
            return Err(FactorError::DimensionMismatch {
                context: "edge weight table",
                expected: (self.edges.len(), 1),
                actual: (values.len(), 1),
            });
        }
        self.weights.insert(key.to_string(), values);
        Ok(self)
    }

    /// Convert a square weighted adjacency matrix into an undirected graph.
    ///
    /// Each unordered pair `i < j` with a nonzero entry becomes one edge; when both
    /// `(i, j)` and `(j, i)` are stored, the upper-triangle value wins. Self loops are dropped.
    pub fn from_adjacency(adjacency: &CsMat<f64>) -> FactorResult<Self> {
        let (r, c) = adjacency.shape();
        if r != c {
            return Err(FactorError::DimensionMismatch {
                context: "adjacency matrix",
                expected: (r, r),
                actual: (r, c),
            });
        }
        let mut pairs: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (&w, (i, j)) in adjacency.iter() {
            if i == j || w == 0.0 {
                continue;
            }
            let key = (i.min(j), i.max(j));
            if i < j {
                pairs.insert(key, w);
            } else {
                pairs.entry(key).or_insert(w);
            }
        }
        let mut g = Self::new(r);
        for ((i, j), w) in pairs {
            g.add_edge(i, j, w);
        }
        debug!(
            "Converted {}x{} adjacency into graph with {} edges",
            r,
            c,
            g.edge_count()
        );
        Ok(g)
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }
}

impl WeightedGraph for RelationGraph {
    fn node_count(&self) -> usize {
        self.nnodes
    }

    fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn weighted_edges(&self, key: &str) -> FactorResult<Vec<(usize, usize, f64)>> {
        let table = self
            .weights
            .get(key)
            .ok_or_else(|| FactorError::MissingEdgeWeight(key.to_string()))?;
        Ok(self
            .edges
            .iter()
            .zip(table.iter())
            .map(|(&(s, t), &w)| (s, t, w))
            .collect())
    }
}

/// Signed edge-incidence operator of a relation graph.
#[derive(Clone, Debug)]
pub struct GradientOperator {
    /// E×N operator in CSR
    pub matrix: CsMat<f64>,
    pub nnodes: usize,
    pub nedges: usize,
}

impl GradientOperator {
    /// Largest singular value ‖K‖₂, used as the dual step bound.
    pub fn norm(&self) -> f64 {
        spectral_norm_sparse(&self.matrix)
    }

    /// Per-edge differences `K · x` of a node signal.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.nnodes, "signal length must equal node count");
        self.matrix
            .outer_iterator()
            .map(|edge| edge.iter().map(|(j, &w)| w * x[j]).sum())
            .collect()
    }
}

/// Build the E×N gradient operator of `graph`, reading edge weights under `key`.
///
/// Row `i` corresponds to the `i`-th edge in the graph's edge order.
pub fn graph_gradient_operator<G: WeightedGraph>(
    graph: &G,
    key: &str,
) -> FactorResult<GradientOperator> {
    let nnodes = graph.node_count();
    let edges = graph.weighted_edges(key)?;
    let nedges = edges.len();
    info!(
        "Building gradient operator: {} edges over {} nodes (key '{}')",
        nedges, nnodes, key
    );

    let mut triplets: TriMat<f64> = TriMat::new((nedges, nnodes));
    for (i, &(src, tgt, w)) in edges.iter().enumerate() {
        for node in [src, tgt] {
            if node >= nnodes {
                return Err(FactorError::OutOfRangeNode {
                    edge: i,
                    node,
                    nnodes,
                });
            }
        }
        trace!("edge {}: {} -> {} (w={:.6})", i, src, tgt, w);
        triplets.add_triplet(i, src, w);
        triplets.add_triplet(i, tgt, -w);
    }

    let matrix: CsMat<f64> = triplets.to_csr();
    debug!(
        "Gradient operator {}x{} with {} non-zeros",
        matrix.rows(),
        matrix.cols(),
        matrix.nnz()
    );
    Ok(GradientOperator {
        matrix,
        nnodes,
        nedges,
    })
}
