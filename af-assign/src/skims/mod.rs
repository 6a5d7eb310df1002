//! Origin-destination skims: cost fields summed along the chosen shortest paths.
//!
//! Skims are accumulated once per search in settlement order. Every settled node's running
//! total is its predecessor tail's total plus the predecessor link's field value, so one pass
//! over the settled nodes yields the totals of every destination.
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    AssignmentError,
    GraphError,
};
use crate::graph::Graph;
use crate::ids::NodeId;
use crate::matrix::OdMatrix;
use crate::solver::ShortestPathTree;

/// Skim value of an OD pair that has no path.
pub const UNREACHABLE: f64 = f64::INFINITY;

/// Skims of one run, `origins × destinations × fields`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkimMatrix {
    fields: Vec<String>,
    values: OdMatrix,
}

impl SkimMatrix {
    pub(crate) const fn new(fields: Vec<String>, values: OdMatrix) -> Self {
        Self { fields, values }
    }

    /// Skimmed cost fields, in layer order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub const fn matrix(&self) -> &OdMatrix {
        &self.values
    }

    #[must_use]
    pub fn into_matrix(self) -> OdMatrix {
        self.values
    }

    /// Skim of `field` for origin row `row` and destination column `col`. `None` if `field` was
    /// not skimmed; [`UNREACHABLE`] if the pair has no path.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is out of range.
    #[must_use]
    pub fn value(&self, row: usize, col: usize, field: &str) -> Option<f64> {
        let layer = self.fields.iter().position(|f| f == field)?;
        Some(self.values.get(row, col, layer))
    }
}

/// Per-worker skim scratch: running field totals per node.
#[derive(Clone, Debug)]
pub(crate) struct SkimRecorder<'g> {
    graph: &'g Graph,
    columns: Vec<usize>,
    totals: Vec<f64>,
}

impl<'g> SkimRecorder<'g> {
    /// Fails if a field is not declared on the graph.
    pub(crate) fn new(graph: &'g Graph, fields: &[String]) -> Result<Self, GraphError> {
        let columns = fields
            .iter()
            .map(|f| graph.field_index(f).ok_or_else(|| GraphError::UnknownField(f.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let totals = vec![0.0; graph.num_nodes() * columns.len()];
        Ok(Self { graph, columns, totals })
    }

    /// Number of skimmed fields.
    pub(crate) fn width(&self) -> usize {
        self.columns.len()
    }

    /// Writes the skims from the tree's origin to every destination into `row`, which holds
    /// `destinations.len() × fields` values.
    pub(crate) fn record_row(
        &mut self,
        tree: &ShortestPathTree<'_>,
        destinations: &[NodeId],
        row: &mut [f64],
    ) -> Result<(), AssignmentError> {
        let width = self.columns.len();
        if width == 0 {
            return Ok(());
        }
        debug_assert_eq!(row.len(), destinations.len() * width);

        let origin = tree.origin();
        for &node in tree.settlement_order() {
            let at = node.index() * width;
            if node == origin {
                self.totals[at..at + width].fill(0.0);
                continue;
            }
            let link = tree.predecessor(node).ok_or(AssignmentError::MissingPredecessor { origin, node })?;
            let from = self.graph.tail(link).index() * width;
            for (f, &column) in self.columns.iter().enumerate() {
                self.totals[at + f] = self.totals[from + f] + self.graph.field_column(column)[link.index()];
            }
        }

        for (cell, &destination) in row.chunks_exact_mut(width).zip(destinations) {
            if tree.is_reachable(destination) {
                let at = destination.index() * width;
                cell.copy_from_slice(&self.totals[at..at + width]);
            } else {
                cell.fill(UNREACHABLE);
            }
        }
        Ok(())
    }
}
