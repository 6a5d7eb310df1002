//! Dense origin-destination matrices.
//!
//! One storage type backs demand, skims and select-link output: `rows × cols × depth` values in
//! row-major order, so that the cells of one origin row are contiguous. A row can be handed to a
//! single worker as a plain `&mut [f64]`.
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::MatrixError;

/// A dense `rows × cols × depth` matrix of `f64`.
///
/// Row `i` belongs to the `i`th origin of a run and column `j` to the `j`th destination. `depth`
/// is the number of layers per cell: demand cores, skim fields, or select-link layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OdMatrix {
    rows: usize,
    cols: usize,
    depth: usize,
    data: Vec<f64>,
}

impl OdMatrix {
    /// A zero-filled matrix.
    #[must_use]
    pub fn new(rows: usize, cols: usize, depth: usize) -> Self {
        Self::filled(rows, cols, depth, 0.0)
    }

    /// A matrix with every entry set to `value`.
    #[must_use]
    pub fn filled(rows: usize, cols: usize, depth: usize, value: f64) -> Self {
        Self { rows, cols, depth, data: vec![value; rows * cols * depth] }
    }

    /// Wraps row-major data. Fails if `data` does not hold exactly `rows * cols * depth` values.
    pub fn from_vec(rows: usize, cols: usize, depth: usize, data: Vec<f64>) -> Result<Self, MatrixError> {
        let expected = rows * cols * depth;
        if data.len() != expected {
            return Err(MatrixError::Size { rows, cols, depth, expected, found: data.len() });
        }
        Ok(Self { rows, cols, depth, data })
    }

    /// A single-core demand matrix from nested rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, Vec::len);
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_vec(rows.len(), cols, 1, data)
    }

    /// `(rows, cols, depth)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.depth)
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Number of values in one row.
    #[must_use]
    pub const fn row_len(&self) -> usize {
        self.cols * self.depth
    }

    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize, layer: usize) -> f64 {
        self.data[self.offset(row, col, layer)]
    }

    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    pub fn set(&mut self, row: usize, col: usize, layer: usize, value: f64) {
        let offset = self.offset(row, col, layer);
        self.data[offset] = value;
    }

    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    pub fn add(&mut self, row: usize, col: usize, layer: usize, value: f64) {
        let offset = self.offset(row, col, layer);
        self.data[offset] += value;
    }

    /// All layers of one cell.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> &[f64] {
        let start = (row * self.cols + col) * self.depth;
        &self.data[start..start + self.depth]
    }

    /// All cells of one row.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.row_len();
        &self.data[start..start + self.row_len()]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Values of one layer, cell by cell in row-major order.
    pub fn layer_values(&self, layer: usize) -> impl Iterator<Item = f64> + '_ {
        let cells = if layer < self.depth { self.rows * self.cols } else { 0 };
        self.data.iter().skip(layer).step_by(self.depth.max(1)).take(cells).copied()
    }

    /// Sum of one layer over all cells.
    #[must_use]
    pub fn layer_total(&self, layer: usize) -> f64 {
        self.layer_values(layer).sum()
    }

    /// Copies the layers `first..first + count` of every cell into a new matrix.
    #[must_use]
    pub fn layers(&self, first: usize, count: usize) -> Self {
        let mut out = Self::new(self.rows, self.cols, count);
        if count == 0 {
            return out;
        }
        for (dst, src) in out.data.chunks_exact_mut(count).zip(self.data.chunks_exact(self.depth.max(1))) {
            dst.copy_from_slice(&src[first..first + count]);
        }
        out
    }

    /// Rejects negative and non-finite entries, as required for demand.
    pub fn validate_demand(&self) -> Result<(), MatrixError> {
        match self.data.iter().position(|v| !v.is_finite() || *v < 0.0) {
            None => Ok(()),
            Some(pos) => {
                let layer = pos % self.depth;
                let col = (pos / self.depth) % self.cols;
                let row = pos / self.row_len();
                Err(MatrixError::InvalidValue { row, col, layer, value: self.data[pos] })
            },
        }
    }

    /// Splits the storage into disjoint blocks of `rows_per_block` consecutive rows, one slice per
    /// block, so that each block can be written by a different worker without synchronization.
    ///
    /// Always returns `ceil(rows / rows_per_block)` slices; they are empty when the matrix has no
    /// columns or no layers.
    pub(crate) fn row_blocks_mut(&mut self, rows_per_block: usize) -> Vec<&mut [f64]> {
        let blocks = self.rows.div_ceil(rows_per_block);
        let block_len = rows_per_block * self.row_len();
        if block_len == 0 {
            return std::iter::repeat_with(<&mut [f64]>::default).take(blocks).collect();
        }
        self.data.chunks_mut(block_len).collect()
    }

    /// Row, column and layer coordinates to the storage offset.
    fn offset(&self, row: usize, col: usize, layer: usize) -> usize {
        assert!(row < self.rows && col < self.cols && layer < self.depth, "matrix index out of bounds");
        (row * self.cols + col) * self.depth + layer
    }
}
