//! Sparse accumulation of the normal matrix `JᵀJ`.
//!
//! Residual providers touch only a handful of variables, so their outer products
//! land in small blocks of an otherwise empty matrix. The accumulator sums those
//! contributions by `(row, col)` and converts the result into a faer column matrix
//! for the iterative solver.

use super::{LinAlgError, LinAlgResult, SparseMatrix};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// Square sparse matrix under construction
#[derive(Debug, Clone, Default)]
pub struct SparseAccumulator {
    dimension: usize,
    entries: BTreeMap<(usize, usize), f64>,
}

impl SparseAccumulator {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of structurally non-zero entries
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Add `value` at `(row, col)`
    ///
    /// # Panics
    /// When either index lies outside the matrix. Providers only reference indices
    /// handed out by the variable layout, so this is a broken invariant.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        assert!(
            row < self.dimension && col < self.dimension,
            "sparse entry ({row}, {col}) outside {n}x{n} matrix",
            n = self.dimension
        );
        *self.entries.entry((row, col)).or_insert(0.0) += value;
    }

    /// Add `scale · g gᵀ` over the given indices
    pub fn add_outer_product(&mut self, indices: &[usize], gradient: &[f64], scale: f64) {
        for (a, &row) in indices.iter().enumerate() {
            for (b, &col) in indices.iter().enumerate() {
                self.add(row, col, scale * gradient[a] * gradient[b]);
            }
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.entries.get(&(row, col)).copied().unwrap_or(0.0)
    }

    /// Diagonal entries, zero where nothing was accumulated
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.dimension];
        for (&(row, col), &value) in &self.entries {
            if row == col {
                diag[row] = value;
            }
        }
        diag
    }

    /// Convert into a compressed sparse column matrix
    pub fn to_sparse(&self) -> LinAlgResult<SparseMatrix> {
        let triplets: Vec<Triplet<usize, usize, f64>> = self
            .entries
            .iter()
            .map(|(&(row, col), &value)| Triplet::new(row, col, value))
            .collect();
        SparseColMat::try_new_from_triplets(self.dimension, self.dimension, &triplets)
            .map_err(|err| LinAlgError::SparseAssembly(format!("{err:?}")))
    }
}

/// `y = A x` for a compressed sparse column matrix
pub fn sparse_mul(matrix: &SparseMatrix, x: &DVector<f64>) -> DVector<f64> {
    let ncols = matrix.ncols();
    let mut result = DVector::zeros(matrix.nrows());
    let symbolic = matrix.symbolic();
    for col in 0..ncols {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = matrix.val_of_col(col);
        let xc = x[col];
        if xc == 0.0 {
            continue;
        }
        for (idx, &row) in row_indices.iter().enumerate() {
            result[row] += col_values[idx] * xc;
        }
    }
    result
}
