//! Linear algebra utilities for the solver and the two-view initializer.
//!
//! - Symmetric eigendecomposition by cyclic Jacobi rotations (3×3, 4×4, 9×9, 12×12)
//! - 3×3 SVD built on the eigendecomposition
//! - Real roots of cubic polynomials
//! - Sparse normal-equation accumulation stored as faer column matrices
//! - Damped linear solvers: dense Cholesky and Jacobi-preconditioned conjugate gradient

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod cholesky;
pub mod conjugate_gradient;
pub mod cubic;
pub mod eigen;
pub mod sparse;
pub mod svd;

pub use cholesky::DenseCholeskySolver;
pub use conjugate_gradient::{ConjugateGradientReport, ConjugateGradientSolver};
pub use cubic::solve_cubic;
pub use eigen::{SymmetricEigen, jacobi_eigen};
pub use sparse::SparseAccumulator;
pub use svd::{Svd3, svd3};

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Linear algebra specific error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// Dense factorization failed because the damped system is not positive definite
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    /// Operands with incompatible shapes
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Sparse matrix assembly failed
    #[error("Sparse matrix assembly failed: {0}")]
    SparseAssembly(String),
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Backend used to solve the damped normal equations
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverType {
    /// Dense Cholesky factorization of the full normal matrix
    #[default]
    DenseCholesky,
    /// Jacobi-preconditioned conjugate gradient on the sparse normal matrix
    SparseConjugateGradient,
}

impl fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::DenseCholesky => write!(f, "Dense Cholesky"),
            LinearSolverType::SparseConjugateGradient => write!(f, "Sparse Conjugate Gradient"),
        }
    }
}

/// Common interface for the damped normal-equation solvers
///
/// Implementations own an accumulated `JᵀJ` and solve `(JᵀJ + λI) x = rhs` for
/// any number of damping values without re-accumulating.
pub trait LinearSolver {
    /// Solve the damped system for the given right-hand side
    fn solve_damped(&mut self, rhs: &DVector<f64>, damping: f64) -> LinAlgResult<DVector<f64>>;

    /// Dimension of the square system
    fn dimension(&self) -> usize;
}
