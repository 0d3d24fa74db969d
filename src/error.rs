//! Error types for the rotera-solver library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! Only setup and input problems surface as errors. Numerical trouble inside the
//! solver (non positive definite systems, points behind a camera) is encoded as data
//! and never reaches this type.

use crate::{camera::CameraError, linalg::LinAlgError};
use thiserror::Error;

/// Main result type used throughout the rotera-solver library
pub type RoteraResult<T> = Result<T, SolverError>;

/// Main error type for the rotera-solver library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// Two-view initialization needs more shared observations
    #[error(
        "Insufficient correspondences for two-view initialization: found {found}, need at least {required}"
    )]
    InsufficientCorrespondences { found: usize, required: usize },

    /// A camera could not be resected from the points with known positions
    #[error(
        "Insufficient constrained points to initialize camera '{camera}': found {found}, need at least {required}"
    )]
    InsufficientConstrainedPoints {
        camera: String,
        found: usize,
        required: usize,
    },

    /// Every essential matrix candidate produced an axis-aligned or vanishing translation
    #[error(
        "Degenerate essential matrix: every candidate translation is axis-aligned or near zero"
    )]
    DegenerateTranslation,

    /// Invalid input parameters or references to missing entities
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Camera model errors
    #[error("Camera model error: {0}")]
    Camera(String),

    /// General computation errors
    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl From<LinAlgError> for SolverError {
    fn from(err: LinAlgError) -> Self {
        SolverError::LinearAlgebra(err.to_string())
    }
}

impl From<CameraError> for SolverError {
    fn from(err: CameraError) -> Self {
        SolverError::Camera(err.to_string())
    }
}
