//! Core components of the rotera-solver library
//!
//! This module holds the scene model and the pipeline that turns it into a
//! least-squares problem:
//! - Entities and their arena storage
//! - Explicit geometric constraints
//! - Coordinate inference from axis-aligned lines
//! - Variable layout and problem assembly
//! - Loss functions for robust estimation
//! - The constraint system orchestrating a solve, and post-solve diagnostics
//! - Jacobian rank, unconstrained directions and point uncertainties

pub mod constraints;
pub mod diagnostics;
pub mod entities;
pub mod graph;
pub mod inference;
pub mod layout;
pub mod loss_functions;
pub mod problem;
pub mod structure;
pub mod system;

pub use system::{ConstraintSystem, SolveOutcome, SystemConfig};
