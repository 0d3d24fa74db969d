//! Nonlinear least-squares optimization.
//!
//! The solver works on a [`Problem`](crate::core::problem::Problem): a flat
//! variable vector and scalar residual providers. The cost is the plain sum of
//! squared residuals.
//!
//! - [`levenberg_marquardt`]: damped Gauss-Newton with dense Cholesky or sparse
//!   conjugate-gradient linear solves

use nalgebra::DVector;
use std::fmt;
use std::time::Duration;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{
    LevenbergMarquardt, LevenbergMarquardtConfig, LevenbergMarquardtSummary,
};

/// Detailed convergence information.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceInfo {
    /// Final gradient norm (∞-norm of `Jᵀr`)
    pub final_gradient_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    /// Cost function evaluation count
    pub cost_evaluations: usize,
    /// Jacobian evaluation count
    pub jacobian_evaluations: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final parameter update norm: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_gradient_norm,
            self.final_parameter_update_norm,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost function tolerance reached
    CostToleranceReached,
    /// Parameter tolerance reached
    ParameterToleranceReached,
    /// Gradient tolerance reached
    GradientToleranceReached,
    /// No damping value within the retry budget reduced the cost
    RetriesExhausted,
    /// An iteration observer requested termination
    UserTerminated,
    /// Timeout reached
    Timeout,
}

impl OptimizationStatus {
    /// Whether the status is a convergence criterion rather than a budget limit
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::CostToleranceReached
                | OptimizationStatus::ParameterToleranceReached
                | OptimizationStatus::GradientToleranceReached
        )
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::RetriesExhausted => write!(f, "Damping retries exhausted"),
            OptimizationStatus::UserTerminated => write!(f, "User terminated"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final parameters
    pub parameters: DVector<f64>,
    /// Residual vector at the final parameters, in provider order
    pub residuals: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    pub converged: bool,
    /// Initial cost value
    pub init_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Total time elapsed
    pub elapsed_time: Duration,
    /// Convergence statistics
    pub convergence_info: ConvergenceInfo,
    pub summary: LevenbergMarquardtSummary,
}

/// Snapshot handed to an [`IterationObserver`] after every outer iteration
#[derive(Debug, Clone, Copy)]
pub struct IterationState<'a> {
    pub iteration: usize,
    pub cost: f64,
    pub gradient_norm: f64,
    pub damping: f64,
    pub step_norm: f64,
    /// Whether this iteration accepted a step
    pub accepted: bool,
    pub parameters: &'a [f64],
}

/// Observer's verdict after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverAction {
    Continue,
    Stop,
}

/// Progress hook checked between outer iterations
pub trait IterationObserver {
    fn on_iteration(&mut self, state: &IterationState<'_>) -> ObserverAction;
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationState<'_>) -> ObserverAction,
{
    fn on_iteration(&mut self, state: &IterationState<'_>) -> ObserverAction {
        self(state)
    }
}
