//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt algorithm interpolates between Gauss-Newton and
//! gradient descent by adding a damping term to the normal equations:
//!
//! ```text
//! (JᵀJ + λI) Δ = −Jᵀr
//! ```
//!
//! This implementation includes:
//! - Normal equations accumulated provider by provider, never forming `J`
//! - Dense Cholesky or sparse Jacobi-preconditioned CG linear solves
//! - A bounded inner retry loop that grows `λ` until the cost decreases
//! - Renormalization of every free quaternion block after each accepted step
//! - An optional observer that may stop the run between iterations

use super::{
    ConvergenceInfo, IterationObserver, IterationState, ObserverAction, OptimizationStatus,
    SolverResult,
};
use crate::core::problem::Problem;
use crate::error::RoteraResult;
use crate::linalg::{
    ConjugateGradientSolver, DenseCholeskySolver, LinearSolver, LinearSolverType,
    SparseAccumulator,
};
use crate::manifold::quaternion::normalize_in_place;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration of the Levenberg-Marquardt solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevenbergMarquardtConfig {
    /// Maximum number of outer iterations
    pub max_iterations: usize,
    /// Absolute cost change below which the run has converged
    pub cost_tolerance: f64,
    /// Cost change relative to the current cost below which the run has converged
    pub relative_cost_tolerance: f64,
    /// ∞-norm of `Jᵀr` below which the run has converged
    pub gradient_tolerance: f64,
    /// Step norm relative to the parameter norm below which the run has converged
    pub parameter_tolerance: f64,
    /// Damping increases allowed within one outer iteration
    pub max_retries: usize,
    pub initial_damping: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    pub damping_increase_factor: f64,
    pub damping_decrease_factor: f64,
    pub linear_solver: LinearSolverType,
    /// Conjugate-gradient iteration cap (0 means twice the dimension)
    pub cg_max_iterations: usize,
    /// Conjugate-gradient relative residual target
    pub cg_tolerance: f64,
    pub timeout: Option<Duration>,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-10,
            relative_cost_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-12,
            max_retries: 10,
            initial_damping: 1e-3,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.1,
            linear_solver: LinearSolverType::default(),
            cg_max_iterations: 0,
            cg_tolerance: 1e-10,
            timeout: None,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, absolute: f64, relative: f64) -> Self {
        self.cost_tolerance = absolute;
        self.relative_cost_tolerance = relative;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }

    /// Set the damping parameter bounds.
    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    /// Set the damping adjustment factors.
    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn with_linear_solver(mut self, linear_solver: LinearSolverType) -> Self {
        self.linear_solver = linear_solver;
        self
    }

    pub fn with_cg_settings(mut self, max_iterations: usize, tolerance: f64) -> Self {
        self.cg_max_iterations = max_iterations;
        self.cg_tolerance = tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Summary statistics for the Levenberg-Marquardt optimization process.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of successful steps (cost decreased)
    pub successful_steps: usize,
    /// Number of unsuccessful steps (cost increased, damping increased)
    pub unsuccessful_steps: usize,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Average cost reduction per iteration
    pub average_cost_reduction: f64,
    /// Maximum gradient norm encountered
    pub max_gradient_norm: f64,
    /// Final gradient norm
    pub final_gradient_norm: f64,
    /// Maximum parameter update norm
    pub max_parameter_update_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    pub linear_solver: LinearSolverType,
    pub status: OptimizationStatus,
    /// Total time elapsed
    pub total_time: Duration,
    /// Average time per iteration
    pub average_time_per_iteration: Duration,
}

impl fmt::Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Levenberg-Marquardt Optimization Summary ===")?;
        writeln!(f, "Status:                    {}", self.status)?;
        writeln!(f, "Linear solver:             {}", self.linear_solver)?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Cost reduction:            {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(
            f,
            "Successful steps:          {} ({:.1}%)",
            self.successful_steps,
            100.0 * self.successful_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(f, "Unsuccessful steps:        {}", self.unsuccessful_steps)?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_damping)?;
        writeln!(
            f,
            "Average cost reduction:    {:.6e}",
            self.average_cost_reduction
        )?;
        writeln!(
            f,
            "Max gradient norm:         {:.6e}",
            self.max_gradient_norm
        )?;
        writeln!(
            f,
            "Final gradient norm:       {:.6e}",
            self.final_gradient_norm
        )?;
        writeln!(
            f,
            "Max parameter update norm: {:.6e}",
            self.max_parameter_update_norm
        )?;
        writeln!(
            f,
            "Final param update norm:   {:.6e}",
            self.final_parameter_update_norm
        )?;
        writeln!(f, "Total time:                {:?}", self.total_time)?;
        writeln!(
            f,
            "Average time per iteration: {:?}",
            self.average_time_per_iteration
        )?;
        Ok(())
    }
}

/// Gauss-Newton approximation at one point
struct Linearization {
    solver: Box<dyn LinearSolver>,
    /// `Jᵀr`
    gradient: DVector<f64>,
}

/// Levenberg-Marquardt solver for nonlinear least squares optimization.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
    damping: f64,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(LevenbergMarquardtConfig::default())
    }

    /// Create a new Levenberg-Marquardt solver with the given configuration.
    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        let damping = config.initial_damping;
        Self { config, damping }
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Current damping, the final one after a run
    pub fn damping(&self) -> f64 {
        self.damping
    }

    fn increase_damping(&mut self) {
        self.damping =
            (self.damping * self.config.damping_increase_factor).min(self.config.damping_max);
    }

    fn decrease_damping(&mut self) {
        self.damping =
            (self.damping * self.config.damping_decrease_factor).max(self.config.damping_min);
    }

    /// Accumulate `JᵀJ` and `Jᵀr` into the configured backend
    fn linearize(&self, problem: &Problem, vars: &[f64]) -> RoteraResult<Linearization> {
        let n = problem.dimension();
        let mut gradient = DVector::zeros(n);

        let solver: Box<dyn LinearSolver> = match self.config.linear_solver {
            LinearSolverType::DenseCholesky => {
                let mut hessian = DMatrix::zeros(n, n);
                for provider in problem.providers() {
                    let (r, g) = provider.evaluate(vars);
                    let indices = provider.indices();
                    for (a, &row) in indices.iter().enumerate() {
                        gradient[row] += r * g[a];
                        for (b, &col) in indices.iter().enumerate() {
                            hessian[(row, col)] += g[a] * g[b];
                        }
                    }
                }
                Box::new(DenseCholeskySolver::new(hessian))
            }
            LinearSolverType::SparseConjugateGradient => {
                let mut hessian = SparseAccumulator::new(n);
                for provider in problem.providers() {
                    let (r, g) = provider.evaluate(vars);
                    let indices = provider.indices();
                    for (a, &row) in indices.iter().enumerate() {
                        gradient[row] += r * g[a];
                    }
                    hessian.add_outer_product(indices, &g, 1.0);
                }
                Box::new(ConjugateGradientSolver::new(
                    hessian.to_sparse()?,
                    hessian.diagonal(),
                    self.config.cg_max_iterations,
                    self.config.cg_tolerance,
                ))
            }
        };

        Ok(Linearization { solver, gradient })
    }

    /// Renormalize every free quaternion block of `vars`
    fn renormalize(problem: &Problem, vars: &mut DVector<f64>) {
        let slice = vars.as_mut_slice();
        for &start in problem.quaternion_blocks() {
            if !normalize_in_place(&mut slice[start..start + 4]) {
                debug!("Quaternion block at {} has vanishing norm", start);
            }
        }
    }

    fn parameter_tolerance_reached(&self, step_norm: f64, params: &DVector<f64>) -> bool {
        let tol = self.config.parameter_tolerance;
        step_norm <= tol * (params.norm() + tol)
    }

    fn cost_tolerance_reached(&self, reduction: f64, cost: f64) -> bool {
        reduction.abs() < self.config.cost_tolerance
            || reduction.abs() < self.config.relative_cost_tolerance * cost
    }

    /// Minimize the problem starting from `initial`
    pub fn minimize(&mut self, problem: &Problem, initial: &[f64]) -> RoteraResult<SolverResult> {
        self.run(problem, initial, None)
    }

    /// Minimize, consulting `observer` after every outer iteration
    pub fn minimize_with_observer(
        &mut self,
        problem: &Problem,
        initial: &[f64],
        observer: &mut dyn IterationObserver,
    ) -> RoteraResult<SolverResult> {
        self.run(problem, initial, Some(observer))
    }

    fn run(
        &mut self,
        problem: &Problem,
        initial: &[f64],
        mut observer: Option<&mut dyn IterationObserver>,
    ) -> RoteraResult<SolverResult> {
        assert_eq!(
            initial.len(),
            problem.dimension(),
            "initial vector does not match the problem dimension"
        );
        let start_time = Instant::now();
        self.damping = self.config.initial_damping;

        let mut params = DVector::from_column_slice(initial);
        let mut cost_evaluations = 1;
        let mut jacobian_evaluations = 0;
        let initial_cost = problem.cost(params.as_slice());
        let mut current_cost = initial_cost;

        let mut successful_steps = 0;
        let mut unsuccessful_steps = 0;
        let mut max_gradient_norm: f64 = 0.0;
        let mut final_gradient_norm = 0.0;
        let mut max_parameter_update_norm: f64 = 0.0;
        let mut final_parameter_update_norm = 0.0;
        let mut total_cost_reduction = 0.0;
        let mut last_reduction: Option<f64> = None;
        let mut iteration = 0;

        debug!(
            "Starting Levenberg-Marquardt: {} variables, {} residuals, initial cost {:.6e}, damping {:.2e}",
            problem.dimension(),
            problem.len(),
            initial_cost,
            self.damping
        );

        let status = loop {
            if let Some(timeout) = self.config.timeout
                && start_time.elapsed() >= timeout
            {
                break OptimizationStatus::Timeout;
            }
            if iteration >= self.config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }

            let mut linearization = self.linearize(problem, params.as_slice())?;
            jacobian_evaluations += 1;
            let gradient_norm = linearization.gradient.amax();
            max_gradient_norm = max_gradient_norm.max(gradient_norm);
            final_gradient_norm = gradient_norm;

            if gradient_norm < self.config.gradient_tolerance {
                break OptimizationStatus::GradientToleranceReached;
            }
            if let Some(reduction) = last_reduction
                && self.cost_tolerance_reached(reduction, current_cost)
            {
                break OptimizationStatus::CostToleranceReached;
            }

            let rhs = -&linearization.gradient;
            let mut accepted = false;
            let mut step_norm = 0.0;
            let mut converged_on_step = false;

            for _ in 0..=self.config.max_retries {
                let step = match linearization.solver.solve_damped(&rhs, self.damping) {
                    Ok(step) => step,
                    Err(err) => {
                        debug!(
                            "Iteration {}: linear solve failed at damping {:.2e} ({}), taking a zero step",
                            iteration + 1,
                            self.damping,
                            err
                        );
                        unsuccessful_steps += 1;
                        self.increase_damping();
                        continue;
                    }
                };

                step_norm = step.norm();
                max_parameter_update_norm = max_parameter_update_norm.max(step_norm);
                final_parameter_update_norm = step_norm;
                if self.parameter_tolerance_reached(step_norm, &params) {
                    converged_on_step = true;
                    break;
                }

                let mut candidate = &params + &step;
                Self::renormalize(problem, &mut candidate);
                let new_cost = problem.cost(candidate.as_slice());
                cost_evaluations += 1;

                if new_cost.is_finite() && new_cost < current_cost {
                    let reduction = current_cost - new_cost;
                    debug!(
                        "Iteration {}: cost = {:.6e}, reduction = {:.6e}, damping = {:.2e}, step_norm = {:.6e} [ACCEPTED]",
                        iteration + 1,
                        new_cost,
                        reduction,
                        self.damping,
                        step_norm
                    );
                    params = candidate;
                    current_cost = new_cost;
                    total_cost_reduction += reduction;
                    last_reduction = Some(reduction);
                    successful_steps += 1;
                    self.decrease_damping();
                    accepted = true;
                    break;
                }

                debug!(
                    "Iteration {}: cost = {:.6e}, damping = {:.2e}, step_norm = {:.6e} [REJECTED]",
                    iteration + 1,
                    new_cost,
                    self.damping,
                    step_norm
                );
                unsuccessful_steps += 1;
                self.increase_damping();
            }

            if converged_on_step {
                break OptimizationStatus::ParameterToleranceReached;
            }
            iteration += 1;
            if !accepted {
                break OptimizationStatus::RetriesExhausted;
            }

            if let Some(observer) = observer.as_deref_mut() {
                let state = IterationState {
                    iteration,
                    cost: current_cost,
                    gradient_norm,
                    damping: self.damping,
                    step_norm,
                    accepted,
                    parameters: params.as_slice(),
                };
                if observer.on_iteration(&state) == ObserverAction::Stop {
                    break OptimizationStatus::UserTerminated;
                }
            }
        };

        let elapsed = start_time.elapsed();
        let summary = LevenbergMarquardtSummary {
            initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            successful_steps,
            unsuccessful_steps,
            final_damping: self.damping,
            average_cost_reduction: if iteration > 0 {
                total_cost_reduction / iteration as f64
            } else {
                0.0
            },
            max_gradient_norm,
            final_gradient_norm,
            max_parameter_update_norm,
            final_parameter_update_norm,
            linear_solver: self.config.linear_solver,
            status,
            total_time: elapsed,
            average_time_per_iteration: if iteration > 0 {
                elapsed / iteration as u32
            } else {
                Duration::from_secs(0)
            },
        };
        info!(
            "Levenberg-Marquardt finished: {} after {} iterations, cost {:.6e} -> {:.6e}",
            status, iteration, initial_cost, current_cost
        );

        Ok(SolverResult {
            residuals: problem.residuals(params.as_slice()),
            parameters: params,
            status,
            converged: status.is_converged(),
            init_cost: initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            elapsed_time: elapsed,
            convergence_info: ConvergenceInfo {
                final_gradient_norm,
                final_parameter_update_norm,
                cost_evaluations,
                jacobian_evaluations,
            },
            summary,
        })
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::PointKey;
    use crate::factors::{ResidualOwner, ResidualProvider, ResidualTag};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn tag(slot: usize) -> ResidualTag {
        ResidualTag::new(ResidualOwner::Point(PointKey::default()), slot)
    }

    /// Rosenbrock residuals `(a − x, √b (y − x²))`
    #[derive(Debug)]
    struct Rosenbrock {
        component: usize,
        a: f64,
        b: f64,
        indices: Vec<usize>,
    }

    impl Rosenbrock {
        fn pair(a: f64, b: f64) -> [Self; 2] {
            [0, 1].map(|component| Self {
                component,
                a,
                b,
                indices: vec![0, 1],
            })
        }
    }

    impl ResidualProvider for Rosenbrock {
        fn indices(&self) -> &[usize] {
            &self.indices
        }

        fn residual(&self, vars: &[f64]) -> f64 {
            let (x, y) = (vars[0], vars[1]);
            match self.component {
                0 => self.a - x,
                _ => self.b.sqrt() * (y - x * x),
            }
        }

        fn gradient(&self, vars: &[f64]) -> Vec<f64> {
            match self.component {
                0 => vec![-1.0, 0.0],
                _ => vec![-2.0 * self.b.sqrt() * vars[0], self.b.sqrt()],
            }
        }

        fn tag(&self) -> ResidualTag {
            tag(self.component)
        }

        fn kind(&self) -> &'static str {
            "rosenbrock"
        }
    }

    /// `vars[index] − target`
    #[derive(Debug)]
    struct Pull {
        indices: Vec<usize>,
        target: f64,
    }

    impl ResidualProvider for Pull {
        fn indices(&self) -> &[usize] {
            &self.indices
        }

        fn residual(&self, vars: &[f64]) -> f64 {
            vars[self.indices[0]] - self.target
        }

        fn gradient(&self, _vars: &[f64]) -> Vec<f64> {
            vec![1.0]
        }

        fn tag(&self) -> ResidualTag {
            tag(self.indices[0])
        }

        fn kind(&self) -> &'static str {
            "pull"
        }
    }

    fn rosenbrock_problem() -> Problem {
        let mut problem = Problem::new(2);
        for provider in Rosenbrock::pair(1.0, 10.0) {
            problem.add_provider(provider);
        }
        problem
    }

    #[test]
    fn test_config_builder() {
        let config = LevenbergMarquardtConfig::new()
            .with_damping(1e-6)
            .with_damping_bounds(1e-15, 1e15)
            .with_linear_solver(LinearSolverType::SparseConjugateGradient)
            .with_max_iterations(7);
        assert_eq!(config.initial_damping, 1e-6);
        assert_eq!(config.damping_min, 1e-15);
        assert_eq!(config.damping_max, 1e15);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(LevenbergMarquardt::with_config(config).damping(), 1e-6);
    }

    #[test]
    fn test_rosenbrock_optimization() -> TestResult {
        let problem = rosenbrock_problem();
        let mut solver = LevenbergMarquardt::new();
        let result = solver.minimize(&problem, &[-1.2, 1.0])?;

        assert!(result.converged, "status: {}", result.status);
        assert!(result.final_cost < 1e-10, "final cost {}", result.final_cost);
        assert!((result.parameters[0] - 1.0).abs() < 1e-4);
        assert!((result.parameters[1] - 1.0).abs() < 1e-4);
        assert_eq!(result.residuals.len(), 2);
        assert!(result.summary.successful_steps > 0);
        Ok(())
    }

    #[test]
    fn test_dense_and_sparse_agree() -> TestResult {
        let problem = rosenbrock_problem();
        let dense = LevenbergMarquardt::new().minimize(&problem, &[0.0, 0.0])?;
        let sparse = LevenbergMarquardt::with_config(
            LevenbergMarquardtConfig::new()
                .with_linear_solver(LinearSolverType::SparseConjugateGradient),
        )
        .minimize(&problem, &[0.0, 0.0])?;

        assert!((dense.parameters - sparse.parameters).amax() < 1e-6);
        assert_eq!(
            sparse.summary.linear_solver,
            LinearSolverType::SparseConjugateGradient
        );
        Ok(())
    }

    #[test]
    fn test_gradient_tolerance_at_optimum() -> TestResult {
        let problem = rosenbrock_problem();
        let result = LevenbergMarquardt::new().minimize(&problem, &[1.0, 1.0])?;
        assert_eq!(result.status, OptimizationStatus::GradientToleranceReached);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.final_cost, 0.0);
        Ok(())
    }

    #[test]
    fn test_max_iterations() -> TestResult {
        let problem = rosenbrock_problem();
        let mut solver =
            LevenbergMarquardt::with_config(LevenbergMarquardtConfig::new().with_max_iterations(1));
        let result = solver.minimize(&problem, &[-1.2, 1.0])?;
        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert!(result.final_cost < result.init_cost);
        Ok(())
    }

    #[test]
    fn test_observer_can_stop() -> TestResult {
        let problem = rosenbrock_problem();
        let mut seen = Vec::new();
        let mut observer = |state: &IterationState<'_>| {
            seen.push(state.cost);
            if state.iteration == 2 {
                ObserverAction::Stop
            } else {
                ObserverAction::Continue
            }
        };
        let result =
            LevenbergMarquardt::new().minimize_with_observer(&problem, &[-1.2, 1.0], &mut observer)?;
        assert_eq!(result.status, OptimizationStatus::UserTerminated);
        assert_eq!(result.iterations, 2);
        assert_eq!(seen.len(), 2);
        assert!(seen[1] <= seen[0]);
        Ok(())
    }

    #[test]
    fn test_quaternion_blocks_stay_normalized() -> TestResult {
        // Pull a quaternion block towards a non-unit target; every accepted
        // iterate must still have unit norm
        let mut problem = Problem::new(5).with_quaternion_blocks(vec![1]);
        for (i, target) in [3.0, 2.0, 1.0, 0.5, -0.5].into_iter().enumerate() {
            problem.add_provider(Pull {
                indices: vec![i],
                target,
            });
        }

        let mut norms = Vec::new();
        let mut observer = |state: &IterationState<'_>| {
            let q = &state.parameters[1..5];
            norms.push(q.iter().map(|v| v * v).sum::<f64>().sqrt());
            ObserverAction::Continue
        };
        let result = LevenbergMarquardt::new().minimize_with_observer(
            &problem,
            &[0.0, 1.0, 0.0, 0.0, 0.0],
            &mut observer,
        )?;

        assert!(!norms.is_empty());
        assert!(norms.iter().all(|n| (n - 1.0).abs() < 1e-9));
        let q = result.parameters.rows(1, 4);
        assert!((q.norm() - 1.0).abs() < 1e-9);
        assert!((result.parameters[0] - 3.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_summary_display() -> TestResult {
        let problem = rosenbrock_problem();
        let result = LevenbergMarquardt::new().minimize(&problem, &[0.5, 0.5])?;
        let text = result.summary.to_string();
        assert!(text.contains("Levenberg-Marquardt Optimization Summary"));
        assert!(text.contains("Dense Cholesky"));
        Ok(())
    }
}
