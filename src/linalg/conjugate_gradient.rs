//! Jacobi-preconditioned conjugate gradient on the damped sparse normal matrix.
//!
//! Non-convergence is not an error: the last iterate is returned (CG iterates
//! decrease the energy norm of the error monotonically) and the shortfall is
//! logged, leaving the outer damping loop to judge the step.

use super::sparse::sparse_mul;
use super::{LinAlgError, LinAlgResult, LinearSolver, SparseMatrix};
use nalgebra::DVector;
use tracing::debug;

/// Outcome of one conjugate-gradient run
#[derive(Debug, Clone)]
pub struct ConjugateGradientReport {
    pub solution: DVector<f64>,
    pub iterations: usize,
    /// Final `‖b − A x‖`
    pub residual_norm: f64,
    pub converged: bool,
}

/// Iterative solver for `(H + λI) x = b` with `H` stored sparse
#[derive(Debug, Clone)]
pub struct ConjugateGradientSolver {
    hessian: SparseMatrix,
    diagonal: Vec<f64>,
    max_iterations: usize,
    tolerance: f64,
    last_report: Option<ConjugateGradientReport>,
}

impl ConjugateGradientSolver {
    /// # Arguments
    /// * `hessian` - symmetric positive semi-definite normal matrix
    /// * `diagonal` - its diagonal, used as preconditioner
    /// * `max_iterations` - iteration cap (0 means twice the dimension)
    /// * `tolerance` - relative residual target `‖r‖ ≤ tol · max(‖b‖, 1)`
    pub fn new(
        hessian: SparseMatrix,
        diagonal: Vec<f64>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Self {
        Self {
            hessian,
            diagonal,
            max_iterations,
            tolerance,
            last_report: None,
        }
    }

    pub fn last_report(&self) -> Option<&ConjugateGradientReport> {
        self.last_report.as_ref()
    }

    /// Run PCG and report convergence details
    pub fn solve_with_report(&self, rhs: &DVector<f64>, damping: f64) -> ConjugateGradientReport {
        let n = rhs.len();
        let max_iterations = if self.max_iterations == 0 {
            2 * n.max(1)
        } else {
            self.max_iterations
        };

        let apply = |v: &DVector<f64>| -> DVector<f64> {
            let mut out = sparse_mul(&self.hessian, v);
            out.axpy(damping, v, 1.0);
            out
        };
        let precondition = |r: &DVector<f64>| -> DVector<f64> {
            DVector::from_iterator(
                n,
                r.iter().zip(&self.diagonal).map(|(ri, di)| {
                    let d = di + damping;
                    if d > f64::MIN_POSITIVE { ri / d } else { *ri }
                }),
            )
        };

        let b_norm = rhs.norm();
        let tol = self.tolerance * b_norm.max(1.0);

        let mut x = DVector::zeros(n);
        let mut r = rhs.clone();
        let mut z = precondition(&r);
        let mut p = z.clone();
        let mut rz = r.dot(&z);

        let mut r_norm = r.norm();
        let mut iterations = 0;

        if r_norm <= tol {
            return ConjugateGradientReport {
                solution: x,
                iterations: 0,
                residual_norm: r_norm,
                converged: true,
            };
        }

        while iterations < max_iterations {
            iterations += 1;
            let ap = apply(&p);
            let p_ap = p.dot(&ap);
            if p_ap <= 1e-300 || !p_ap.is_finite() {
                // Curvature breakdown: matrix is not positive definite along p
                break;
            }
            let alpha = rz / p_ap;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &ap, 1.0);

            r_norm = r.norm();
            if r_norm <= tol {
                return ConjugateGradientReport {
                    solution: x,
                    iterations,
                    residual_norm: r_norm,
                    converged: true,
                };
            }

            z = precondition(&r);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            rz = rz_next;
            p = &z + p * beta;
        }

        debug!(
            "PCG stopped without converging after {} iterations (residual={:.2e}, target={:.2e})",
            iterations, r_norm, tol
        );
        ConjugateGradientReport {
            solution: x,
            iterations,
            residual_norm: r_norm,
            converged: false,
        }
    }
}

impl LinearSolver for ConjugateGradientSolver {
    fn solve_damped(&mut self, rhs: &DVector<f64>, damping: f64) -> LinAlgResult<DVector<f64>> {
        let n = self.hessian.nrows();
        if rhs.len() != n {
            return Err(LinAlgError::DimensionMismatch {
                expected: n,
                got: rhs.len(),
            });
        }
        let report = self.solve_with_report(rhs, damping);
        let solution = report.solution.clone();
        self.last_report = Some(report);
        Ok(solution)
    }

    fn dimension(&self) -> usize {
        self.hessian.nrows()
    }
}
