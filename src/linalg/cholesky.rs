//! Dense Cholesky backend for the damped normal equations.

use super::{LinAlgError, LinAlgResult, LinearSolver};
use nalgebra::{DMatrix, DVector, linalg::Cholesky};

/// Solves `(H + λI) x = b` by factoring the damped dense matrix each call.
#[derive(Debug, Clone)]
pub struct DenseCholeskySolver {
    hessian: DMatrix<f64>,
}

impl DenseCholeskySolver {
    pub fn new(hessian: DMatrix<f64>) -> Self {
        Self { hessian }
    }

    pub fn hessian(&self) -> &DMatrix<f64> {
        &self.hessian
    }
}

impl LinearSolver for DenseCholeskySolver {
    fn solve_damped(&mut self, rhs: &DVector<f64>, damping: f64) -> LinAlgResult<DVector<f64>> {
        let n = self.hessian.nrows();
        if rhs.len() != n {
            return Err(LinAlgError::DimensionMismatch {
                expected: n,
                got: rhs.len(),
            });
        }

        let mut damped = self.hessian.clone();
        for i in 0..n {
            damped[(i, i)] += damping;
        }

        let factor = Cholesky::new(damped).ok_or(LinAlgError::NotPositiveDefinite)?;
        let solution = factor.solve(rhs);
        if solution.iter().all(|v| v.is_finite()) {
            Ok(solution)
        } else {
            Err(LinAlgError::NotPositiveDefinite)
        }
    }

    fn dimension(&self) -> usize {
        self.hessian.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_cholesky_solves_spd_system() -> Result<(), Box<dyn std::error::Error>> {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let mut solver = DenseCholeskySolver::new(h.clone());
        let x = solver.solve_damped(&b, 0.0)?;
        assert!((&h * &x - &b).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_damping_makes_singular_system_solvable() -> Result<(), Box<dyn std::error::Error>> {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let mut solver = DenseCholeskySolver::new(h);
        let x = solver.solve_damped(&b, 1e-3)?;
        assert!(x.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn test_indefinite_matrix_is_rejected() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -2.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let mut solver = DenseCholeskySolver::new(h);
        assert_eq!(
            solver.solve_damped(&b, 0.5),
            Err(LinAlgError::NotPositiveDefinite)
        );
    }
}
