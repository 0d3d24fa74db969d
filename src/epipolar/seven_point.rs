//! Minimal seven-point solver.
//!
//! Seven correspondences leave a two-dimensional null space `α F₁ + (1 − α) F₂`
//! of the epipolar system. The rank-2 condition `det = 0` is a cubic in `α`,
//! giving one or three real candidates.

use super::{Correspondence, EssentialMatrix, matrix_from_vec};
use crate::linalg::cubic::solve_cubic;
use crate::linalg::eigen::symmetric_eigen9;
use nalgebra::{Matrix3, SMatrix};

/// Candidate essential matrices from exactly seven correspondences.
///
/// Returns an empty vector for any other count or a degenerate configuration.
pub fn seven_point(correspondences: &[Correspondence]) -> Vec<EssentialMatrix> {
    if correspondences.len() != 7 {
        return Vec::new();
    }

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for c in correspondences {
        let row = c.epipolar_row();
        ata += row * row.transpose();
    }
    let (_, vectors) = symmetric_eigen9(&ata);
    let f1 = matrix_from_vec(&vectors.column(0).into_owned());
    let f2 = matrix_from_vec(&vectors.column(1).into_owned());

    let blend = |alpha: f64| -> Matrix3<f64> { f1 * alpha + f2 * (1.0 - alpha) };
    let det = |alpha: f64| blend(alpha).determinant();

    // Fit the cubic through four samples
    let d0 = det(0.0);
    let d1 = det(1.0);
    let dm1 = det(-1.0);
    let d2 = det(2.0);
    let d = d0;
    let b = 0.5 * (d1 + dm1) - d;
    let odd = 0.5 * (d1 - dm1);
    let a = (d2 - 4.0 * b - d - 2.0 * odd) / 6.0;
    let c = odd - a;

    solve_cubic(a, b, c, d)
        .into_iter()
        .map(blend)
        .filter(|m| m.norm() > 1e-12 && m.iter().all(|v| v.is_finite()))
        .map(|m| EssentialMatrix::project(&m))
        .collect()
}
