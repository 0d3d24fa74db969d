//! Linear eight-point solver.
//!
//! Least-squares null vector of the stacked epipolar rows, projected onto the
//! essential manifold. Inputs are already normalized image coordinates, so no
//! further conditioning is applied.

use super::{Correspondence, EssentialMatrix, matrix_from_vec};
use crate::linalg::eigen::symmetric_eigen9;
use nalgebra::SMatrix;

/// Essential matrix from eight or more correspondences, `None` below eight
pub fn eight_point(correspondences: &[Correspondence]) -> Option<EssentialMatrix> {
    if correspondences.len() < 8 {
        return None;
    }

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for c in correspondences {
        let row = c.epipolar_row();
        ata += row * row.transpose();
    }
    let (_, vectors) = symmetric_eigen9(&ata);
    let estimate = matrix_from_vec(&vectors.column(0).into_owned());
    if estimate.norm() <= 1e-12 || estimate.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(EssentialMatrix::project(&estimate))
}
