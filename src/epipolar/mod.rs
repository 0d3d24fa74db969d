//! Two-view epipolar geometry in normalized image coordinates.
//!
//! With camera 1 at the origin and camera 2 mapping a camera-1 point `X` to
//! `R X + t`, corresponding normalized points satisfy `x₂ᵀ E x₁ = 0` for the
//! essential matrix `E = [t]ₓ R`.
//!
//! # Module Structure
//!
//! - `seven_point`: minimal solver, up to three candidates
//! - `eight_point`: linear least-squares solver for eight or more points
//! - `ransac`: robust estimation with cheirality and Sampson scoring

use crate::linalg::eigen::symmetric_eigen4;
use crate::linalg::svd::svd3;
use nalgebra::{Matrix3, Matrix4, SVector, Vector2, Vector3};

pub mod eight_point;
pub mod ransac;
pub mod seven_point;

pub use eight_point::eight_point;
pub use ransac::{PoseEstimate, PoseScore, TwoViewConfig, estimate_relative_pose};
pub use seven_point::seven_point;

/// Minimum correspondences for the minimal solver
pub const MIN_CORRESPONDENCES: usize = 7;

/// A point seen in both views, undistorted normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub first: Vector2<f64>,
    pub second: Vector2<f64>,
}

impl Correspondence {
    pub fn new(first: Vector2<f64>, second: Vector2<f64>) -> Self {
        Self { first, second }
    }

    /// Row of the linear system `a · vec(E) = 0`, `vec` in row-major order
    pub(crate) fn epipolar_row(&self) -> SVector<f64, 9> {
        let (x1, y1) = (self.first.x, self.first.y);
        let (x2, y2) = (self.second.x, self.second.y);
        SVector::<f64, 9>::from_column_slice(&[
            x2 * x1,
            x2 * y1,
            x2,
            y2 * x1,
            y2 * y1,
            y2,
            x1,
            y1,
            1.0,
        ])
    }
}

pub(crate) fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Row-major 9-vector to 3×3 matrix
pub(crate) fn matrix_from_vec(v: &SVector<f64, 9>) -> Matrix3<f64> {
    Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8])
}

/// An essential matrix, projected so its singular values are `(1, 1, 0)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EssentialMatrix {
    matrix: Matrix3<f64>,
}

impl EssentialMatrix {
    /// `E = [t]ₓ R` for a known relative pose
    pub fn from_pose(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        Self::project(&(skew(translation) * rotation))
    }

    /// Closest essential matrix to an arbitrary 3×3 estimate
    pub fn project(estimate: &Matrix3<f64>) -> Self {
        let svd = svd3(estimate);
        let matrix = svd.u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0)) * svd.v.transpose();
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// First-order geometric error of a correspondence (normalized units squared)
    pub fn sampson_error(&self, c: &Correspondence) -> f64 {
        let x1 = Vector3::new(c.first.x, c.first.y, 1.0);
        let x2 = Vector3::new(c.second.x, c.second.y, 1.0);
        let ex1 = self.matrix * x1;
        let etx2 = self.matrix.transpose() * x2;
        let algebraic = x2.dot(&ex1);
        let denominator = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
        if denominator <= f64::MIN_POSITIVE {
            return if algebraic.abs() <= f64::MIN_POSITIVE { 0.0 } else { f64::INFINITY };
        }
        algebraic * algebraic / denominator
    }

    /// The four `(R, t)` pairs consistent with this matrix, `t` unit length
    pub fn decompose(&self) -> [RelativePose; 4] {
        let svd = svd3(&self.matrix);
        let mut u = svd.u;
        let mut v = svd.v;
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        if v.determinant() < 0.0 {
            v.column_mut(2).neg_mut();
        }

        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let r1 = u * w * v.transpose();
        let r2 = u * w.transpose() * v.transpose();
        let t = u.column(2).normalize();

        [
            RelativePose::new(r1, t),
            RelativePose::new(r1, -t),
            RelativePose::new(r2, t),
            RelativePose::new(r2, -t),
        ]
    }
}

/// Pose of camera 2 relative to camera 1: `X₂ = R X₁ + t`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativePose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RelativePose {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// True when at least two translation components are below `threshold`,
    /// i.e. the baseline lies along a coordinate axis
    pub fn is_degenerate(&self, threshold: f64) -> bool {
        let norm = self.translation.norm();
        if norm <= f64::MIN_POSITIVE {
            return true;
        }
        let t = self.translation / norm;
        t.iter().filter(|c| c.abs() < threshold).count() >= 2
    }

    /// Camera-1 frame point from a correspondence by linear triangulation.
    ///
    /// `None` for points at infinity.
    pub fn triangulate(&self, c: &Correspondence) -> Option<Vector3<f64>> {
        let p1 = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let r = &self.rotation;
        let t = &self.translation;
        let p2 = [
            [r[(0, 0)], r[(0, 1)], r[(0, 2)], t.x],
            [r[(1, 0)], r[(1, 1)], r[(1, 2)], t.y],
            [r[(2, 0)], r[(2, 1)], r[(2, 2)], t.z],
        ];

        let mut ata = Matrix4::zeros();
        for (p, x) in [(&p1, &c.first), (&p2, &c.second)] {
            for (coord, row) in [(x.x, 0), (x.y, 1)] {
                let a = nalgebra::Vector4::from_fn(|j, _| coord * p[2][j] - p[row][j]);
                ata += a * a.transpose();
            }
        }

        let (_, vectors) = symmetric_eigen4(&ata);
        let h = vectors.column(0);
        if h[3].abs() < 1e-12 {
            return None;
        }
        let point = Vector3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);
        point.iter().all(|v| v.is_finite()).then_some(point)
    }

    /// Whether the triangulated point lies in front of both cameras
    pub fn in_front(&self, c: &Correspondence) -> bool {
        self.triangulate(c).is_some_and(|p| {
            let second = self.rotation * p + self.translation;
            p.z > 0.0 && second.z > 0.0
        })
    }

    /// Number of correspondences in front of both cameras
    pub fn cheirality_count(&self, correspondences: &[Correspondence]) -> usize {
        correspondences.iter().filter(|c| self.in_front(c)).count()
    }
}
