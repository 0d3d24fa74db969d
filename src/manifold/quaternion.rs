//! Unit quaternions for camera orientation.
//!
//! A camera stores its orientation as four raw scalars `[w, x, y, z]` inside the
//! optimization vector. The solver moves those scalars freely and renormalizes them
//! after each accepted step, so the helpers here come in two flavours:
//!
//! - [`Quaternion`]: a normalized value type used by entities and initializers
//! - [`rotation_matrix`] / [`rotation_matrix_derivatives`]: the polynomial rotation
//!   formula evaluated directly on raw (possibly slightly non-unit) coordinates,
//!   which is what the residual providers differentiate
//!
//! # Examples
//!
//! ```
//! use rotera_solver::manifold::quaternion::Quaternion;
//! use nalgebra::Vector3;
//!
//! let q = Quaternion::from_axis_angle(&Vector3::z(), std::f64::consts::FRAC_PI_2);
//! let rotated = q.transform_vector(&Vector3::x());
//! assert!((rotated - Vector3::y()).norm() < 1e-12);
//! ```

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit quaternion `w + xi + yj + zk` representing a 3D rotation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    data: [f64; 4],
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quaternion(w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4})",
            self.w(),
            self.x(),
            self.y(),
            self.z()
        )
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a unit quaternion, normalizing the input.
    ///
    /// Returns None if the input has near-zero norm.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Option<Self> {
        let norm_sq = w * w + x * x + y * y + z * z;
        if norm_sq < 1e-12 || !norm_sq.is_finite() {
            return None;
        }
        let inv_norm = 1.0 / norm_sq.sqrt();
        Some(Self {
            data: [w * inv_norm, x * inv_norm, y * inv_norm, z * inv_norm],
        })
    }

    /// Build from raw `[w, x, y, z]` coordinates, falling back to identity when
    /// they are degenerate
    pub fn from_coords(coords: [f64; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3]).unwrap_or_default()
    }

    pub fn identity() -> Self {
        Self {
            data: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Rotation of `angle` radians about `axis` (need not be unit length)
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        let norm = axis.norm();
        if norm < 1e-12 {
            return Self::identity();
        }
        let half = 0.5 * angle;
        let s = half.sin() / norm;
        Self::from_coords([half.cos(), axis.x * s, axis.y * s, axis.z * s])
    }

    /// Rotation vector (axis scaled by angle)
    pub fn from_scaled_axis(rotation_vector: &Vector3<f64>) -> Self {
        Self::from_axis_angle(rotation_vector, rotation_vector.norm())
    }

    /// Convert a rotation matrix using Shepperd's method.
    pub fn from_rotation_matrix(m: &Matrix3<f64>) -> Self {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

        let (w, x, y, z) = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0; // s = 4*w
            (
                0.25 * s,
                (m[(2, 1)] - m[(1, 2)]) / s,
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(1, 0)] - m[(0, 1)]) / s,
            )
        } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
            let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*x
            (
                (m[(2, 1)] - m[(1, 2)]) / s,
                0.25 * s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
            )
        } else if m[(1, 1)] > m[(2, 2)] {
            let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0; // s = 4*y
            (
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                0.25 * s,
                (m[(1, 2)] + m[(2, 1)]) / s,
            )
        } else {
            let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0; // s = 4*z
            (
                (m[(1, 0)] - m[(0, 1)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
                (m[(1, 2)] + m[(2, 1)]) / s,
                0.25 * s,
            )
        };

        Self::from_coords([w, x, y, z])
    }

    #[inline]
    pub fn w(&self) -> f64 {
        self.data[0]
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.data[1]
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.data[2]
    }

    #[inline]
    pub fn z(&self) -> f64 {
        self.data[3]
    }

    /// Coordinates as `[w, x, y, z]`
    pub fn coords(&self) -> [f64; 4] {
        self.data
    }

    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Inverse rotation
    pub fn conjugate(&self) -> Self {
        Self {
            data: [self.w(), -self.x(), -self.y(), -self.z()],
        }
    }

    /// Hamilton product `self * other` (apply `other` first)
    pub fn multiply(&self, other: &Self) -> Self {
        let (w1, x1, y1, z1) = (self.w(), self.x(), self.y(), self.z());
        let (w2, x2, y2, z2) = (other.w(), other.x(), other.y(), other.z());
        Self::from_coords([
            w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
            w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
            w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
            w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
        ])
    }

    pub fn to_rotation_matrix(&self) -> Matrix3<f64> {
        rotation_matrix(&self.data)
    }

    /// Rotate a vector
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.to_rotation_matrix() * v
    }

    /// Rotation angle in radians, in `[0, π]`
    pub fn angle(&self) -> f64 {
        2.0 * self.w().abs().min(1.0).acos()
    }

    /// Angle of the relative rotation between two quaternions
    pub fn angle_to(&self, other: &Self) -> f64 {
        self.conjugate().multiply(other).angle()
    }

    /// Check approximate equality, accounting for the double cover (q ≡ −q).
    pub fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        let same = self
            .data
            .iter()
            .zip(other.data.iter())
            .all(|(a, b)| (a - b).abs() < tolerance);
        let flipped = self
            .data
            .iter()
            .zip(other.data.iter())
            .all(|(a, b)| (a + b).abs() < tolerance);
        same || flipped
    }
}

/// Rotation matrix of raw quaternion coordinates `[w, x, y, z]`.
///
/// Uses the homogeneous-free polynomial form, exact for unit input.
pub fn rotation_matrix(q: &[f64; 4]) -> Matrix3<f64> {
    let [w, x, y, z] = *q;
    Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Partial derivatives of [`rotation_matrix`] with respect to `w`, `x`, `y`, `z`.
pub fn rotation_matrix_derivatives(q: &[f64; 4]) -> [Matrix3<f64>; 4] {
    let [w, x, y, z] = *q;
    let dw = Matrix3::new(0.0, -z, y, z, 0.0, -x, -y, x, 0.0) * 2.0;
    let dx = Matrix3::new(0.0, y, z, y, -2.0 * x, -w, z, w, -2.0 * x) * 2.0;
    let dy = Matrix3::new(-2.0 * y, x, w, x, 0.0, z, -w, z, -2.0 * y) * 2.0;
    let dz = Matrix3::new(-2.0 * z, -w, x, w, -2.0 * z, y, x, y, 0.0) * 2.0;
    [dw, dx, dy, dz]
}

/// Normalize four consecutive raw coordinates in place.
///
/// Returns false (leaving the block untouched) when the norm is degenerate.
pub fn normalize_in_place(block: &mut [f64]) -> bool {
    debug_assert_eq!(block.len(), 4);
    let norm = block.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < 1e-12 || !norm.is_finite() {
        return false;
    }
    for v in block.iter_mut() {
        *v /= norm;
    }
    true
}
