//! Radial-tangential (Brown-Conrady) lens distortion.
//!
//! Applied on the normalized image plane, before the affine intrinsics:
//!
//! ```text
//! r² = x² + y²
//! d  = 1 + k₁·r² + k₂·r⁴ + k₃·r⁶
//! x_d = d·x + 2p₁·xy + p₂·(r² + 2x²)
//! y_d = d·y + p₁·(r² + 2y²) + 2p₂·xy
//! ```
//!
//! Distortion coefficients are never optimized, so only the Jacobian with
//! respect to the normalized point is provided.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

const UNDISTORT_MAX_ITERATIONS: usize = 20;
const UNDISTORT_TOLERANCE: f64 = 1e-12;

/// Radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
}

impl Distortion {
    pub const fn new(k1: f64, k2: f64, k3: f64, p1: f64, p2: f64) -> Self {
        Self { k1, k2, k3, p1, p2 }
    }

    /// Radial-only distortion
    pub const fn radial(k1: f64, k2: f64, k3: f64) -> Self {
        Self::new(k1, k2, k3, 0.0, 0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    pub fn is_finite(&self) -> bool {
        [self.k1, self.k2, self.k3, self.p1, self.p2]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Distort a normalized image-plane point
    pub fn distort(&self, p: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        Vector2::new(
            radial * x + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            radial * y + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Distorted point and `∂(x_d, y_d)/∂(x, y)`
    pub fn distort_with_jacobian(&self, p: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        // d(radial)/d(r²)
        let d_radial = self.k1 + 2.0 * self.k2 * r2 + 3.0 * self.k3 * r2 * r2;

        let distorted = Vector2::new(
            radial * x + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            radial * y + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        );

        let cross = 2.0 * x * y * d_radial + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        let jacobian = Matrix2::new(
            radial + 2.0 * x * x * d_radial + 2.0 * self.p1 * y + 6.0 * self.p2 * x,
            cross,
            cross,
            radial + 2.0 * y * y * d_radial + 6.0 * self.p1 * y + 2.0 * self.p2 * x,
        );

        (distorted, jacobian)
    }

    /// Invert [`Distortion::distort`] with Newton iterations.
    ///
    /// Starts from the distorted point itself, which is exact for zero distortion
    /// and close for the mild coefficients seen in practice.
    pub fn undistort(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        if self.is_zero() {
            return *distorted;
        }

        let mut p = *distorted;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let (current, jacobian) = self.distort_with_jacobian(&p);
            let error = current - distorted;
            if error.norm() < UNDISTORT_TOLERANCE {
                break;
            }
            let Some(inverse) = jacobian.try_inverse() else {
                break;
            };
            let step = inverse * error;
            if !step.iter().all(|v| v.is_finite()) {
                break;
            }
            p -= step;
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f64, b: f64, eps: f64) {
        assert!(
            (a - b).abs() < eps,
            "Values {} and {} differ by more than {}",
            a,
            b,
            eps
        );
    }

    fn sample() -> Distortion {
        Distortion::new(-0.28340811, 0.07395907, 0.0, 0.00019359, 1.76187114e-05)
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let p = Vector2::new(0.3, -0.2);
        let d = Distortion::default();
        assert_eq!(d.distort(&p), p);
        assert_eq!(d.undistort(&p), p);
        assert!(d.is_zero());
    }

    #[test]
    fn test_distortion_at_optical_axis() {
        let d = sample().distort(&Vector2::zeros());
        assert_approx_eq(d.x, 0.0, 1e-15);
        assert_approx_eq(d.y, 0.0, 1e-15);
    }

    #[test]
    fn test_distortion_jacobian_numerical() {
        let distortion = Distortion::new(-0.2, 0.05, 0.01, 0.001, -0.002);
        let p = Vector2::new(0.1, 0.2);
        let (_, analytic) = distortion.distort_with_jacobian(&p);
        let eps = 1e-7;

        for i in 0..2 {
            let mut plus = p;
            let mut minus = p;
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (distortion.distort(&plus) - distortion.distort(&minus)) / (2.0 * eps);
            for r in 0..2 {
                assert!(
                    (analytic[(r, i)] - numeric[r]).abs() < 1e-6,
                    "Mismatch at ({}, {}): {} vs {}",
                    r,
                    i,
                    analytic[(r, i)],
                    numeric[r]
                );
            }
        }
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let distortion = sample();
        let p = Vector2::new(0.25, -0.15);
        let recovered = distortion.undistort(&distortion.distort(&p));
        assert_approx_eq(recovered.x, p.x, 1e-10);
        assert_approx_eq(recovered.y, p.y, 1e-10);
    }
}
