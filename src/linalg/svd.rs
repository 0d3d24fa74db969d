//! 3×3 singular value decomposition built on the Jacobi eigensolver.
//!
//! `AᵀA = V Σ² Vᵀ` gives the right singular vectors; left singular vectors follow
//! from `u_i = A v_i / σ_i`. Columns whose singular value vanishes are completed to
//! an orthonormal basis with cross products, so `U` and `V` are always orthogonal.

use super::eigen::symmetric_eigen3;
use nalgebra::{Matrix3, Vector3};

/// Relative threshold below which a singular value is treated as zero. Singular
/// values come from square roots of eigenvalues, so noise sits near sqrt(ε).
const RANK_EPSILON: f64 = 1e-7;

/// `A = U diag(σ) Vᵀ` with `σ` sorted in descending order
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    pub u: Matrix3<f64>,
    pub singular_values: Vector3<f64>,
    pub v: Matrix3<f64>,
}

impl Svd3 {
    /// Rebuild `U diag(σ) Vᵀ`
    pub fn recompose(&self) -> Matrix3<f64> {
        self.u * Matrix3::from_diagonal(&self.singular_values) * self.v.transpose()
    }

    /// Numerical rank under the relative threshold
    pub fn rank(&self) -> usize {
        let largest = self.singular_values[0];
        if largest <= 0.0 {
            return 0;
        }
        self.singular_values
            .iter()
            .filter(|&&s| s > RANK_EPSILON * largest)
            .count()
    }
}

/// Any unit vector orthogonal to `v`
fn orthogonal_unit(v: &Vector3<f64>) -> Vector3<f64> {
    let pick = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&pick).normalize()
}

/// Decompose a 3×3 matrix
pub fn svd3(a: &Matrix3<f64>) -> Svd3 {
    let ata = a.transpose() * a;
    let (values, vectors) = symmetric_eigen3(&ata);

    // Eigenvalues come ascending; singular values are wanted descending.
    let mut v = Matrix3::zeros();
    let mut singular_values = Vector3::zeros();
    for k in 0..3 {
        v.set_column(k, &vectors.column(2 - k));
        singular_values[k] = values[2 - k].max(0.0).sqrt();
    }
    if v.determinant() < 0.0 {
        let flipped = -v.column(2);
        v.set_column(2, &flipped);
    }

    let largest = singular_values[0];
    if largest <= f64::MIN_POSITIVE {
        return Svd3 {
            u: Matrix3::identity(),
            singular_values: Vector3::zeros(),
            v,
        };
    }

    let mut u = Matrix3::zeros();
    let u0 = (a * v.column(0)) / singular_values[0];
    let u0 = u0.normalize();
    u.set_column(0, &u0);

    let u1 = if singular_values[1] > RANK_EPSILON * largest {
        let raw = (a * v.column(1)) / singular_values[1];
        (raw - u0 * u0.dot(&raw)).normalize()
    } else {
        orthogonal_unit(&u0)
    };
    u.set_column(1, &u1);

    let u2 = if singular_values[2] > RANK_EPSILON * largest {
        let raw = (a * v.column(2)) / singular_values[2];
        let raw = raw - u0 * u0.dot(&raw) - u1 * u1.dot(&raw);
        raw.normalize()
    } else {
        u0.cross(&u1)
    };
    u.set_column(2, &u2);

    Svd3 {
        u,
        singular_values,
        v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthogonal(m: &Matrix3<f64>) {
        let gram = m.transpose() * m;
        assert!(
            (gram - Matrix3::identity()).norm() < 1e-9,
            "matrix is not orthogonal: {m}"
        );
    }

    #[test]
    fn test_svd3_full_rank() {
        let a = Matrix3::new(2.0, -1.0, 0.5, 0.3, 1.5, -2.0, 1.0, 0.2, 3.0);
        let svd = svd3(&a);
        assert_orthogonal(&svd.u);
        assert_orthogonal(&svd.v);
        assert!((svd.recompose() - a).norm() < 1e-9);
        assert!(svd.singular_values[0] >= svd.singular_values[1]);
        assert!(svd.singular_values[1] >= svd.singular_values[2]);
        assert_eq!(svd.rank(), 3);
    }

    #[test]
    fn test_svd3_rank_two_skew() {
        // Skew-symmetric matrices have singular values (s, s, 0)
        let t = Vector3::new(0.3, -0.4, 1.2);
        let a = t.cross_matrix();
        let svd = svd3(&a);
        assert_orthogonal(&svd.u);
        assert_orthogonal(&svd.v);
        assert!((svd.recompose() - a).norm() < 1e-6);
        assert!((svd.singular_values[0] - t.norm()).abs() < 1e-9);
        assert!((svd.singular_values[1] - t.norm()).abs() < 1e-9);
        assert!(svd.singular_values[2].abs() < 1e-7);
        assert_eq!(svd.rank(), 2);
    }

    #[test]
    fn test_svd3_zero_matrix() {
        let svd = svd3(&Matrix3::zeros());
        assert_eq!(svd.rank(), 0);
        assert_orthogonal(&svd.u);
    }
}
