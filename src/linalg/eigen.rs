//! Symmetric eigendecomposition by the cyclic Jacobi rotation method.
//!
//! Works on plain `[[f64; N]; N]` arrays so the same routine serves the 3×3
//! (SVD, vanishing points), 4×4 (triangulation), 9×9 (epipolar null spaces) and
//! 12×12 (resection) cases. Thin wrappers convert to and from nalgebra types.

use nalgebra::{Matrix3, Matrix4, SMatrix, SVector, Vector3, Vector4};

const MAX_SWEEPS: usize = 100;

/// Eigenvalues in ascending order and matching unit eigenvectors stored as columns.
#[derive(Debug, Clone, Copy)]
pub struct SymmetricEigen<const N: usize> {
    pub values: [f64; N],
    /// `vectors[row][col]`: column `k` is the eigenvector of `values[k]`
    pub vectors: [[f64; N]; N],
}

impl<const N: usize> SymmetricEigen<N> {
    /// Eigenvector `k` (ascending eigenvalue order)
    pub fn vector(&self, k: usize) -> [f64; N] {
        let mut out = [0.0; N];
        for (row, value) in out.iter_mut().enumerate() {
            *value = self.vectors[row][k];
        }
        out
    }
}

fn off_diagonal_norm2<const N: usize>(a: &[[f64; N]; N]) -> f64 {
    let mut sum = 0.0;
    for (p, row) in a.iter().enumerate() {
        for (q, value) in row.iter().enumerate() {
            if p != q {
                sum += value * value;
            }
        }
    }
    sum
}

/// Decompose a symmetric matrix. Only symmetric input is meaningful; the upper
/// triangle is mirrored before iterating.
pub fn jacobi_eigen<const N: usize>(matrix: &[[f64; N]; N]) -> SymmetricEigen<N> {
    let mut a = *matrix;
    for p in 0..N {
        for q in (p + 1)..N {
            a[q][p] = a[p][q];
        }
    }

    let mut v = [[0.0; N]; N];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    let scale: f64 = a.iter().flatten().map(|x| x * x).sum();
    let threshold = (scale * 1e-30).max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        if off_diagonal_norm2(&a) <= threshold {
            break;
        }
        for p in 0..N {
            for q in (p + 1)..N {
                let apq = a[p][q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let akp = row[p];
                    let akq = row[q];
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..N {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                a[p][q] = 0.0;
                a[q][p] = 0.0;

                for row in v.iter_mut() {
                    let vkp = row[p];
                    let vkq = row[q];
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: [usize; N] = [0; N];
    for (i, slot) in order.iter_mut().enumerate() {
        *slot = i;
    }
    order.sort_by(|&i, &j| a[i][i].total_cmp(&a[j][j]));

    let mut values = [0.0; N];
    let mut vectors = [[0.0; N]; N];
    for (k, &src) in order.iter().enumerate() {
        values[k] = a[src][src];
        for row in 0..N {
            vectors[row][k] = v[row][src];
        }
    }

    SymmetricEigen { values, vectors }
}

/// Eigendecomposition of a symmetric 3×3 matrix (ascending eigenvalues)
pub fn symmetric_eigen3(m: &Matrix3<f64>) -> (Vector3<f64>, Matrix3<f64>) {
    let eig = jacobi_eigen(&to_array::<3>(m));
    (Vector3::from(eig.values), from_array::<3>(&eig.vectors))
}

/// Eigendecomposition of a symmetric 4×4 matrix (ascending eigenvalues)
pub fn symmetric_eigen4(m: &Matrix4<f64>) -> (Vector4<f64>, Matrix4<f64>) {
    let eig = jacobi_eigen(&to_array::<4>(m));
    (Vector4::from(eig.values), from_array::<4>(&eig.vectors))
}

/// Eigendecomposition of a symmetric 9×9 matrix (ascending eigenvalues)
pub fn symmetric_eigen9(m: &SMatrix<f64, 9, 9>) -> (SVector<f64, 9>, SMatrix<f64, 9, 9>) {
    let eig = jacobi_eigen(&to_array::<9>(m));
    (SVector::<f64, 9>::from(eig.values), from_array::<9>(&eig.vectors))
}

fn to_array<const N: usize>(m: &SMatrix<f64, N, N>) -> [[f64; N]; N] {
    let mut out = [[0.0; N]; N];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    out
}

fn from_array<const N: usize>(a: &[[f64; N]; N]) -> SMatrix<f64, N, N> {
    SMatrix::<f64, N, N>::from_fn(|r, c| a[r][c])
}
