//! Camera resection from points with known positions.
//!
//! A normalized direct linear transform on undistorted normalized image
//! coordinates, followed by projection of the rotation block onto SO(3).

use crate::core::entities::{Camera, CameraKey};
use crate::core::graph::EntityGraph;
use crate::error::{RoteraResult, SolverError};
use crate::linalg::eigen::jacobi_eigen;
use crate::linalg::svd::svd3;
use crate::manifold::quaternion::Quaternion;
use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3, Vector4};

/// Minimum points for the linear resection
pub const MIN_PNP_POINTS: usize = 6;

/// Ratio of the two smallest eigenvalues below which the points are treated as
/// a degenerate configuration
const DEGENERACY_RATIO: f64 = 1e-12;

/// World pose recovered by resection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResectedPose {
    /// Camera center
    pub position: Vector3<f64>,
    /// World-to-camera rotation
    pub orientation: Quaternion,
}

/// Estimate a camera pose from world points and their normalized image coordinates.
pub fn resect(
    camera_name: &str,
    world: &[Vector3<f64>],
    normalized: &[Vector2<f64>],
) -> RoteraResult<ResectedPose> {
    let count = world.len().min(normalized.len());
    if count < MIN_PNP_POINTS {
        return Err(SolverError::InsufficientConstrainedPoints {
            camera: camera_name.to_string(),
            found: count,
            required: MIN_PNP_POINTS,
        });
    }

    // Center and scale the world points to mean distance sqrt(3)
    let mean = world[..count].iter().sum::<Vector3<f64>>() / count as f64;
    let spread = world[..count].iter().map(|p| (p - mean).norm()).sum::<f64>() / count as f64;
    if spread <= f64::EPSILON {
        return Err(SolverError::Numerical(format!(
            "resection of camera '{camera_name}': all points coincide"
        )));
    }
    let scale = 3.0_f64.sqrt() / spread;

    let mut ata = [[0.0; 12]; 12];
    for (p, x) in world[..count].iter().zip(&normalized[..count]) {
        let q = (p - mean) * scale;
        let h = [q.x, q.y, q.z, 1.0];
        let mut rows = [[0.0; 12]; 2];
        for j in 0..4 {
            rows[0][j] = h[j];
            rows[0][8 + j] = -x.x * h[j];
            rows[1][4 + j] = h[j];
            rows[1][8 + j] = -x.y * h[j];
        }
        for row in &rows {
            for i in 0..12 {
                for j in 0..12 {
                    ata[i][j] += row[i] * row[j];
                }
            }
        }
    }

    let eigen = jacobi_eigen(&ata);
    if eigen.values[1].abs() <= DEGENERACY_RATIO * eigen.values[11].abs() {
        return Err(SolverError::Numerical(format!(
            "resection of camera '{camera_name}': degenerate point configuration"
        )));
    }
    let m = eigen.vector(0);
    let mut projection = Matrix3x4::from_row_slice(&m);

    // Most points must have positive depth
    let positive = world[..count]
        .iter()
        .filter(|p| {
            let q = (*p - mean) * scale;
            (projection * Vector4::new(q.x, q.y, q.z, 1.0)).z > 0.0
        })
        .count();
    if 2 * positive < count {
        projection = -projection;
    }

    let block: Matrix3<f64> = projection.fixed_columns::<3>(0).into_owned();
    let svd = svd3(&block);
    let lambda = svd.singular_values.mean();
    if lambda <= f64::EPSILON {
        return Err(SolverError::Numerical(format!(
            "resection of camera '{camera_name}': vanishing rotation block"
        )));
    }
    let mut rotation = svd.u * svd.v.transpose();
    if rotation.determinant() < 0.0 {
        let flip = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        rotation = svd.u * flip * svd.v.transpose();
    }

    // Undo the world normalization: t' = s (R m + t)
    let t_scaled: Vector3<f64> = projection.column(3) / lambda;
    let translation = t_scaled / scale - rotation * mean;
    let position = -(rotation.transpose() * translation);

    Ok(ResectedPose {
        position,
        orientation: Quaternion::from_rotation_matrix(&rotation),
    })
}

/// Resect one camera of the graph from its observations of seeded points.
pub fn resect_camera(graph: &EntityGraph, key: CameraKey) -> RoteraResult<ResectedPose> {
    let camera: &Camera = graph
        .camera(key)
        .ok_or_else(|| SolverError::InvalidInput(format!("unknown camera {key:?}")))?;

    let (world, normalized): (Vec<Vector3<f64>>, Vec<Vector2<f64>>) = graph
        .observations_of(key)
        .filter_map(|(_, obs)| {
            let position = graph.point(obs.point)?.best_estimate()?;
            Some((position, camera.intrinsics.normalize_pixel(&obs.pixel)))
        })
        .unzip();

    resect(&camera.name, &world, &normalized)
}
