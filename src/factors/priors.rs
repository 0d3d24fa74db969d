//! Soft priors on camera parameters.
//!
//! - [`QuaternionNormResidual`]: `‖q‖ − 1` for free orientations
//! - [`FocalPriorResidual`]: `w·(f / max(width, height) − ratio)`
//! - [`VanishingPointResidual`]: `w·(1 − (d̂·r̂)²)` aligning a world axis with the
//!   viewing ray of an observed vanishing point

use super::{Operand, OperandSet, ResidualProvider, ResidualTag};
use crate::camera::CameraIntrinsics;
use crate::core::entities::{Axis, VanishingLine};
use crate::core::layout::{CameraSlots, Slot};
use crate::linalg::eigen::symmetric_eigen3;
use crate::manifold::quaternion::{rotation_matrix, rotation_matrix_derivatives};
use nalgebra::{Matrix3, Vector3};

pub const DEFAULT_VANISHING_WEIGHT: f64 = 0.05;
pub const DEFAULT_FOCAL_PRIOR_WEIGHT: f64 = 0.1;
pub const DEFAULT_FOCAL_PRIOR_RATIO: f64 = 1.2;

/// Unit-norm penalty on a free quaternion block
#[derive(Debug, Clone)]
pub struct QuaternionNormResidual {
    q: [Operand; 4],
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl QuaternionNormResidual {
    /// `None` when the orientation is fixed
    pub fn new(camera: &CameraSlots, tag: ResidualTag) -> Option<Self> {
        if !camera.orientation_is_free() {
            return None;
        }
        let mut set = OperandSet::new();
        let q = camera.orientation.map(|s| set.bind(s));
        Some(Self {
            q,
            indices: set.into_indices(),
            tag,
        })
    }

    fn norm(&self, vars: &[f64]) -> f64 {
        self.q
            .iter()
            .map(|op| op.value(vars).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl ResidualProvider for QuaternionNormResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.norm(vars) - 1.0
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        let norm = self.norm(vars);
        let mut gradient = vec![0.0; self.indices.len()];
        if norm > 1e-12 {
            for op in &self.q {
                op.accumulate(&mut gradient, op.value(vars) / norm);
            }
        }
        gradient
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "quaternion_norm"
    }
}

/// Pulls a free focal length toward `ratio · max(width, height)`
#[derive(Debug, Clone)]
pub struct FocalPriorResidual {
    focal: Operand,
    image_size: f64,
    ratio: f64,
    weight: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl FocalPriorResidual {
    /// `None` when the focal length is fixed or the image size is unknown
    pub fn new(
        focal: Slot,
        image_width: u32,
        image_height: u32,
        ratio: f64,
        weight: f64,
        tag: ResidualTag,
    ) -> Option<Self> {
        let image_size = image_width.max(image_height) as f64;
        if !focal.is_free() || image_size <= 0.0 {
            return None;
        }
        let mut set = OperandSet::new();
        let focal = set.bind(focal);
        Some(Self {
            focal,
            image_size,
            ratio,
            weight,
            indices: set.into_indices(),
            tag,
        })
    }
}

impl ResidualProvider for FocalPriorResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.weight * (self.focal.value(vars) / self.image_size - self.ratio)
    }

    fn gradient(&self, _vars: &[f64]) -> Vec<f64> {
        vec![self.weight / self.image_size]
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "focal_prior"
    }
}

/// Viewing ray (camera frame, unit length) through the common vanishing point of
/// at least two image segments.
///
/// Segment endpoints are first mapped to undistorted normalized coordinates, which
/// keeps the homogeneous lines well conditioned. The vanishing point is their
/// least-squares intersection: the eigenvector of `Σ l̂ l̂ᵀ` with the smallest
/// eigenvalue, each line scaled to a unit normal. In normalized coordinates that
/// homogeneous point is the ray itself, even when it lies at infinity in the image.
pub fn vanishing_direction(
    intrinsics: &CameraIntrinsics,
    lines: &[&VanishingLine],
) -> Option<Vector3<f64>> {
    if lines.len() < 2 {
        return None;
    }

    let mut scatter = Matrix3::zeros();
    let mut used = 0;
    for line in lines {
        let a = intrinsics.normalize_pixel(&line.start);
        let b = intrinsics.normalize_pixel(&line.end);
        let l = Vector3::new(a.x, a.y, 1.0).cross(&Vector3::new(b.x, b.y, 1.0));
        let normal = (l.x * l.x + l.y * l.y).sqrt();
        if normal < 1e-12 {
            continue;
        }
        let l = l / normal;
        scatter += l * l.transpose();
        used += 1;
    }
    if used < 2 {
        return None;
    }

    let (_, vectors) = symmetric_eigen3(&scatter);
    let ray = vectors.column(0).into_owned();
    let norm = ray.norm();
    (norm > 1e-12 && norm.is_finite()).then(|| ray / norm)
}

/// Aligns the camera-frame image of a world axis with a vanishing direction.
///
/// Evaluated at `q / ‖q‖` so the residual stays in `[0, w]` between renormalizations.
#[derive(Debug, Clone)]
pub struct VanishingPointResidual {
    q: [Operand; 4],
    axis: Axis,
    ray: Vector3<f64>,
    weight: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl VanishingPointResidual {
    pub fn new(
        camera: &CameraSlots,
        axis: Axis,
        ray: Vector3<f64>,
        weight: f64,
        tag: ResidualTag,
    ) -> Self {
        let mut set = OperandSet::new();
        let q = camera.orientation.map(|s| set.bind(s));
        Self {
            q,
            axis,
            ray,
            weight,
            indices: set.into_indices(),
            tag,
        }
    }

    fn quaternion(&self, vars: &[f64]) -> [f64; 4] {
        self.q.map(|op| op.value(vars))
    }
}

fn unit_quaternion(q: &[f64; 4]) -> Option<([f64; 4], f64)> {
    let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    (norm > 1e-12 && norm.is_finite()).then(|| (q.map(|v| v / norm), norm))
}

impl ResidualProvider for VanishingPointResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        let Some((unit, _)) = unit_quaternion(&self.quaternion(vars)) else {
            return self.weight;
        };
        let alignment = rotation_matrix(&unit).column(self.axis.index()).dot(&self.ray);
        self.weight * (1.0 - alignment * alignment)
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        let mut gradient = vec![0.0; self.indices.len()];
        let Some((unit, norm)) = unit_quaternion(&self.quaternion(vars)) else {
            return gradient;
        };
        let column = self.axis.index();
        let alignment = rotation_matrix(&unit).column(column).dot(&self.ray);
        let derivatives = rotation_matrix_derivatives(&unit);
        let on_sphere: [f64; 4] = std::array::from_fn(|i| {
            -2.0 * self.weight * alignment * derivatives[i].column(column).dot(&self.ray)
        });

        // Chain through q / ‖q‖: drop the radial part and rescale
        let radial: f64 = unit.iter().zip(&on_sphere).map(|(u, g)| u * g).sum();
        for ((op, u), g) in self.q.iter().zip(&unit).zip(&on_sphere) {
            op.accumulate(&mut gradient, (g - u * radial) / norm);
        }
        gradient
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "vanishing_point"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::{Camera, CameraKey};
    use crate::factors::{ResidualOwner, assert_gradient_matches};
    use crate::manifold::quaternion::Quaternion;
    use nalgebra::Vector2;

    fn tag() -> ResidualTag {
        ResidualTag::new(ResidualOwner::Camera(CameraKey::default()), 0)
    }

    fn pose_slots() -> CameraSlots {
        CameraSlots {
            position: [0, 1, 2].map(Slot::Free),
            orientation: [3, 4, 5, 6].map(Slot::Free),
            focal_length: Slot::Fixed(1000.0),
            aspect_ratio: Slot::Fixed(1.0),
            principal_point: [Slot::Fixed(960.0), Slot::Fixed(540.0)],
            skew: Slot::Fixed(0.0),
        }
    }

    #[test]
    fn test_quaternion_norm() {
        let slots = pose_slots();
        let provider = QuaternionNormResidual::new(&slots, tag()).unwrap_or_else(|| panic!("free"));
        let vars = [0.0, 0.0, 0.0, 0.9, 0.1, 0.3, -0.2];
        let expected = (0.81f64 + 0.01 + 0.09 + 0.04).sqrt() - 1.0;
        assert!((provider.residual(&vars) - expected).abs() < 1e-12);
        assert_gradient_matches(&provider, &vars, 1e-6);

        let locked = CameraSlots {
            orientation: [1.0, 0.0, 0.0, 0.0].map(Slot::Fixed),
            ..slots
        };
        assert!(QuaternionNormResidual::new(&locked, tag()).is_none());
    }

    #[test]
    fn test_focal_prior() {
        let provider = FocalPriorResidual::new(Slot::Free(0), 1000, 800, 1.2, 0.1, tag())
            .unwrap_or_else(|| panic!("free focal"));
        assert!((provider.residual(&[1200.0])).abs() < 1e-12);
        assert!((provider.residual(&[1700.0]) - 0.05).abs() < 1e-12);
        assert!(FocalPriorResidual::new(Slot::Fixed(1.0), 1000, 800, 1.2, 0.1, tag()).is_none());
    }

    #[test]
    fn test_vanishing_direction_recovers_axis() {
        let camera = Camera::new("cam", 1000.0, 1920, 1080).with_pose(
            Vector3::new(0.0, -1.0, -8.0),
            Quaternion::from_axis_angle(&Vector3::new(0.2, 1.0, 0.1), 0.4),
        );
        let key = CameraKey::default();
        // Two world lines parallel to X, projected into the image
        let segments: Vec<VanishingLine> = [Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 1.0)]
            .iter()
            .map(|origin| {
                let start = camera.project(origin).unwrap_or_else(Vector2::zeros);
                let end = camera
                    .project(&(origin + Vector3::new(3.0, 0.0, 0.0)))
                    .unwrap_or_else(Vector2::zeros);
                VanishingLine::new(key, Axis::X, start, end)
            })
            .collect();
        let refs: Vec<&VanishingLine> = segments.iter().collect();
        let ray = vanishing_direction(&camera.intrinsics, &refs).unwrap_or_else(Vector3::zeros);

        let expected = camera.orientation.to_rotation_matrix().column(0).into_owned();
        assert!((ray.dot(&expected).abs() - 1.0).abs() < 1e-9);

        let slots = pose_slots();
        let provider = VanishingPointResidual::new(&slots, Axis::X, ray, 0.05, tag());
        let mut vars = vec![0.0; 7];
        vars[3..].copy_from_slice(&camera.orientation.coords());
        assert!(provider.residual(&vars).abs() < 1e-9);

        vars[4] += 0.05;
        assert!(provider.residual(&vars) > 0.0);
        assert_gradient_matches(&provider, &vars, 1e-6);
    }

    #[test]
    fn test_vanishing_residual_ignores_quaternion_scale() {
        let slots = pose_slots();
        let ray = Vector3::new(0.6, 0.0, 0.8);
        let provider = VanishingPointResidual::new(&slots, Axis::Z, ray, 1.0, tag());
        let orientation = Quaternion::from_axis_angle(&Vector3::y(), 0.3);

        let mut unit = vec![0.0; 7];
        unit[3..].copy_from_slice(&orientation.coords());
        let mut scaled = unit.clone();
        for v in &mut scaled[3..] {
            *v *= 1.3;
        }

        let at_unit = provider.residual(&unit);
        let at_scaled = provider.residual(&scaled);
        assert!((0.0..=1.0).contains(&at_scaled));
        assert!((at_unit - at_scaled).abs() < 1e-9);
        assert_gradient_matches(&provider, &scaled, 1e-6);

        // Aligned off the unit sphere the residual is zero, never negative
        let aligned = Quaternion::from_axis_angle(&Vector3::y(), 0.6_f64.atan2(0.8));
        let mut off_sphere = vec![0.0; 7];
        for (slot, value) in off_sphere[3..].iter_mut().zip(aligned.coords()) {
            *slot = 1.2 * value;
        }
        assert!(provider.residual(&off_sphere).abs() < 1e-9);
    }

    #[test]
    fn test_vanishing_direction_needs_two_lines() {
        let intrinsics = CameraIntrinsics::centered(1000.0, 640, 480);
        let line = VanishingLine::new(
            CameraKey::default(),
            Axis::Y,
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 10.0),
        );
        assert!(vanishing_direction(&intrinsics, &[&line]).is_none());
    }
}
