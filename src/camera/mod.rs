//! Camera intrinsics and the projection contract shared by the solver and callers.
//!
//! ## Projection Model
//!
//! A camera stores its center `C` in world coordinates and a unit quaternion `q`
//! holding the world-to-camera rotation `R(q)`. A world point `P` projects as:
//!
//! ```text
//! 1. Camera frame:  p_c = R(q)·(P − C)          (z forward, y down)
//! 2. Depth check:   z ≤ MIN_DEPTH  →  no projection
//! 3. Normalize:     x = p_c.x / z,  y = p_c.y / z
//! 4. Distort:       (x_d, y_d) = rad_tan(x, y)
//! 5. Pixel:         u = f·x_d + s·y_d + cx
//!                   v = f·a·y_d + cy
//! ```
//!
//! with focal length `f`, aspect ratio `a`, skew `s` and principal point `(cx, cy)`.
//! The reprojection residuals evaluate the very same [`project`] function, so what a
//! caller displays matches what the solver minimizes.
//!
//! [`project_with_jacobian`] differentiates the prediction with respect to every
//! quantity the solver may free: the point, the camera center, the four raw quaternion
//! coordinates and the optimizable intrinsics. Rotation derivatives use the polynomial
//! form of `R(q)`, which stays valid while the quaternion drifts slightly off the unit
//! sphere between renormalizations.

pub mod rad_tan;

pub use rad_tan::Distortion;

use crate::manifold::quaternion::{rotation_matrix, rotation_matrix_derivatives};
use nalgebra::{Matrix2, Matrix2x3, Matrix2x4, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Points closer than this to the image plane (or behind it) do not project
pub const MIN_DEPTH: f64 = 1e-6;

/// Camera model errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("Focal length must be positive and finite, got {0}")]
    InvalidFocalLength(f64),

    #[error("Aspect ratio must be positive and finite, got {0}")]
    InvalidAspectRatio(f64),

    #[error("Image size must be non-zero, got {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("Camera parameter '{0}' is not finite")]
    NonFiniteParameter(&'static str),
}

/// Pinhole intrinsics with rad-tan distortion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (x direction)
    pub focal_length: f64,
    /// Ratio of the y focal length to the x focal length
    pub aspect_ratio: f64,
    /// Principal point `(cx, cy)` in pixels
    pub principal_point: Vector2<f64>,
    pub skew: f64,
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    /// Square pixels, no skew, no distortion
    pub fn new(focal_length: f64, principal_point: Vector2<f64>) -> Self {
        Self {
            focal_length,
            aspect_ratio: 1.0,
            principal_point,
            skew: 0.0,
            distortion: Distortion::default(),
        }
    }

    /// Intrinsics with the principal point at the center of a `width × height` image
    pub fn centered(focal_length: f64, width: u32, height: u32) -> Self {
        Self::new(focal_length, image_center(width, height))
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        if !(self.focal_length.is_finite() && self.focal_length > 0.0) {
            return Err(CameraError::InvalidFocalLength(self.focal_length));
        }
        if !(self.aspect_ratio.is_finite() && self.aspect_ratio > 0.0) {
            return Err(CameraError::InvalidAspectRatio(self.aspect_ratio));
        }
        if !self.principal_point.iter().all(|v| v.is_finite()) {
            return Err(CameraError::NonFiniteParameter("principal_point"));
        }
        if !self.skew.is_finite() {
            return Err(CameraError::NonFiniteParameter("skew"));
        }
        if !self.distortion.is_finite() {
            return Err(CameraError::NonFiniteParameter("distortion"));
        }
        Ok(())
    }

    /// Map an undistorted normalized point to pixels
    pub fn pixel_from_normalized(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let distorted = self.distortion.distort(normalized);
        self.affine(&distorted)
    }

    /// Map a pixel back to undistorted normalized image-plane coordinates
    pub fn normalize_pixel(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let fy = self.focal_length * self.aspect_ratio;
        let y_d = (pixel.y - self.principal_point.y) / fy;
        let x_d = (pixel.x - self.principal_point.x - self.skew * y_d) / self.focal_length;
        self.distortion.undistort(&Vector2::new(x_d, y_d))
    }

    fn affine(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.focal_length * distorted.x + self.skew * distorted.y + self.principal_point.x,
            self.focal_length * self.aspect_ratio * distorted.y + self.principal_point.y,
        )
    }
}

pub fn image_center(width: u32, height: u32) -> Vector2<f64> {
    Vector2::new(width as f64 / 2.0, height as f64 / 2.0)
}

/// Rotate a world point into the camera frame
pub fn world_to_camera(
    orientation: &[f64; 4],
    center: &Vector3<f64>,
    world: &Vector3<f64>,
) -> Vector3<f64> {
    rotation_matrix(orientation) * (world - center)
}

/// Project a world point to pixels, `None` when it is not in front of the camera.
pub fn project(
    intrinsics: &CameraIntrinsics,
    orientation: &[f64; 4],
    center: &Vector3<f64>,
    world: &Vector3<f64>,
) -> Option<Vector2<f64>> {
    let p_cam = world_to_camera(orientation, center, world);
    if p_cam.z <= MIN_DEPTH {
        return None;
    }
    let normalized = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
    Some(intrinsics.pixel_from_normalized(&normalized))
}

/// Derivatives of the projected pixel `(u, v)`.
///
/// The principal point enters with an identity Jacobian and is not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionJacobian {
    /// `∂(u,v)/∂P`
    pub point: Matrix2x3<f64>,
    /// `∂(u,v)/∂C`
    pub center: Matrix2x3<f64>,
    /// `∂(u,v)/∂(w, x, y, z)`
    pub quaternion: Matrix2x4<f64>,
    pub focal_length: Vector2<f64>,
    pub aspect_ratio: Vector2<f64>,
    pub skew: Vector2<f64>,
}

/// Project and differentiate in one pass.
pub fn project_with_jacobian(
    intrinsics: &CameraIntrinsics,
    orientation: &[f64; 4],
    center: &Vector3<f64>,
    world: &Vector3<f64>,
) -> Option<(Vector2<f64>, ProjectionJacobian)> {
    let rotation = rotation_matrix(orientation);
    let delta = world - center;
    let p_cam = rotation * delta;
    let z = p_cam.z;
    if z <= MIN_DEPTH {
        return None;
    }

    let normalized = Vector2::new(p_cam.x / z, p_cam.y / z);
    let (distorted, d_distort) = intrinsics.distortion.distort_with_jacobian(&normalized);
    let pixel = intrinsics.affine(&distorted);

    let f = intrinsics.focal_length;
    let a = intrinsics.aspect_ratio;
    let d_pixel_d_distorted = Matrix2::new(f, intrinsics.skew, 0.0, f * a);
    let d_normalized_d_cam = Matrix2x3::new(
        1.0 / z,
        0.0,
        -p_cam.x / (z * z),
        0.0,
        1.0 / z,
        -p_cam.y / (z * z),
    );
    let d_pixel_d_cam = d_pixel_d_distorted * d_distort * d_normalized_d_cam;

    let d_point = d_pixel_d_cam * rotation;
    let mut d_quaternion = Matrix2x4::zeros();
    for (i, d_rotation) in rotation_matrix_derivatives(orientation).iter().enumerate() {
        d_quaternion.set_column(i, &(d_pixel_d_cam * (d_rotation * delta)));
    }

    let jacobian = ProjectionJacobian {
        point: d_point,
        center: -d_point,
        quaternion: d_quaternion,
        focal_length: Vector2::new(distorted.x, a * distorted.y),
        aspect_ratio: Vector2::new(0.0, f * distorted.y),
        skew: Vector2::new(distorted.y, 0.0),
    };

    Some((pixel, jacobian))
}
