//! Scene entities: world points, cameras, observations, lines and vanishing lines.
//!
//! Entities reference each other through slotmap handles, never through display
//! names. Names are free-form labels for diagnostics and may collide.

use crate::camera::{self, CameraIntrinsics};
use crate::manifold::quaternion::Quaternion;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Handle to a [`WorldPoint`]
    pub struct PointKey;
    /// Handle to a [`Camera`]
    pub struct CameraKey;
    /// Handle to a [`Line`]
    pub struct LineKey;
    /// Handle to an [`Observation`]
    pub struct ObservationKey;
    /// Handle to an explicit constraint
    pub struct ConstraintKey;
    /// Handle to a [`VanishingLine`]
    pub struct VanishingLineKey;
}

/// World coordinate axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two other axes, in ascending order
    pub fn perpendicular(self) -> [Axis; 2] {
        match self {
            Axis::X => [Axis::Y, Axis::Z],
            Axis::Y => [Axis::X, Axis::Z],
            Axis::Z => [Axis::X, Axis::Y],
        }
    }

    pub fn unit(self) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        v[self.index()] = 1.0;
        v
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// A 3D location with per-axis certainty.
///
/// The effective value of an axis is the locked value, else the inferred value,
/// else the axis is free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub name: String,
    /// User-certain coordinates, never changed by inference or solving
    pub locked: [Option<f64>; 3],
    /// Coordinates derived by the inference pass
    pub inferred: [Option<f64>; 3],
    /// Working estimate, rewritten by every solve
    pub optimized: Option<Vector3<f64>>,
}

impl WorldPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locked: [None; 3],
            inferred: [None; 3],
            optimized: None,
        }
    }

    /// A point with all three axes locked
    pub fn locked(name: impl Into<String>, position: Vector3<f64>) -> Self {
        Self::new(name).with_locked([Some(position.x), Some(position.y), Some(position.z)])
    }

    pub fn with_locked(mut self, locked: [Option<f64>; 3]) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_locked_axis(mut self, axis: Axis, value: f64) -> Self {
        self.locked[axis.index()] = Some(value);
        self
    }

    /// Seed the working estimate
    pub fn with_initial(mut self, position: Vector3<f64>) -> Self {
        self.optimized = Some(position);
        self
    }

    pub fn effective(&self, axis: Axis) -> Option<f64> {
        let i = axis.index();
        self.locked[i].or(self.inferred[i])
    }

    pub fn is_fully_constrained(&self) -> bool {
        Axis::ALL.iter().all(|&axis| self.effective(axis).is_some())
    }

    pub fn is_fully_locked(&self) -> bool {
        self.locked.iter().all(Option::is_some)
    }

    /// Effective coordinates where known, the working estimate elsewhere
    pub fn best_estimate(&self) -> Option<Vector3<f64>> {
        let mut out = Vector3::zeros();
        for axis in Axis::ALL {
            let i = axis.index();
            out[i] = match (self.effective(axis), self.optimized) {
                (Some(v), _) => v,
                (None, Some(p)) => p[i],
                (None, None) => return None,
            };
        }
        Some(out)
    }
}

/// A calibrated or partially calibrated pinhole camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub name: String,
    /// Camera center in world coordinates
    pub position: Vector3<f64>,
    /// World-to-camera rotation
    pub orientation: Quaternion,
    pub intrinsics: CameraIntrinsics,
    pub image_width: u32,
    pub image_height: u32,
    /// Excludes position and orientation from optimization
    pub pose_locked: bool,
    /// The image may be a crop, so its principal point is not assumed centered
    pub may_be_cropped: bool,
    /// False for a camera whose pose has never been estimated or set
    pub pose_initialized: bool,
}

impl Camera {
    /// An unposed camera with the principal point at the image center
    pub fn new(name: impl Into<String>, focal_length: f64, image_width: u32, image_height: u32) -> Self {
        Self {
            name: name.into(),
            position: Vector3::zeros(),
            orientation: Quaternion::identity(),
            intrinsics: CameraIntrinsics::centered(focal_length, image_width, image_height),
            image_width,
            image_height,
            pose_locked: false,
            may_be_cropped: false,
            pose_initialized: false,
        }
    }

    /// Set a known pose
    pub fn with_pose(mut self, position: Vector3<f64>, orientation: Quaternion) -> Self {
        self.position = position;
        self.orientation = orientation;
        self.pose_initialized = true;
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn with_pose_locked(mut self, locked: bool) -> Self {
        self.pose_locked = locked;
        self
    }

    pub fn with_may_be_cropped(mut self, cropped: bool) -> Self {
        self.may_be_cropped = cropped;
        self
    }

    /// Whether the stored pose can be trusted; a locked pose counts as known
    pub fn is_posed(&self) -> bool {
        self.pose_initialized || self.pose_locked
    }

    pub fn image_center(&self) -> Vector2<f64> {
        camera::image_center(self.image_width, self.image_height)
    }

    /// Project a world point to pixels; `None` when the point is not in front
    pub fn project(&self, world: &Vector3<f64>) -> Option<Vector2<f64>> {
        camera::project(
            &self.intrinsics,
            &self.orientation.coords(),
            &self.position,
            world,
        )
    }

    /// Unit viewing ray through a pixel, in world coordinates
    pub fn ray_direction(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let n = self.intrinsics.normalize_pixel(pixel);
        let ray_cam = Vector3::new(n.x, n.y, 1.0).normalize();
        self.orientation.to_rotation_matrix().transpose() * ray_cam
    }
}

/// A user-marked pixel linking a world point to a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: PointKey,
    pub camera: CameraKey,
    pub pixel: Vector2<f64>,
    /// Weight in `(0, 1]` applied to both residuals
    pub confidence: f64,
}

impl Observation {
    pub fn new(point: PointKey, camera: CameraKey, u: f64, v: f64) -> Self {
        Self {
            point,
            camera,
            pixel: Vector2::new(u, v),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Direction constraint carried by a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineAlignment {
    #[default]
    Free,
    /// Parallel to an axis
    Axis(Axis),
    /// Lies in a plane perpendicular to `normal`
    Plane { normal: Axis },
}

impl LineAlignment {
    pub const X: LineAlignment = LineAlignment::Axis(Axis::X);
    pub const Y: LineAlignment = LineAlignment::Axis(Axis::Y);
    pub const Z: LineAlignment = LineAlignment::Axis(Axis::Z);
    pub const XY: LineAlignment = LineAlignment::Plane { normal: Axis::Z };
    pub const XZ: LineAlignment = LineAlignment::Plane { normal: Axis::Y };
    pub const YZ: LineAlignment = LineAlignment::Plane { normal: Axis::X };

    /// Axes whose coordinate is shared by every point on the line
    pub fn shared_axes(self) -> &'static [Axis] {
        match self {
            LineAlignment::Free => &[],
            LineAlignment::Axis(Axis::X) => &[Axis::Y, Axis::Z],
            LineAlignment::Axis(Axis::Y) => &[Axis::X, Axis::Z],
            LineAlignment::Axis(Axis::Z) => &[Axis::X, Axis::Y],
            LineAlignment::Plane { normal: Axis::X } => &[Axis::X],
            LineAlignment::Plane { normal: Axis::Y } => &[Axis::Y],
            LineAlignment::Plane { normal: Axis::Z } => &[Axis::Z],
        }
    }
}

impl fmt::Display for LineAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineAlignment::Free => write!(f, "free"),
            LineAlignment::Axis(axis) => write!(f, "{axis}"),
            LineAlignment::Plane { normal: Axis::X } => write!(f, "yz"),
            LineAlignment::Plane { normal: Axis::Y } => write!(f, "xz"),
            LineAlignment::Plane { normal: Axis::Z } => write!(f, "xy"),
        }
    }
}

/// A segment between two world points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub name: String,
    pub start: PointKey,
    pub end: PointKey,
    pub alignment: LineAlignment,
    pub target_length: Option<f64>,
    /// Additional points required to lie on the line
    pub coincident: Vec<PointKey>,
}

impl Line {
    pub fn new(name: impl Into<String>, start: PointKey, end: PointKey) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            alignment: LineAlignment::Free,
            target_length: None,
            coincident: Vec::new(),
        }
    }

    pub fn with_alignment(mut self, alignment: LineAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_target_length(mut self, length: f64) -> Self {
        self.target_length = Some(length);
        self
    }

    pub fn with_coincident(mut self, point: PointKey) -> Self {
        self.coincident.push(point);
        self
    }

    /// Endpoints followed by coincident points
    pub fn points(&self) -> impl Iterator<Item = PointKey> + '_ {
        [self.start, self.end]
            .into_iter()
            .chain(self.coincident.iter().copied())
    }
}

/// An image segment the user marked as parallel to a world axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VanishingLine {
    pub camera: CameraKey,
    pub axis: Axis,
    pub start: Vector2<f64>,
    pub end: Vector2<f64>,
}

impl VanishingLine {
    pub fn new(camera: CameraKey, axis: Axis, start: Vector2<f64>, end: Vector2<f64>) -> Self {
        Self {
            camera,
            axis,
            start,
            end,
        }
    }
}
