//! Assignment of free scalars to positions in the flat optimization vector.
//!
//! Every scalar of every entity is either `Free(index)` into the vector or
//! `Fixed(value)`. Lookups are keyed by entity handle.

use super::entities::{Axis, Camera, CameraKey, PointKey};
use super::graph::EntityGraph;
use crate::camera::CameraIntrinsics;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::fmt;

/// Which camera intrinsics the solver may adjust
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntrinsicsMode {
    /// Intrinsics are constants
    #[default]
    Fixed,
    /// Focal length, plus the principal point of cameras that may be cropped
    Basic,
    /// Basic plus aspect ratio and skew
    Full,
}

impl fmt::Display for IntrinsicsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntrinsicsMode::Fixed => write!(f, "fixed"),
            IntrinsicsMode::Basic => write!(f, "basic"),
            IntrinsicsMode::Full => write!(f, "full"),
        }
    }
}

/// Location of one scalar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Free(usize),
    Fixed(f64),
}

impl Slot {
    #[inline]
    pub fn value(&self, vars: &[f64]) -> f64 {
        match *self {
            Slot::Free(index) => vars[index],
            Slot::Fixed(value) => value,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match *self {
            Slot::Free(index) => Some(index),
            Slot::Fixed(_) => None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Free(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSlots(pub [Slot; 3]);

impl PointSlots {
    pub fn axis(&self, axis: Axis) -> Slot {
        self.0[axis.index()]
    }

    pub fn position(&self, vars: &[f64]) -> Vector3<f64> {
        Vector3::new(self.0[0].value(vars), self.0[1].value(vars), self.0[2].value(vars))
    }

    pub fn free_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_free()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSlots {
    pub position: [Slot; 3],
    /// `[w, x, y, z]`
    pub orientation: [Slot; 4],
    pub focal_length: Slot,
    pub aspect_ratio: Slot,
    pub principal_point: [Slot; 2],
    pub skew: Slot,
}

impl CameraSlots {
    pub fn position(&self, vars: &[f64]) -> Vector3<f64> {
        Vector3::new(
            self.position[0].value(vars),
            self.position[1].value(vars),
            self.position[2].value(vars),
        )
    }

    pub fn orientation(&self, vars: &[f64]) -> [f64; 4] {
        self.orientation.map(|slot| slot.value(vars))
    }

    pub fn orientation_is_free(&self) -> bool {
        self.orientation[0].is_free()
    }

    /// Intrinsics with the current variable values substituted
    pub fn intrinsics(&self, base: &CameraIntrinsics, vars: &[f64]) -> CameraIntrinsics {
        CameraIntrinsics {
            focal_length: self.focal_length.value(vars),
            aspect_ratio: self.aspect_ratio.value(vars),
            principal_point: Vector2::new(
                self.principal_point[0].value(vars),
                self.principal_point[1].value(vars),
            ),
            skew: self.skew.value(vars),
            distortion: base.distortion,
        }
    }
}

/// The flat vector layout for one solve.
#[derive(Debug, Clone, Default)]
pub struct VariableLayout {
    values: Vec<f64>,
    points: SecondaryMap<PointKey, PointSlots>,
    cameras: SecondaryMap<CameraKey, CameraSlots>,
    quaternion_blocks: Vec<usize>,
}

impl VariableLayout {
    pub fn build(graph: &EntityGraph, mode: IntrinsicsMode) -> Self {
        let mut layout = Self::default();

        for (key, point) in graph.points() {
            let seed = point.optimized.unwrap_or_else(Vector3::zeros);
            let slots = Axis::ALL.map(|axis| match point.effective(axis) {
                Some(value) => Slot::Fixed(value),
                None => layout.allocate(seed[axis.index()]),
            });
            layout.points.insert(key, PointSlots(slots));
        }

        for (key, camera) in graph.cameras() {
            let slots = layout.allocate_camera(camera, mode);
            layout.cameras.insert(key, slots);
        }

        layout
    }

    fn allocate(&mut self, initial: f64) -> Slot {
        self.values.push(initial);
        Slot::Free(self.values.len() - 1)
    }

    fn allocate_camera(&mut self, camera: &Camera, mode: IntrinsicsMode) -> CameraSlots {
        let q = camera.orientation.coords();
        let (position, orientation) = if camera.pose_locked {
            (
                [0, 1, 2].map(|i| Slot::Fixed(camera.position[i])),
                q.map(Slot::Fixed),
            )
        } else {
            let position = [0, 1, 2].map(|i| self.allocate(camera.position[i]));
            self.quaternion_blocks.push(self.values.len());
            let orientation = q.map(|v| self.allocate(v));
            (position, orientation)
        };

        let intr = &camera.intrinsics;
        let optimize_intrinsics = mode != IntrinsicsMode::Fixed;

        let focal_length = if optimize_intrinsics {
            self.allocate(intr.focal_length)
        } else {
            Slot::Fixed(intr.focal_length)
        };

        let principal_point = if optimize_intrinsics && camera.may_be_cropped {
            [
                self.allocate(intr.principal_point.x),
                self.allocate(intr.principal_point.y),
            ]
        } else if optimize_intrinsics {
            let center = camera.image_center();
            [Slot::Fixed(center.x), Slot::Fixed(center.y)]
        } else {
            [
                Slot::Fixed(intr.principal_point.x),
                Slot::Fixed(intr.principal_point.y),
            ]
        };

        let (aspect_ratio, skew) = if mode == IntrinsicsMode::Full {
            (self.allocate(intr.aspect_ratio), self.allocate(intr.skew))
        } else {
            (Slot::Fixed(intr.aspect_ratio), Slot::Fixed(intr.skew))
        };

        CameraSlots {
            position,
            orientation,
            focal_length,
            aspect_ratio,
            principal_point,
            skew,
        }
    }

    /// Total number of free scalars
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn initial_values(&self) -> &[f64] {
        &self.values
    }

    pub fn point(&self, key: PointKey) -> Option<&PointSlots> {
        self.points.get(key)
    }

    pub fn camera(&self, key: CameraKey) -> Option<&CameraSlots> {
        self.cameras.get(key)
    }

    /// Start index of every free quaternion block
    pub fn quaternion_blocks(&self) -> &[usize] {
        &self.quaternion_blocks
    }

    pub fn points(&self) -> impl Iterator<Item = (PointKey, &PointSlots)> {
        self.points.iter()
    }

    pub fn cameras(&self) -> impl Iterator<Item = (CameraKey, &CameraSlots)> {
        self.cameras.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::WorldPoint;
    use crate::manifold::quaternion::Quaternion;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_locked_and_inferred_axes_get_no_index() -> TestResult {
        let mut graph = EntityGraph::new();
        let mut partial = WorldPoint::new("p")
            .with_locked_axis(Axis::X, 1.5)
            .with_initial(Vector3::new(9.0, 2.0, 3.0));
        partial.inferred[2] = Some(-4.0);
        let key = graph.add_point(partial);

        let layout = VariableLayout::build(&graph, IntrinsicsMode::Fixed);
        let slots = layout.point(key).ok_or("missing point")?;
        assert_eq!(slots.axis(Axis::X), Slot::Fixed(1.5));
        assert_eq!(slots.axis(Axis::Y), Slot::Free(0));
        assert_eq!(slots.axis(Axis::Z), Slot::Fixed(-4.0));
        assert_eq!(layout.initial_values(), &[2.0]);
        Ok(())
    }

    #[test]
    fn test_camera_allocation_by_mode() -> TestResult {
        let mut graph = EntityGraph::new();
        let mut cropped = crate::core::entities::Camera::new("cropped", 900.0, 640, 480)
            .with_pose(Vector3::new(1.0, 2.0, 3.0), Quaternion::identity())
            .with_may_be_cropped(true);
        cropped.intrinsics.principal_point = Vector2::new(300.0, 200.0);
        let mut uncropped = crate::core::entities::Camera::new("uncropped", 900.0, 640, 480)
            .with_pose(Vector3::zeros(), Quaternion::identity())
            .with_pose_locked(true);
        uncropped.intrinsics.principal_point = Vector2::new(300.0, 200.0);
        let a = graph.add_camera(cropped)?;
        let b = graph.add_camera(uncropped)?;

        let fixed = VariableLayout::build(&graph, IntrinsicsMode::Fixed);
        assert_eq!(fixed.len(), 7);
        assert_eq!(fixed.quaternion_blocks(), &[3]);
        let a_slots = fixed.camera(a).ok_or("a")?;
        assert_eq!(a_slots.principal_point[0], Slot::Fixed(300.0));

        let basic = VariableLayout::build(&graph, IntrinsicsMode::Basic);
        // 7 pose + focal + 2 principal point for the cropped camera, focal only for the other
        assert_eq!(basic.len(), 7 + 3 + 1);
        let b_slots = basic.camera(b).ok_or("b")?;
        assert_eq!(b_slots.principal_point, [Slot::Fixed(320.0), Slot::Fixed(240.0)]);
        assert!(!b_slots.orientation_is_free());
        assert!(b_slots.focal_length.is_free());

        let full = VariableLayout::build(&graph, IntrinsicsMode::Full);
        assert_eq!(full.len(), basic.len() + 4);
        Ok(())
    }

    #[test]
    fn test_slot_values_read_from_vector() {
        let slots = PointSlots([Slot::Free(1), Slot::Fixed(7.0), Slot::Free(0)]);
        let vars = [3.0, 4.0];
        assert_eq!(slots.position(&vars), Vector3::new(4.0, 7.0, 3.0));
        assert_eq!(slots.free_count(), 2);
    }
}
