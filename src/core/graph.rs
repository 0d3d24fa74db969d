//! Arena storage for every entity taking part in a solve.

use super::constraints::Constraint;
use super::entities::{
    Camera, CameraKey, ConstraintKey, Line, LineKey, Observation, ObservationKey, PointKey,
    VanishingLine, VanishingLineKey, WorldPoint,
};
use crate::error::{RoteraResult, SolverError};
use slotmap::SlotMap;

/// Entities keyed by stable handles.
///
/// Insertion validates that every referenced handle exists, so downstream code
/// can index the arenas without re-checking.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    points: SlotMap<PointKey, WorldPoint>,
    cameras: SlotMap<CameraKey, Camera>,
    lines: SlotMap<LineKey, Line>,
    observations: SlotMap<ObservationKey, Observation>,
    constraints: SlotMap<ConstraintKey, Constraint>,
    vanishing_lines: SlotMap<VanishingLineKey, VanishingLine>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: WorldPoint) -> PointKey {
        self.points.insert(point)
    }

    pub fn add_camera(&mut self, camera: Camera) -> RoteraResult<CameraKey> {
        camera.intrinsics.validate()?;
        if camera.image_width == 0 || camera.image_height == 0 {
            return Err(crate::camera::CameraError::InvalidImageSize {
                width: camera.image_width,
                height: camera.image_height,
            }
            .into());
        }
        Ok(self.cameras.insert(camera))
    }

    pub fn add_line(&mut self, line: Line) -> RoteraResult<LineKey> {
        for key in line.points() {
            self.require_point(key)?;
        }
        if line.start == line.end {
            return Err(SolverError::InvalidInput(format!(
                "line '{}' has identical endpoints",
                line.name
            )));
        }
        if let Some(length) = line.target_length
            && !(length.is_finite() && length >= 0.0)
        {
            return Err(SolverError::InvalidInput(format!(
                "line '{}' has invalid target length {length}",
                line.name
            )));
        }
        Ok(self.lines.insert(line))
    }

    pub fn add_observation(&mut self, observation: Observation) -> RoteraResult<ObservationKey> {
        self.require_point(observation.point)?;
        self.require_camera(observation.camera)?;
        if !observation.pixel.iter().all(|v| v.is_finite()) {
            return Err(SolverError::InvalidInput(
                "observation pixel must be finite".into(),
            ));
        }
        if !(observation.confidence > 0.0 && observation.confidence.is_finite()) {
            return Err(SolverError::InvalidInput(format!(
                "observation confidence must be positive, got {}",
                observation.confidence
            )));
        }
        Ok(self.observations.insert(observation))
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> RoteraResult<ConstraintKey> {
        constraint.validate()?;
        for key in constraint.points() {
            self.require_point(key)?;
        }
        Ok(self.constraints.insert(constraint))
    }

    pub fn add_vanishing_line(&mut self, line: VanishingLine) -> RoteraResult<VanishingLineKey> {
        self.require_camera(line.camera)?;
        if (line.end - line.start).norm() < 1e-9 {
            return Err(SolverError::InvalidInput(
                "vanishing line endpoints coincide".into(),
            ));
        }
        Ok(self.vanishing_lines.insert(line))
    }

    /// Remove a point along with the observations, lines and constraints that use it
    pub fn remove_point(&mut self, key: PointKey) -> Option<WorldPoint> {
        let point = self.points.remove(key)?;
        self.observations.retain(|_, obs| obs.point != key);
        self.lines.retain(|_, line| line.start != key && line.end != key);
        for line in self.lines.values_mut() {
            line.coincident.retain(|&k| k != key);
        }
        self.constraints
            .retain(|_, constraint| !constraint.points().contains(&key));
        Some(point)
    }

    /// Remove a camera along with its observations and vanishing lines
    pub fn remove_camera(&mut self, key: CameraKey) -> Option<Camera> {
        let camera = self.cameras.remove(key)?;
        self.observations.retain(|_, obs| obs.camera != key);
        self.vanishing_lines.retain(|_, vl| vl.camera != key);
        Some(camera)
    }

    pub fn remove_line(&mut self, key: LineKey) -> Option<Line> {
        self.lines.remove(key)
    }

    pub fn remove_observation(&mut self, key: ObservationKey) -> Option<Observation> {
        self.observations.remove(key)
    }

    pub fn remove_constraint(&mut self, key: ConstraintKey) -> Option<Constraint> {
        self.constraints.remove(key)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.cameras.clear();
        self.lines.clear();
        self.observations.clear();
        self.constraints.clear();
        self.vanishing_lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.cameras.is_empty()
    }

    pub fn point(&self, key: PointKey) -> Option<&WorldPoint> {
        self.points.get(key)
    }

    pub fn point_mut(&mut self, key: PointKey) -> Option<&mut WorldPoint> {
        self.points.get_mut(key)
    }

    pub fn camera(&self, key: CameraKey) -> Option<&Camera> {
        self.cameras.get(key)
    }

    pub fn camera_mut(&mut self, key: CameraKey) -> Option<&mut Camera> {
        self.cameras.get_mut(key)
    }

    pub fn line(&self, key: LineKey) -> Option<&Line> {
        self.lines.get(key)
    }

    pub fn observation(&self, key: ObservationKey) -> Option<&Observation> {
        self.observations.get(key)
    }

    pub fn constraint(&self, key: ConstraintKey) -> Option<&Constraint> {
        self.constraints.get(key)
    }

    pub fn points(&self) -> impl Iterator<Item = (PointKey, &WorldPoint)> {
        self.points.iter()
    }

    pub fn points_mut(&mut self) -> impl Iterator<Item = (PointKey, &mut WorldPoint)> {
        self.points.iter_mut()
    }

    pub fn cameras(&self) -> impl Iterator<Item = (CameraKey, &Camera)> {
        self.cameras.iter()
    }

    pub fn cameras_mut(&mut self) -> impl Iterator<Item = (CameraKey, &mut Camera)> {
        self.cameras.iter_mut()
    }

    pub fn lines(&self) -> impl Iterator<Item = (LineKey, &Line)> {
        self.lines.iter()
    }

    pub fn observations(&self) -> impl Iterator<Item = (ObservationKey, &Observation)> {
        self.observations.iter()
    }

    pub fn constraints(&self) -> impl Iterator<Item = (ConstraintKey, &Constraint)> {
        self.constraints.iter()
    }

    pub fn vanishing_lines(&self) -> impl Iterator<Item = (VanishingLineKey, &VanishingLine)> {
        self.vanishing_lines.iter()
    }

    /// Observations made by one camera
    pub fn observations_of(
        &self,
        camera: CameraKey,
    ) -> impl Iterator<Item = (ObservationKey, &Observation)> {
        self.observations
            .iter()
            .filter(move |(_, obs)| obs.camera == camera)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    fn require_point(&self, key: PointKey) -> RoteraResult<()> {
        if self.points.contains_key(key) {
            Ok(())
        } else {
            Err(SolverError::InvalidInput(format!("unknown point {key:?}")))
        }
    }

    fn require_camera(&self, key: CameraKey) -> RoteraResult<()> {
        if self.cameras.contains_key(key) {
            Ok(())
        } else {
            Err(SolverError::InvalidInput(format!("unknown camera {key:?}")))
        }
    }
}
