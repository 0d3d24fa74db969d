//! Assembly of the least-squares problem from the entity graph.
//!
//! A [`Problem`] is a flat list of scalar [`ResidualProvider`]s over the variable
//! vector described by a [`VariableLayout`]. It is rebuilt for every solve and
//! holds no references into the graph.

use super::constraints::Constraint;
use super::entities::{Axis, CameraKey, VanishingLine};
use super::graph::EntityGraph;
use super::layout::{PointSlots, VariableLayout};
use super::loss_functions::Loss;
use crate::error::{RoteraResult, SolverError};
use crate::factors::priors::{
    DEFAULT_FOCAL_PRIOR_RATIO, DEFAULT_FOCAL_PRIOR_WEIGHT, DEFAULT_VANISHING_WEIGHT,
    vanishing_direction,
};
use crate::factors::{
    AngleDifferenceResidual, AngleResidual, AxisDeltaResidual, CollinearResidual,
    CoplanarResidual, DistanceDifferenceResidual, DistanceResidual, FixedPointResidual,
    FocalPriorResidual, LINE_LENGTH_SCALE, QuaternionNormResidual, RegularizationResidual,
    ReprojectionResidual, ResidualOwner, ResidualProvider, ResidualTag, VanishingPointResidual,
};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Weights and switches that shape the assembled problem
#[derive(Debug, Clone)]
pub struct ProblemSettings {
    /// Divide coplanarity residuals by the product of their edge lengths
    pub normalize_coplanarity: bool,
    /// Pull towards the initial estimate of every free point axis; 0 disables
    pub regularization_weight: f64,
    pub focal_prior_weight: f64,
    pub focal_prior_ratio: f64,
    pub vanishing_weight: f64,
    /// Robust loss applied to reprojection residuals
    pub observation_loss: Option<Arc<dyn Loss>>,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            normalize_coplanarity: true,
            regularization_weight: 0.0,
            focal_prior_weight: DEFAULT_FOCAL_PRIOR_WEIGHT,
            focal_prior_ratio: DEFAULT_FOCAL_PRIOR_RATIO,
            vanishing_weight: DEFAULT_VANISHING_WEIGHT,
            observation_loss: None,
        }
    }
}

/// Scalar residual providers over a flat variable vector
#[derive(Debug, Default)]
pub struct Problem {
    dimension: usize,
    providers: Vec<Box<dyn ResidualProvider>>,
    quaternion_blocks: Vec<usize>,
}

impl Problem {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            providers: Vec::new(),
            quaternion_blocks: Vec::new(),
        }
    }

    /// Mark `[start, start + 4)` as a quaternion to renormalize after each step
    pub fn with_quaternion_blocks(mut self, blocks: Vec<usize>) -> Self {
        self.quaternion_blocks = blocks;
        self
    }

    pub fn add_provider(&mut self, provider: impl ResidualProvider + 'static) {
        self.add_boxed(Box::new(provider));
    }

    /// # Panics
    /// When the provider references an index outside the variable vector
    pub fn add_boxed(&mut self, provider: Box<dyn ResidualProvider>) {
        if let Some(&bad) = provider.indices().iter().find(|&&i| i >= self.dimension) {
            panic!(
                "{} provider references variable {} outside a vector of length {}",
                provider.kind(),
                bad,
                self.dimension
            );
        }
        self.providers.push(provider);
    }

    /// Build every residual the graph implies
    pub fn assemble(
        graph: &EntityGraph,
        layout: &VariableLayout,
        settings: &ProblemSettings,
    ) -> RoteraResult<Self> {
        let mut problem =
            Self::new(layout.len()).with_quaternion_blocks(layout.quaternion_blocks().to_vec());
        let point_slots = |key| {
            layout.point(key).copied().ok_or_else(|| {
                SolverError::InvalidInput(format!("point {key:?} is missing from the layout"))
            })
        };

        for (key, observation) in graph.observations() {
            let point = point_slots(observation.point)?;
            let (camera, camera_slots) = graph
                .camera(observation.camera)
                .zip(layout.camera(observation.camera))
                .ok_or_else(|| {
                    SolverError::InvalidInput(format!(
                        "camera {:?} is missing from the layout",
                        observation.camera
                    ))
                })?;
            for provider in ReprojectionResidual::pair(
                &point,
                camera_slots,
                camera.intrinsics.distortion,
                &observation.pixel,
                observation.confidence,
                settings.observation_loss.clone(),
                ResidualOwner::Observation(key),
            ) {
                problem.add_provider(provider);
            }
        }

        for (key, line) in graph.lines() {
            let owner = ResidualOwner::Line(key);
            let start = point_slots(line.start)?;
            let end = point_slots(line.end)?;
            let mut slot = 0;

            if let Some(length) = line.target_length {
                problem.add_provider(DistanceResidual::new(
                    &start,
                    &end,
                    length,
                    LINE_LENGTH_SCALE,
                    ResidualTag::new(owner, slot),
                ));
                slot += 1;
            }
            for &axis in line.alignment.shared_axes() {
                problem.add_provider(AxisDeltaResidual::new(
                    &start,
                    &end,
                    axis,
                    ResidualTag::new(owner, slot),
                ));
                slot += 1;
            }
            for &coincident in &line.coincident {
                let middle = point_slots(coincident)?;
                let tag = ResidualTag::new(owner, slot);
                for provider in CollinearResidual::triple(&start, &middle, &end, tag) {
                    problem.add_provider(provider);
                }
                slot += 3;
            }
        }

        for (key, constraint) in graph.constraints() {
            let owner = ResidualOwner::Constraint(key);
            let slots = constraint
                .points()
                .into_iter()
                .map(point_slots)
                .collect::<RoteraResult<Vec<PointSlots>>>()?;
            problem.add_constraint(constraint, &slots, owner, settings);
        }

        for (key, camera) in graph.cameras() {
            let Some(slots) = layout.camera(key) else {
                continue;
            };
            let owner = ResidualOwner::Camera(key);
            if let Some(provider) = QuaternionNormResidual::new(slots, ResidualTag::new(owner, 0)) {
                problem.add_provider(provider);
            }
            if settings.focal_prior_weight > 0.0
                && let Some(provider) = FocalPriorResidual::new(
                    slots.focal_length,
                    camera.image_width,
                    camera.image_height,
                    settings.focal_prior_ratio,
                    settings.focal_prior_weight,
                    ResidualTag::new(owner, 1),
                )
            {
                problem.add_provider(provider);
            }
        }

        if settings.vanishing_weight > 0.0 {
            problem.add_vanishing_residuals(graph, layout, settings.vanishing_weight);
        }

        if settings.regularization_weight > 0.0 {
            let initial = layout.initial_values();
            for (key, _) in graph.points() {
                let slots = point_slots(key)?;
                for axis in Axis::ALL {
                    let slot = slots.axis(axis);
                    let Some(index) = slot.index() else {
                        continue;
                    };
                    if let Some(provider) = RegularizationResidual::new(
                        slot,
                        initial[index],
                        settings.regularization_weight,
                        ResidualTag::new(ResidualOwner::Point(key), axis.index()),
                    ) {
                        problem.add_provider(provider);
                    }
                }
            }
        }

        debug!(
            "Assembled {} residuals over {} variables",
            problem.len(),
            problem.dimension
        );
        Ok(problem)
    }

    /// `slots` holds the slots of `constraint.points()`, in the same order
    fn add_constraint(
        &mut self,
        constraint: &Constraint,
        slots: &[PointSlots],
        owner: ResidualOwner,
        settings: &ProblemSettings,
    ) {
        let tag = |slot| ResidualTag::new(owner, slot);
        match constraint {
            Constraint::Distance { distance, .. } => {
                self.add_provider(DistanceResidual::new(&slots[0], &slots[1], *distance, 1.0, tag(0)));
            }
            Constraint::Angle { radians, .. } => {
                self.add_provider(AngleResidual::new(
                    &slots[0], &slots[1], &slots[2], *radians, tag(0),
                ));
            }
            Constraint::Coplanar { .. } => {
                let refs: Vec<&PointSlots> = slots.iter().collect();
                for provider in CoplanarResidual::chain(&refs, settings.normalize_coplanarity, tag(0)) {
                    self.add_provider(provider);
                }
            }
            Constraint::FixedPoint { target, .. } => {
                for axis in Axis::ALL {
                    self.add_provider(FixedPointResidual::new(
                        &slots[0],
                        axis,
                        target[axis.index()],
                        tag(axis.index()),
                    ));
                }
            }
            Constraint::EqualDistances { .. } => {
                let pairs: Vec<[&PointSlots; 2]> =
                    slots.chunks_exact(2).map(|c| [&c[0], &c[1]]).collect();
                for (i, measured) in pairs.iter().enumerate().skip(1) {
                    self.add_provider(DistanceDifferenceResidual::new(pairs[0], *measured, tag(i - 1)));
                }
            }
            Constraint::EqualAngles { .. } => {
                let triplets: Vec<[&PointSlots; 3]> =
                    slots.chunks_exact(3).map(|c| [&c[0], &c[1], &c[2]]).collect();
                for (i, measured) in triplets.iter().enumerate().skip(1) {
                    self.add_provider(AngleDifferenceResidual::new(triplets[0], *measured, tag(i - 1)));
                }
            }
            Constraint::Collinear { .. } => {
                let (anchor, far) = (&slots[0], &slots[slots.len() - 1]);
                for (i, middle) in slots[1..slots.len() - 1].iter().enumerate() {
                    for provider in CollinearResidual::triple(anchor, middle, far, tag(3 * i)) {
                        self.add_provider(provider);
                    }
                }
            }
        }
    }

    fn add_vanishing_residuals(&mut self, graph: &EntityGraph, layout: &VariableLayout, weight: f64) {
        let mut groups: BTreeMap<(CameraKey, Axis), Vec<&VanishingLine>> = BTreeMap::new();
        for (_, line) in graph.vanishing_lines() {
            groups.entry((line.camera, line.axis)).or_default().push(line);
        }

        for ((camera_key, axis), lines) in groups {
            let (Some(camera), Some(slots)) = (graph.camera(camera_key), layout.camera(camera_key))
            else {
                continue;
            };
            if !slots.orientation_is_free() {
                continue;
            }
            match vanishing_direction(&camera.intrinsics, &lines) {
                Some(ray) => self.add_provider(VanishingPointResidual::new(
                    slots,
                    axis,
                    ray,
                    weight,
                    ResidualTag::new(ResidualOwner::Camera(camera_key), 2 + axis.index()),
                )),
                None => debug!(
                    "Camera {}: {} vanishing line(s) along {} give no vanishing point",
                    camera.name,
                    lines.len(),
                    axis
                ),
            }
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of scalar residuals
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn providers(&self) -> &[Box<dyn ResidualProvider>] {
        &self.providers
    }

    /// Start indices of the quaternion blocks
    pub fn quaternion_blocks(&self) -> &[usize] {
        &self.quaternion_blocks
    }

    /// Sum of squared residuals
    pub fn cost(&self, vars: &[f64]) -> f64 {
        self.providers
            .iter()
            .map(|provider| provider.residual(vars).powi(2))
            .sum()
    }

    pub fn residuals(&self, vars: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.providers.len(),
            self.providers.iter().map(|provider| provider.residual(vars)),
        )
    }

    /// Dense `m × n` Jacobian, one row per provider
    pub fn jacobian(&self, vars: &[f64]) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.providers.len(), self.dimension);
        for (row, provider) in self.providers.iter().enumerate() {
            for (&col, g) in provider.indices().iter().zip(provider.gradient(vars)) {
                jacobian[(row, col)] += g;
            }
        }
        jacobian
    }

    /// Every residual with its tag and kind, in provider order
    pub fn tagged_residuals(&self, vars: &[f64]) -> Vec<(ResidualTag, &'static str, f64)> {
        self.providers
            .iter()
            .map(|provider| (provider.tag(), provider.kind(), provider.residual(vars)))
            .collect()
    }
}
