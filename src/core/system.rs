//! The constraint system: entity storage plus the end-to-end solve pipeline.
//!
//! A solve works on a copy of the graph. Inference, pose initialization, point
//! seeding, layout, problem assembly and optimization all run against the copy,
//! which replaces the stored graph only when the pipeline finishes. A setup
//! error therefore leaves every entity exactly as it was.

use super::constraints::Constraint;
use super::diagnostics::{DEFAULT_TOP_K, Diagnostics};
use super::entities::{
    Camera, CameraKey, ConstraintKey, Line, LineKey, Observation, ObservationKey, PointKey,
    VanishingLine, VanishingLineKey, WorldPoint,
};
use super::graph::EntityGraph;
use super::inference::{InferenceConflict, infer_coordinates};
use super::layout::{IntrinsicsMode, VariableLayout};
use super::loss_functions::LossKind;
use super::problem::{Problem, ProblemSettings};
use super::structure::StructureReport;
use crate::epipolar::TwoViewConfig;
use crate::error::RoteraResult;
use crate::factors::priors::{
    DEFAULT_FOCAL_PRIOR_RATIO, DEFAULT_FOCAL_PRIOR_WEIGHT, DEFAULT_VANISHING_WEIGHT,
};
use crate::initialization::{InitializationReport, initialize};
use crate::manifold::quaternion::Quaternion;
use crate::optimizer::{
    IterationObserver, IterationState, LevenbergMarquardt, LevenbergMarquardtConfig,
    ObserverAction, OptimizationStatus,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything that shapes one solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub optimizer: LevenbergMarquardtConfig,
    pub intrinsics: IntrinsicsMode,
    pub two_view: TwoViewConfig,
    /// Pull of free point axes towards their initial estimate; 0 disables
    pub regularization_weight: f64,
    pub focal_prior_weight: f64,
    pub focal_prior_ratio: f64,
    pub vanishing_weight: f64,
    pub normalize_coplanarity: bool,
    pub observation_loss: LossKind,
    /// Distance along the viewing ray for points seen by a single posed camera
    pub default_depth: f64,
    /// Largest residual accepted as converged when nothing is free
    pub zero_variable_residual_threshold: f64,
    /// Run the dense rank and uncertainty analysis after the solve
    #[serde(default)]
    pub analyze_structure: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            optimizer: LevenbergMarquardtConfig::default(),
            intrinsics: IntrinsicsMode::Fixed,
            two_view: TwoViewConfig::default(),
            regularization_weight: 0.0,
            focal_prior_weight: DEFAULT_FOCAL_PRIOR_WEIGHT,
            focal_prior_ratio: DEFAULT_FOCAL_PRIOR_RATIO,
            vanishing_weight: DEFAULT_VANISHING_WEIGHT,
            normalize_coplanarity: true,
            observation_loss: LossKind::None,
            default_depth: 10.0,
            zero_variable_residual_threshold: 1e-6,
            analyze_structure: false,
        }
    }
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimizer(mut self, optimizer: LevenbergMarquardtConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_intrinsics(mut self, mode: IntrinsicsMode) -> Self {
        self.intrinsics = mode;
        self
    }

    pub fn with_two_view(mut self, two_view: TwoViewConfig) -> Self {
        self.two_view = two_view;
        self
    }

    pub fn with_regularization(mut self, weight: f64) -> Self {
        self.regularization_weight = weight;
        self
    }

    pub fn with_focal_prior(mut self, weight: f64, ratio: f64) -> Self {
        self.focal_prior_weight = weight;
        self.focal_prior_ratio = ratio;
        self
    }

    pub fn with_vanishing_weight(mut self, weight: f64) -> Self {
        self.vanishing_weight = weight;
        self
    }

    pub fn with_normalize_coplanarity(mut self, normalize: bool) -> Self {
        self.normalize_coplanarity = normalize;
        self
    }

    pub fn with_observation_loss(mut self, loss: LossKind) -> Self {
        self.observation_loss = loss;
        self
    }

    pub fn with_default_depth(mut self, depth: f64) -> Self {
        self.default_depth = depth;
        self
    }

    pub fn with_zero_variable_threshold(mut self, threshold: f64) -> Self {
        self.zero_variable_residual_threshold = threshold;
        self
    }

    pub fn with_structure_analysis(mut self, enabled: bool) -> Self {
        self.analyze_structure = enabled;
        self
    }

    /// Problem assembly settings; fails on an invalid loss scale
    pub fn problem_settings(&self) -> RoteraResult<ProblemSettings> {
        Ok(ProblemSettings {
            normalize_coplanarity: self.normalize_coplanarity,
            regularization_weight: self.regularization_weight,
            focal_prior_weight: self.focal_prior_weight,
            focal_prior_ratio: self.focal_prior_ratio,
            vanishing_weight: self.vanishing_weight,
            observation_loss: self.observation_loss.build()?,
        })
    }
}

/// Result of [`ConstraintSystem::solve`]
#[derive(Debug, Clone, Default)]
pub struct SolveOutcome {
    pub converged: bool,
    pub iterations: usize,
    /// Square root of the final sum of squared residuals
    pub residual: f64,
    /// Setup failure; nothing was written back when set
    pub error: Option<String>,
    /// Optimizer termination status, `None` when the optimizer did not run
    pub status: Option<OptimizationStatus>,
    pub conflicts: Vec<InferenceConflict>,
    pub diagnostics: Option<Diagnostics>,
    pub initialization: Option<InitializationReport>,
    pub elapsed: Duration,
}

struct PipelineResult {
    converged: bool,
    iterations: usize,
    residual: f64,
    status: Option<OptimizationStatus>,
    diagnostics: Diagnostics,
    initialization: InitializationReport,
}

/// Entity graph with the solve pipeline on top
#[derive(Debug, Clone, Default)]
pub struct ConstraintSystem {
    graph: EntityGraph,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: EntityGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn add_point(&mut self, point: WorldPoint) -> PointKey {
        self.graph.add_point(point)
    }

    pub fn add_camera(&mut self, camera: Camera) -> RoteraResult<CameraKey> {
        self.graph.add_camera(camera)
    }

    pub fn add_line(&mut self, line: Line) -> RoteraResult<LineKey> {
        self.graph.add_line(line)
    }

    pub fn add_observation(&mut self, observation: Observation) -> RoteraResult<ObservationKey> {
        self.graph.add_observation(observation)
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> RoteraResult<ConstraintKey> {
        self.graph.add_constraint(constraint)
    }

    pub fn add_vanishing_line(&mut self, line: VanishingLine) -> RoteraResult<VanishingLineKey> {
        self.graph.add_vanishing_line(line)
    }

    pub fn remove_point(&mut self, key: PointKey) -> Option<WorldPoint> {
        self.graph.remove_point(key)
    }

    pub fn remove_camera(&mut self, key: CameraKey) -> Option<Camera> {
        self.graph.remove_camera(key)
    }

    pub fn remove_line(&mut self, key: LineKey) -> Option<Line> {
        self.graph.remove_line(key)
    }

    pub fn remove_observation(&mut self, key: ObservationKey) -> Option<Observation> {
        self.graph.remove_observation(key)
    }

    pub fn remove_constraint(&mut self, key: ConstraintKey) -> Option<Constraint> {
        self.graph.remove_constraint(key)
    }

    pub fn clear(&mut self) {
        self.graph.clear();
    }

    pub fn point(&self, key: PointKey) -> Option<&WorldPoint> {
        self.graph.point(key)
    }

    pub fn point_mut(&mut self, key: PointKey) -> Option<&mut WorldPoint> {
        self.graph.point_mut(key)
    }

    pub fn camera(&self, key: CameraKey) -> Option<&Camera> {
        self.graph.camera(key)
    }

    pub fn camera_mut(&mut self, key: CameraKey) -> Option<&mut Camera> {
        self.graph.camera_mut(key)
    }

    pub fn line(&self, key: LineKey) -> Option<&Line> {
        self.graph.line(key)
    }

    pub fn observation(&self, key: ObservationKey) -> Option<&Observation> {
        self.graph.observation(key)
    }

    pub fn constraint(&self, key: ConstraintKey) -> Option<&Constraint> {
        self.graph.constraint(key)
    }

    /// Run the full pipeline and write the results back.
    pub fn solve(&mut self, config: &SystemConfig) -> SolveOutcome {
        let mut never_stop = |_: &IterationState<'_>| ObserverAction::Continue;
        self.solve_with_observer(config, &mut never_stop)
    }

    /// [`ConstraintSystem::solve`] with an observer that may stop the optimizer
    pub fn solve_with_observer(
        &mut self,
        config: &SystemConfig,
        observer: &mut dyn IterationObserver,
    ) -> SolveOutcome {
        let start = Instant::now();
        let mut working = self.graph.clone();

        let inference = infer_coordinates(&mut working);

        match Self::run_pipeline(&mut working, config, observer) {
            Ok(result) => {
                self.graph = working;
                let outcome = SolveOutcome {
                    converged: result.converged,
                    iterations: result.iterations,
                    residual: result.residual,
                    error: None,
                    status: result.status,
                    conflicts: inference.conflicts,
                    diagnostics: Some(result.diagnostics),
                    initialization: Some(result.initialization),
                    elapsed: start.elapsed(),
                };
                info!(
                    "Solve finished: converged {}, {} iterations, residual {:.6e}, {:.1} ms",
                    outcome.converged,
                    outcome.iterations,
                    outcome.residual,
                    outcome.elapsed.as_secs_f64() * 1000.0
                );
                outcome
            }
            Err(err) => {
                warn!("Solve aborted during setup: {err}");
                SolveOutcome {
                    error: Some(err.to_string()),
                    conflicts: inference.conflicts,
                    elapsed: start.elapsed(),
                    ..SolveOutcome::default()
                }
            }
        }
    }

    fn run_pipeline(
        graph: &mut EntityGraph,
        config: &SystemConfig,
        observer: &mut dyn IterationObserver,
    ) -> RoteraResult<PipelineResult> {
        let settings = config.problem_settings()?;
        let initialization = initialize(graph, &config.two_view, config.default_depth)?;

        let layout = VariableLayout::build(graph, config.intrinsics);
        let problem = Problem::assemble(graph, &layout, &settings)?;

        if layout.is_empty() {
            let values = layout.initial_values();
            distribute(graph, &layout, values);
            let residual = problem.cost(values).sqrt();
            return Ok(PipelineResult {
                converged: residual <= config.zero_variable_residual_threshold,
                iterations: 0,
                residual,
                status: None,
                diagnostics: diagnose(graph, &layout, &problem, values, config),
                initialization,
            });
        }

        let mut solver = LevenbergMarquardt::with_config(config.optimizer.clone());
        let result =
            solver.minimize_with_observer(&problem, layout.initial_values(), observer)?;
        let vars = result.parameters.as_slice();
        distribute(graph, &layout, vars);

        Ok(PipelineResult {
            converged: result.converged,
            iterations: result.iterations,
            residual: result.final_cost.sqrt(),
            status: Some(result.status),
            diagnostics: diagnose(graph, &layout, &problem, vars, config),
            initialization,
        })
    }
}

fn diagnose(
    graph: &EntityGraph,
    layout: &VariableLayout,
    problem: &Problem,
    vars: &[f64],
    config: &SystemConfig,
) -> Diagnostics {
    let diagnostics = Diagnostics::from_problem(problem, vars, DEFAULT_TOP_K);
    if !config.analyze_structure {
        return diagnostics;
    }
    let structure = StructureReport::analyze(graph, layout, problem, vars);
    for degeneracy in &structure.degeneracies {
        warn!("Structure: {}", degeneracy);
    }
    diagnostics.with_structure(structure)
}

/// Copy optimized values back into the entities
fn distribute(graph: &mut EntityGraph, layout: &VariableLayout, vars: &[f64]) {
    for (key, point) in graph.points_mut() {
        if let Some(slots) = layout.point(key) {
            point.optimized = Some(slots.position(vars));
        }
    }

    for (key, camera) in graph.cameras_mut() {
        let Some(slots) = layout.camera(key) else {
            continue;
        };
        if !camera.pose_locked {
            camera.position = slots.position(vars);
            let [w, x, y, z] = slots.orientation(vars);
            if let Some(orientation) = Quaternion::new(w, x, y, z) {
                camera.orientation = orientation;
            }
        }
        camera.intrinsics = slots.intrinsics(&camera.intrinsics, vars);
    }
}
