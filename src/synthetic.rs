//! Seeded synthetic scenes for tests, benchmarks and the demo binary.
//!
//! A scene is ground truth: world points, posed cameras and the pixels where
//! each camera sees each point. [`SyntheticScene::load`] turns it into a
//! [`ConstraintSystem`] with a chosen amount of prior knowledge.

use crate::core::entities::{Camera, CameraKey, Observation, PointKey, WorldPoint};
use crate::core::system::ConstraintSystem;
use crate::error::{RoteraResult, SolverError};
use crate::manifold::quaternion::Quaternion;
use nalgebra::{Matrix3, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SYNTHETIC_FOCAL_LENGTH: f64 = 800.0;
pub const SYNTHETIC_WIDTH: u32 = 1280;
pub const SYNTHETIC_HEIGHT: u32 = 960;

/// A pixel measurement by index into the scene's points and cameras
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticObservation {
    pub point: usize,
    pub camera: usize,
    pub pixel: Vector2<f64>,
}

/// How much of the ground truth a loaded system starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSetup {
    /// Every camera at its true pose, locked
    Locked,
    /// Every camera at its true pose, only the first one locked
    FirstLocked,
    /// No camera poses; the solver must initialize them
    Unposed,
}

/// Handles of a scene loaded into a system, in scene order
#[derive(Debug, Clone, Default)]
pub struct LoadedScene {
    pub points: Vec<PointKey>,
    pub cameras: Vec<CameraKey>,
}

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub points: Vec<Vector3<f64>>,
    pub cameras: Vec<Camera>,
    pub observations: Vec<SyntheticObservation>,
}

/// World-to-camera rotation of a camera at `eye` looking at `target`, image y down
pub fn look_at(eye: &Vector3<f64>, target: &Vector3<f64>) -> Quaternion {
    let forward = (target - eye).normalize();
    let down = Vector3::y();
    let right = down.cross(&forward);
    let right = if right.norm() > 1e-9 {
        right.normalize()
    } else {
        Vector3::x()
    };
    let image_down = forward.cross(&right);
    let rotation = Matrix3::from_rows(&[
        right.transpose(),
        image_down.transpose(),
        forward.transpose(),
    ]);
    Quaternion::from_rotation_matrix(&rotation)
}

/// Zero-mean Gaussian sample by the Box-Muller transform
pub fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    let u1: f64 = rng.random_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.random();
    sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn random_points(
    rng: &mut StdRng,
    count: usize,
    center: Vector3<f64>,
    half_extent: f64,
) -> Vec<Vector3<f64>> {
    (0..count)
        .map(|_| {
            center
                + Vector3::new(
                    rng.random_range(-half_extent..half_extent),
                    rng.random_range(-half_extent..half_extent),
                    rng.random_range(-half_extent..half_extent),
                )
        })
        .collect()
}

fn synthetic_camera(name: String, eye: Vector3<f64>, target: &Vector3<f64>) -> Camera {
    Camera::new(name, SYNTHETIC_FOCAL_LENGTH, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT)
        .with_pose(eye, look_at(&eye, target))
}

impl SyntheticScene {
    fn observe(points: Vec<Vector3<f64>>, cameras: Vec<Camera>) -> Self {
        let mut observations = Vec::new();
        for (c, camera) in cameras.iter().enumerate() {
            for (p, point) in points.iter().enumerate() {
                let Some(pixel) = camera.project(point) else {
                    continue;
                };
                let inside = (0.0..camera.image_width as f64).contains(&pixel.x)
                    && (0.0..camera.image_height as f64).contains(&pixel.y);
                if inside {
                    observations.push(SyntheticObservation {
                        point: p,
                        camera: c,
                        pixel,
                    });
                }
            }
        }
        Self {
            points,
            cameras,
            observations,
        }
    }

    /// Two cameras `baseline` apart looking at a point cloud 8 units ahead.
    ///
    /// The baseline is tilted off the coordinate axes so the relative
    /// translation is never axis-aligned.
    pub fn two_view(count: usize, baseline: f64, seed: u64) -> RoteraResult<Self> {
        if !(baseline.is_finite() && baseline > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "baseline must be positive, got {baseline}"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let target = Vector3::new(0.0, 0.0, 8.0);
        let points = random_points(&mut rng, count, target, 2.0);

        let direction = Vector3::new(1.0, 0.15, 0.1).normalize();
        let first = -direction * (baseline / 2.0);
        let second = direction * (baseline / 2.0);
        let cameras = vec![
            synthetic_camera("left".to_string(), first, &target),
            synthetic_camera("right".to_string(), second, &target),
        ];
        Ok(Self::observe(points, cameras))
    }

    /// Cameras evenly spaced on a horizontal circle around a unit point cloud.
    pub fn ring(
        point_count: usize,
        camera_count: usize,
        radius: f64,
        seed: u64,
    ) -> RoteraResult<Self> {
        if radius <= 2.0 * 3.0_f64.sqrt() {
            return Err(SolverError::InvalidInput(format!(
                "ring radius {radius} would place cameras inside the point cloud"
            )));
        }
        if camera_count < 2 {
            return Err(SolverError::InvalidInput(format!(
                "a ring needs at least two cameras, got {camera_count}"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let target = Vector3::zeros();
        let points = random_points(&mut rng, point_count, target, 1.0);

        // A partial arc keeps neighbouring views overlapping
        let arc = std::f64::consts::FRAC_PI_2;
        let cameras = (0..camera_count)
            .map(|i| {
                let theta = -arc / 2.0 + arc * i as f64 / (camera_count - 1) as f64;
                let height = -0.1 * radius + 0.05 * radius * (i % 2) as f64;
                let eye = Vector3::new(radius * theta.sin(), height, -radius * theta.cos());
                synthetic_camera(format!("cam{i}"), eye, &target)
            })
            .collect();
        Ok(Self::observe(points, cameras))
    }

    /// Add Gaussian pixel noise with standard deviation `sigma`
    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        if sigma > 0.0 {
            let mut rng = StdRng::seed_from_u64(seed);
            for obs in &mut self.observations {
                obs.pixel.x += gaussian(&mut rng, sigma);
                obs.pixel.y += gaussian(&mut rng, sigma);
            }
        }
        self
    }

    /// Populate `system` with this scene's cameras, points and observations.
    ///
    /// Points carry no locked coordinates and no initial estimate.
    pub fn load(
        &self,
        system: &mut ConstraintSystem,
        setup: CameraSetup,
    ) -> RoteraResult<LoadedScene> {
        let mut loaded = LoadedScene::default();
        for (i, truth) in self.cameras.iter().enumerate() {
            let camera = match setup {
                CameraSetup::Locked => truth.clone().with_pose_locked(true),
                CameraSetup::FirstLocked => truth.clone().with_pose_locked(i == 0),
                CameraSetup::Unposed => Camera::new(
                    truth.name.clone(),
                    truth.intrinsics.focal_length,
                    truth.image_width,
                    truth.image_height,
                ),
            };
            loaded.cameras.push(system.add_camera(camera)?);
        }
        for i in 0..self.points.len() {
            loaded.points.push(system.add_point(WorldPoint::new(format!("p{i}"))));
        }
        for obs in &self.observations {
            system.add_observation(Observation::new(
                loaded.points[obs.point],
                loaded.cameras[obs.camera],
                obs.pixel.x,
                obs.pixel.y,
            ))?;
        }
        Ok(loaded)
    }

    /// Mean distance between solved and true points, over solved points
    pub fn mean_point_error(&self, system: &ConstraintSystem, loaded: &LoadedScene) -> f64 {
        let errors: Vec<f64> = loaded
            .points
            .iter()
            .zip(&self.points)
            .filter_map(|(key, truth)| {
                let solved = system.point(*key)?.optimized?;
                Some((solved - truth).norm())
            })
            .collect();
        if errors.is_empty() {
            return f64::NAN;
        }
        errors.iter().sum::<f64>() / errors.len() as f64
    }
}
