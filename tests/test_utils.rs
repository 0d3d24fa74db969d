//! Shared utilities for integration tests
//!
//! Scene builders and measurements used by more than one test file.

#![allow(dead_code)]

use nalgebra::Vector3;
use rotera_solver::core::layout::{IntrinsicsMode, VariableLayout};
use rotera_solver::manifold::quaternion::Quaternion;
use rotera_solver::synthetic::{CameraSetup, LoadedScene, SyntheticScene};
use rotera_solver::{Camera, CameraKey, ConstraintSystem, SolveOutcome};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Reprojection RMSE in pixels, assuming every residual is a pixel residual
pub fn pixel_rmse(outcome: &SolveOutcome, observations: usize) -> f64 {
    outcome.residual / ((2 * observations.max(1)) as f64).sqrt()
}

/// Ring scene loaded with the first two cameras locked and the rest perturbed
pub fn perturbed_ring(
    points: usize,
    cameras: usize,
    noise: f64,
    seed: u64,
) -> Result<(SyntheticScene, ConstraintSystem, LoadedScene), Box<dyn std::error::Error>> {
    let scene = SyntheticScene::ring(points, cameras, 6.0, seed)?;
    let scene = scene.with_noise(noise, seed + 100);
    let mut system = ConstraintSystem::new();
    let loaded = scene.load(&mut system, CameraSetup::FirstLocked)?;

    for (i, key) in loaded.cameras.iter().enumerate() {
        let camera = system.camera_mut(*key).ok_or("missing camera")?;
        match i {
            0 => {}
            1 => camera.pose_locked = true,
            _ => {
                let k = i as f64;
                camera.position += Vector3::new(0.05 * k.sin(), -0.04, 0.03 * k.cos());
                let axis = Vector3::new(0.01, -0.015 * k.cos(), 0.008);
                let nudge = Quaternion::from_scaled_axis(&axis);
                camera.orientation = nudge.multiply(&camera.orientation);
            }
        }
    }
    Ok((scene, system, loaded))
}

/// Start index of every free quaternion block, as the solver will lay them out
pub fn quaternion_blocks(system: &ConstraintSystem) -> Vec<usize> {
    VariableLayout::build(system.graph(), IntrinsicsMode::Fixed)
        .quaternion_blocks()
        .to_vec()
}

/// Relative rotation angle and translation direction of `second` seen from `first`
pub fn relative_pose(first: &Camera, second: &Camera) -> (Quaternion, Vector3<f64>) {
    let rotation = second.orientation.multiply(&first.orientation.conjugate());
    let direction = first
        .orientation
        .transform_vector(&(second.position - first.position))
        .normalize();
    (rotation, direction)
}

pub fn camera<'a>(system: &'a ConstraintSystem, key: CameraKey) -> &'a Camera {
    match system.camera(key) {
        Some(camera) => camera,
        None => panic!("camera {key:?} missing"),
    }
}
