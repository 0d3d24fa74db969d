//! Bundle adjustment over multi-camera ring scenes
//!
//! Two cameras are locked to fix frame and scale; the remaining cameras start
//! perturbed and every point starts unknown.

use std::collections::HashSet;

use rotera_solver::factors::ResidualOwner;
use rotera_solver::linalg::LinearSolverType;
use rotera_solver::optimizer::LevenbergMarquardtConfig;
use rotera_solver::synthetic::{LoadedScene, SyntheticScene};
use rotera_solver::{
    ConstraintSystem, LossKind, Observation, ObservationKey, SystemConfig, WorldPoint,
};

mod test_utils;
use test_utils::*;

type OutlierScene = (
    SyntheticScene,
    ConstraintSystem,
    LoadedScene,
    HashSet<ObservationKey>,
);

/// Ring with cameras at their true poses, the first two locked, and every
/// `stride`-th observation pushed `offset` pixels off.
fn ring_with_outliers(
    stride: usize,
    offset: f64,
) -> Result<OutlierScene, Box<dyn std::error::Error>> {
    let scene = SyntheticScene::ring(50, 4, 6.0, 31)?.with_noise(0.3, 32);
    let mut system = ConstraintSystem::new();
    let mut loaded = LoadedScene::default();
    for (i, truth) in scene.cameras.iter().enumerate() {
        loaded
            .cameras
            .push(system.add_camera(truth.clone().with_pose_locked(i < 2))?);
    }
    for i in 0..scene.points.len() {
        loaded.points.push(system.add_point(WorldPoint::new(format!("p{i}"))));
    }

    let mut outliers = HashSet::new();
    for (i, obs) in scene.observations.iter().enumerate() {
        let shift = if i % stride == stride / 2 { offset } else { 0.0 };
        let key = system.add_observation(Observation::new(
            loaded.points[obs.point],
            loaded.cameras[obs.camera],
            obs.pixel.x + shift,
            obs.pixel.y - shift,
        ))?;
        if shift != 0.0 {
            outliers.insert(key);
        }
    }
    Ok((scene, system, loaded, outliers))
}

#[test]
fn test_perturbed_ring_recovers_structure() -> TestResult {
    let (scene, mut system, loaded) = perturbed_ring(60, 5, 0.0, 7)?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.converged, "{outcome:?}");
    assert!(pixel_rmse(&outcome, scene.observations.len()) < 1e-3);
    assert!(scene.mean_point_error(&system, &loaded) < 1e-4);

    for (key, truth) in loaded.cameras.iter().zip(&scene.cameras).skip(2) {
        let solved = camera(&system, *key);
        assert!((solved.position - truth.position).norm() < 1e-4);
        assert!(solved.orientation.angle_to(&truth.orientation) < 1e-4);
    }
    Ok(())
}

#[test]
fn test_noisy_ring_fits_within_a_pixel() -> TestResult {
    let (scene, mut system, loaded) = perturbed_ring(80, 5, 0.5, 9)?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(pixel_rmse(&outcome, scene.observations.len()) < 1.0);
    assert!(scene.mean_point_error(&system, &loaded) < 0.05);

    let diagnostics = outcome.diagnostics.as_ref().ok_or("no diagnostics")?;
    assert!(diagnostics.statistics.count >= 2 * scene.observations.len());
    assert!(!diagnostics.largest.is_empty());
    Ok(())
}

#[test]
fn test_dense_and_sparse_backends_agree() -> TestResult {
    let solve_with = |linear_solver| -> Result<_, Box<dyn std::error::Error>> {
        let (scene, mut system, loaded) = perturbed_ring(50, 4, 0.3, 17)?;
        let optimizer = LevenbergMarquardtConfig::new().with_linear_solver(linear_solver);
        let outcome = system.solve(&SystemConfig::new().with_optimizer(optimizer));
        if let Some(error) = outcome.error {
            return Err(error.into());
        }
        let positions: Vec<_> = loaded
            .points
            .iter()
            .map(|key| system.point(*key).and_then(|p| p.optimized))
            .collect();
        Ok((pixel_rmse(&outcome, scene.observations.len()), positions))
    };

    let (dense_rmse, dense) = solve_with(LinearSolverType::DenseCholesky)?;
    let (sparse_rmse, sparse) = solve_with(LinearSolverType::SparseConjugateGradient)?;

    assert!((dense_rmse - sparse_rmse).abs() < 1e-3);
    for (a, b) in dense.iter().zip(&sparse) {
        let (a, b) = (a.ok_or("dense point unsolved")?, b.ok_or("sparse point unsolved")?);
        assert!((a - b).norm() < 1e-3);
    }
    Ok(())
}

#[test]
fn test_huber_loss_resists_outliers() -> TestResult {
    let (scene, mut plain, plain_loaded, _) = ring_with_outliers(25, 40.0)?;
    let plain_outcome = plain.solve(&SystemConfig::default());
    assert!(plain_outcome.error.is_none(), "{:?}", plain_outcome.error);
    let plain_error = scene.mean_point_error(&plain, &plain_loaded);

    let (scene, mut robust, robust_loaded, outliers) = ring_with_outliers(25, 40.0)?;
    let config = SystemConfig::default().with_observation_loss(LossKind::Huber { scale: 2.0 });
    let robust_outcome = robust.solve(&config);
    assert!(robust_outcome.error.is_none(), "{:?}", robust_outcome.error);
    let robust_error = scene.mean_point_error(&robust, &robust_loaded);

    assert!(robust_error < plain_error, "{robust_error} vs {plain_error}");

    // The worst residual after a robust fit belongs to a corrupted pixel
    let diagnostics = robust_outcome.diagnostics.as_ref().ok_or("no diagnostics")?;
    let worst = diagnostics.largest.first().ok_or("no residuals")?;
    match worst.tag.owner {
        ResidualOwner::Observation(key) => assert!(outliers.contains(&key)),
        other => panic!("largest residual owned by {other}"),
    }
    Ok(())
}

#[test]
fn test_locked_cameras_are_untouched() -> TestResult {
    let (scene, mut system, loaded) = perturbed_ring(40, 4, 0.5, 3)?;
    let before: Vec<_> = loaded.cameras[..2]
        .iter()
        .map(|key| camera(&system, *key).clone())
        .collect();

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none());

    for (key, original) in loaded.cameras[..2].iter().zip(&before) {
        let after = camera(&system, *key);
        assert_eq!(after.position, original.position);
        assert_eq!(after.orientation, original.orientation);
    }
    assert_eq!(scene.cameras.len(), 4);
    Ok(())
}
