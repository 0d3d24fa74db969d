//! Two-view initialization from pixels alone
//!
//! Two unposed cameras must be placed from the essential matrix, then refined
//! jointly with the points. The relative pose is compared against ground
//! truth, which is meaningful up to the unknown global frame and scale.

use nalgebra::Vector2;
use rotera_solver::epipolar::{Correspondence, TwoViewConfig, estimate_relative_pose};
use rotera_solver::synthetic::{CameraSetup, SyntheticScene};
use rotera_solver::{ConstraintSystem, SystemConfig};

mod test_utils;
use test_utils::*;

fn scene_correspondences(scene: &SyntheticScene) -> Vec<Correspondence> {
    let mut first = vec![None; scene.points.len()];
    let mut second = vec![None; scene.points.len()];
    for obs in &scene.observations {
        let camera = &scene.cameras[obs.camera];
        let normalized: Vector2<f64> = camera.intrinsics.normalize_pixel(&obs.pixel);
        match obs.camera {
            0 => first[obs.point] = Some(normalized),
            _ => second[obs.point] = Some(normalized),
        }
    }
    first
        .into_iter()
        .zip(second)
        .filter_map(|(a, b)| Some(Correspondence::new(a?, b?)))
        .collect()
}

#[test]
fn test_sampled_estimation_is_reproducible() -> TestResult {
    let scene = SyntheticScene::two_view(40, 1.0, 21)?.with_noise(0.3, 22);
    let correspondences = scene_correspondences(&scene);
    assert!(correspondences.len() > 18);

    let config = TwoViewConfig::default().with_seed(1234);
    let first = estimate_relative_pose(&correspondences, &config)?;
    let second = estimate_relative_pose(&correspondences, &config)?;

    assert!(!first.fallback);
    assert_eq!(first.essential, second.essential);
    assert_eq!(first.pose, second.pose);
    assert_eq!(first.score, second.score);
    assert_eq!(first.candidates, second.candidates);
    Ok(())
}

#[test]
fn test_estimated_pose_matches_truth() -> TestResult {
    let scene = SyntheticScene::two_view(30, 1.0, 5)?;
    let correspondences = scene_correspondences(&scene);
    let estimate = estimate_relative_pose(&correspondences, &TwoViewConfig::default())?;

    let (rotation, direction) = relative_pose(&scene.cameras[0], &scene.cameras[1]);
    let truth_rotation = rotation.to_rotation_matrix();
    assert!((estimate.pose.rotation - truth_rotation).norm() < 1e-6);

    // X₂ = R X₁ + t puts camera 2 at −Rᵀt in camera-1 coordinates
    let center = -(estimate.pose.rotation.transpose() * estimate.pose.translation).normalize();
    assert!((center - direction).norm() < 1e-6);
    Ok(())
}

#[test]
fn test_unposed_pair_solves() -> TestResult {
    let scene = SyntheticScene::two_view(30, 1.0, 8)?;
    let mut system = ConstraintSystem::new();
    let loaded = scene.load(&mut system, CameraSetup::Unposed)?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.converged, "{outcome:?}");
    let report = outcome.initialization.as_ref().ok_or("no initialization")?;
    assert!(report.two_view.is_some());
    assert!(pixel_rmse(&outcome, scene.observations.len()) < 1e-3);

    let (truth_rotation, truth_direction) = relative_pose(&scene.cameras[0], &scene.cameras[1]);
    let (rotation, direction) = relative_pose(
        camera(&system, loaded.cameras[0]),
        camera(&system, loaded.cameras[1]),
    );
    assert!(rotation.angle_to(&truth_rotation) < 1e-4);
    assert!(direction.dot(&truth_direction) > 1.0 - 1e-6);

    for key in &loaded.points {
        assert!(system.point(*key).ok_or("point")?.optimized.is_some());
    }
    Ok(())
}

#[test]
fn test_noisy_unposed_pair_fits_pixels() -> TestResult {
    let scene = SyntheticScene::two_view(40, 1.0, 13)?.with_noise(0.5, 14);
    let mut system = ConstraintSystem::new();
    let loaded = scene.load(&mut system, CameraSetup::Unposed)?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(pixel_rmse(&outcome, scene.observations.len()) < 1.0);

    let (truth_rotation, truth_direction) = relative_pose(&scene.cameras[0], &scene.cameras[1]);
    let (rotation, direction) = relative_pose(
        camera(&system, loaded.cameras[0]),
        camera(&system, loaded.cameras[1]),
    );
    assert!(rotation.angle_to(&truth_rotation) < 0.02);
    assert!(direction.dot(&truth_direction) > 0.99);
    Ok(())
}

#[test]
fn test_too_few_shared_points_is_an_error() -> TestResult {
    let scene = SyntheticScene::two_view(5, 1.0, 3)?;
    let mut system = ConstraintSystem::new();
    let loaded = scene.load(&mut system, CameraSetup::Unposed)?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_some());
    assert!(!outcome.converged);
    // Nothing is written back on a setup failure
    assert!(!camera(&system, loaded.cameras[1]).pose_initialized);
    Ok(())
}
