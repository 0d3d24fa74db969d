//! End-to-end properties of the solve pipeline
//!
//! Each test builds a small scene through the public API, solves it, and checks
//! an invariant of the result.

use nalgebra::Vector3;
use rotera_solver::core::layout::{IntrinsicsMode, VariableLayout};
use rotera_solver::core::problem::{Problem, ProblemSettings};
use rotera_solver::core::structure::{Degeneracy, VariableGroup};
use rotera_solver::manifold::quaternion::Quaternion;
use rotera_solver::optimizer::{IterationState, ObserverAction};
use rotera_solver::synthetic::look_at;
use rotera_solver::{
    Axis, Camera, Constraint, ConstraintSystem, Observation, SystemConfig, WorldPoint,
};

mod test_utils;
use test_utils::*;

#[test]
fn test_fully_locked_point_matches_locked_coordinates() -> TestResult {
    let mut system = ConstraintSystem::new();
    let locked = Vector3::new(-2.5, 0.125, 9.75);
    let anchor = system.add_point(WorldPoint::locked("anchor", locked));
    let free = system.add_point(WorldPoint::new("free").with_initial(Vector3::new(1.0, 1.0, 1.0)));
    system.add_constraint(Constraint::distance(anchor, free, 2.0))?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none());
    let solved = system.point(anchor).and_then(|p| p.optimized).ok_or("unsolved")?;
    assert!((solved - locked).norm() < 1e-9);
    Ok(())
}

#[test]
fn test_distance_from_perturbed_guess() -> TestResult {
    let target = 4.0;
    let directions = [
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.3, -0.8, 0.5),
        Vector3::new(-0.6, 0.2, 0.7),
    ];
    for direction in directions {
        for factor in [0.5, 0.8, 1.2, 1.5] {
            let mut system = ConstraintSystem::new();
            let anchor = system.add_point(WorldPoint::locked("anchor", Vector3::new(1.0, 2.0, 3.0)));
            let start = Vector3::new(1.0, 2.0, 3.0) + direction.normalize() * target * factor;
            let free = system.add_point(WorldPoint::new("free").with_initial(start));
            system.add_constraint(Constraint::distance(anchor, free, target))?;

            let outcome = system.solve(&SystemConfig::default());
            assert!(outcome.error.is_none(), "{:?}", outcome.error);
            let a = system.point(anchor).and_then(|p| p.optimized).ok_or("anchor")?;
            let b = system.point(free).and_then(|p| p.optimized).ok_or("free")?;
            let distance = (b - a).norm();
            assert!(
                (distance - target).abs() < 1e-2,
                "factor {factor}: distance {distance}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_zero_free_variables() -> TestResult {
    let mut system = ConstraintSystem::new();
    let a = system.add_point(WorldPoint::locked("a", Vector3::zeros()));
    let b = system.add_point(WorldPoint::locked("b", Vector3::new(3.0, 4.0, 0.0)));
    let satisfied = system.add_constraint(Constraint::distance(a, b, 5.0))?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.converged);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.status.is_none());
    assert!(outcome.residual < 1e-12);

    system.remove_constraint(satisfied);
    system.add_constraint(Constraint::distance(a, b, 6.0))?;
    let outcome = system.solve(&SystemConfig::default());
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 0);
    assert!((outcome.residual - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_coplanar_residual_grows_with_displacement() -> TestResult {
    let corners = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(1.0, 1.0, 0.0),
    ];

    let coplanar_residual = |offset: f64| -> Result<f64, Box<dyn std::error::Error>> {
        let mut system = ConstraintSystem::new();
        let keys: Vec<_> = corners
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let position = if i == 3 { c + Vector3::z() * offset } else { *c };
                system.add_point(WorldPoint::new(format!("c{i}")).with_initial(position))
            })
            .collect();
        system.add_constraint(Constraint::Coplanar { points: keys })?;

        let layout = VariableLayout::build(system.graph(), IntrinsicsMode::Fixed);
        let problem = Problem::assemble(system.graph(), &layout, &ProblemSettings::default())?;
        let worst = problem
            .tagged_residuals(layout.initial_values())
            .into_iter()
            .filter(|(_, kind, _)| *kind == "coplanar")
            .map(|(_, _, value)| value.abs())
            .fold(0.0, f64::max);
        Ok(worst)
    };

    assert!(coplanar_residual(0.0)? < 1e-12);
    let mut previous = 0.0;
    for offset in [0.01, 0.1, 0.3, 1.0, 2.0] {
        let residual = coplanar_residual(offset)?;
        assert!(residual > previous, "offset {offset}: {residual} <= {previous}");
        previous = residual;
    }
    Ok(())
}

#[test]
fn test_coplanar_constraint_pulls_point_into_plane() -> TestResult {
    let mut system = ConstraintSystem::new();
    let mut keys = vec![
        system.add_point(WorldPoint::locked("a", Vector3::new(0.0, 0.0, 1.0))),
        system.add_point(WorldPoint::locked("b", Vector3::new(2.0, 0.0, 1.0))),
        system.add_point(WorldPoint::locked("c", Vector3::new(0.0, 2.0, 1.0))),
    ];
    let free = system.add_point(
        WorldPoint::new("d")
            .with_locked_axis(Axis::X, 1.0)
            .with_locked_axis(Axis::Y, 1.0)
            .with_initial(Vector3::new(1.0, 1.0, 3.0)),
    );
    keys.push(free);
    system.add_constraint(Constraint::Coplanar { points: keys })?;

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.converged, "{outcome:?}");
    let z = system.point(free).and_then(|p| p.optimized).ok_or("unsolved")?.z;
    assert!((z - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_stereo_pair_triangulates_center_pixel() -> TestResult {
    let mut system = ConstraintSystem::new();
    let target = Vector3::new(0.0, 0.0, 10.0);
    let mut cameras = Vec::new();
    for (name, x) in [("left", -2.0), ("right", 2.0)] {
        let eye = Vector3::new(x, 0.0, 0.0);
        let camera = Camera::new(name, 1000.0, 1920, 1080)
            .with_pose(eye, look_at(&eye, &target))
            .with_pose_locked(true);
        cameras.push(system.add_camera(camera)?);
    }
    let point = system.add_point(WorldPoint::new("center"));
    for key in &cameras {
        system.add_observation(Observation::new(point, *key, 960.0, 540.0))?;
    }

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let solved = system.point(point).and_then(|p| p.optimized).ok_or("unsolved")?;
    assert!(solved.x.abs() < 1e-6 && solved.y.abs() < 1e-6);
    assert!(solved.z > 5.0);
    assert!(outcome.residual < 2.0);
    Ok(())
}

#[test]
fn test_parallel_stereo_pair_pushes_center_pixel_far() -> TestResult {
    // Identity orientations: both center rays are parallel to +z
    let mut system = ConstraintSystem::new();
    let mut cameras = Vec::new();
    for (name, x) in [("left", -2.0), ("right", 2.0)] {
        let camera = Camera::new(name, 1000.0, 1920, 1080)
            .with_pose(Vector3::new(x, 0.0, 0.0), Quaternion::identity())
            .with_pose_locked(true);
        cameras.push(system.add_camera(camera)?);
    }
    let point = system.add_point(WorldPoint::new("center"));
    for key in &cameras {
        system.add_observation(Observation::new(point, *key, 960.0, 540.0))?;
    }

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let solved = system.point(point).and_then(|p| p.optimized).ok_or("unsolved")?;
    assert!(solved.z > 5.0, "depth {}", solved.z);
    assert!(solved.x.abs() < 1e-2);
    assert!(solved.y.abs() < 1e-6);
    assert!(outcome.residual < 2.0, "residual {}", outcome.residual);
    for key in &cameras {
        assert_eq!(camera(&system, *key).orientation, Quaternion::identity());
    }
    Ok(())
}

#[test]
fn test_locked_camera_without_initial_pose_keeps_its_position() -> TestResult {
    let mut system = ConstraintSystem::new();
    let mut locked = Camera::new("locked", 1000.0, 1920, 1080).with_pose_locked(true);
    locked.position = Vector3::new(0.0, 0.0, -5.0);
    let key = system.add_camera(locked)?;

    let elsewhere = Camera::new("elsewhere", 1000.0, 1920, 1080)
        .with_pose(Vector3::new(0.5, 0.2, -4.0), Quaternion::identity());
    for i in 0..8 {
        let k = i as f64;
        let position = Vector3::new((k * 0.9).sin(), (k * 1.7).cos() * 0.8, 2.0 + 0.4 * k);
        let pixel = elsewhere.project(&position).ok_or("behind camera")?;
        let point = system.add_point(WorldPoint::locked(format!("p{i}"), position));
        system.add_observation(Observation::new(point, key, pixel.x, pixel.y))?;
    }

    let outcome = system.solve(&SystemConfig::default());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(camera(&system, key).position, Vector3::new(0.0, 0.0, -5.0));
    Ok(())
}

#[test]
fn test_quaternions_stay_unit_after_accepted_steps() -> TestResult {
    let (_, mut system, _) = perturbed_ring(25, 4, 0.5, 3)?;
    let blocks = quaternion_blocks(&system);
    assert!(!blocks.is_empty());

    let mut accepted = 0;
    let mut worst: f64 = 0.0;
    let mut observer = |state: &IterationState<'_>| {
        if state.accepted {
            accepted += 1;
            for &start in &blocks {
                let norm = state.parameters[start..start + 4]
                    .iter()
                    .map(|v| v * v)
                    .sum::<f64>()
                    .sqrt();
                worst = worst.max((norm - 1.0).abs());
            }
        }
        ObserverAction::Continue
    };
    let outcome = system.solve_with_observer(&SystemConfig::default(), &mut observer);
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(accepted > 0);
    assert!(worst < 1e-9, "worst quaternion norm deviation {worst}");
    Ok(())
}

#[test]
fn test_structure_analysis_reports_free_directions() -> TestResult {
    let mut system = ConstraintSystem::new();
    let anchor = system.add_point(WorldPoint::locked("anchor", Vector3::new(0.0, 0.0, 0.0)));
    let free = system.add_point(WorldPoint::new("free").with_initial(Vector3::new(1.0, 0.0, 0.0)));
    system.add_constraint(Constraint::distance(anchor, free, 2.0))?;

    let plain = system.solve(&SystemConfig::default());
    assert!(plain.diagnostics.ok_or("diagnostics")?.structure.is_none());

    let outcome = system.solve(&SystemConfig::default().with_structure_analysis(true));
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let structure = outcome
        .diagnostics
        .and_then(|d| d.structure)
        .ok_or("structure")?;
    assert_eq!(structure.rank.cols, 3);
    assert_eq!(structure.rank.rank, 1);
    assert_eq!(structure.rank.nullspace_dimension, 2);
    assert_eq!(structure.unconstrained.len(), 1);
    assert_eq!(structure.unconstrained[0].group, VariableGroup::Point(free));
    assert!(structure.degeneracies.contains(&Degeneracy::UnconstrainedDofs { count: 2 }));
    assert!(!structure.degeneracies.contains(&Degeneracy::NoGaugeAnchor));

    // Only x is observed
    let sigma = structure.point_uncertainties.get(&free).ok_or("sigma")?;
    assert!(sigma.x < 10.0);
    assert!(sigma.y > 100.0 && sigma.z > 100.0);
    assert_eq!(structure.point_uncertainties.get(&anchor), Some(&Vector3::zeros()));
    Ok(())
}
