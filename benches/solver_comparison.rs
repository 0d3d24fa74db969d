//! Dense versus sparse backend comparison
//!
//! Solves the same seeded ring scenes with the dense Cholesky and the sparse
//! conjugate-gradient linear solvers.
//!
//! ## Usage
//!
//! ```bash
//! cargo bench --bench solver_comparison
//! ```
//!
//! ## Scenes
//!
//! - **small**: 40 points, 4 cameras
//! - **medium**: 150 points, 6 cameras
//!
//! Every camera but the first is free and starts at its true pose, so each
//! iteration exercises the full bundle adjustment Jacobian.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rotera_solver::core::system::{ConstraintSystem, SystemConfig};
use rotera_solver::linalg::LinearSolverType;
use rotera_solver::optimizer::LevenbergMarquardtConfig;
use rotera_solver::synthetic::{CameraSetup, SyntheticScene};
use std::hint::black_box;

struct SceneConfig {
    name: &'static str,
    points: usize,
    cameras: usize,
}

const SCENES: [SceneConfig; 2] = [
    SceneConfig {
        name: "small",
        points: 40,
        cameras: 4,
    },
    SceneConfig {
        name: "medium",
        points: 150,
        cameras: 6,
    },
];

fn solve_once(scene: &SyntheticScene, linear_solver: LinearSolverType) -> f64 {
    let mut system = ConstraintSystem::new();
    if scene.load(&mut system, CameraSetup::FirstLocked).is_err() {
        return f64::NAN;
    }
    let optimizer = LevenbergMarquardtConfig::new()
        .with_max_iterations(20)
        .with_linear_solver(linear_solver);
    let outcome = system.solve(&SystemConfig::new().with_optimizer(optimizer));
    outcome.residual
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_adjustment");
    group.sample_size(10);

    for config in &SCENES {
        let Ok(scene) = SyntheticScene::ring(config.points, config.cameras, 6.0, 7) else {
            continue;
        };
        let scene = scene.with_noise(0.5, 8);

        for (label, solver) in [
            ("dense", LinearSolverType::DenseCholesky),
            ("sparse", LinearSolverType::SparseConjugateGradient),
        ] {
            group.bench_with_input(BenchmarkId::new(label, config.name), &scene, |b, scene| {
                b.iter(|| black_box(solve_once(scene, solver)))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
