//! World poses for a camera pair from shared observations.

use crate::core::entities::{CameraKey, PointKey};
use crate::core::graph::EntityGraph;
use crate::epipolar::{Correspondence, PoseEstimate, TwoViewConfig, estimate_relative_pose};
use crate::error::{RoteraResult, SolverError};
use crate::manifold::quaternion::Quaternion;
use nalgebra::Vector3;
use std::collections::HashMap;
use tracing::info;

/// Normalized correspondences of every point observed by both cameras
pub fn shared_correspondences(
    graph: &EntityGraph,
    first: CameraKey,
    second: CameraKey,
) -> Vec<(PointKey, Correspondence)> {
    let (Some(cam1), Some(cam2)) = (graph.camera(first), graph.camera(second)) else {
        return Vec::new();
    };

    let mut in_first = HashMap::new();
    for (_, obs) in graph.observations_of(first) {
        in_first.entry(obs.point).or_insert(obs.pixel);
    }

    let mut shared: Vec<(PointKey, Correspondence)> = Vec::new();
    for (_, obs) in graph.observations_of(second) {
        // Removing keeps only the first observation of a point in the second view
        if let Some(pixel) = in_first.remove(&obs.point) {
            shared.push((
                obs.point,
                Correspondence::new(
                    cam1.intrinsics.normalize_pixel(&pixel),
                    cam2.intrinsics.normalize_pixel(&obs.pixel),
                ),
            ));
        }
    }
    shared
}

/// The pair of distinct cameras sharing the most observed points.
///
/// Only cameras accepted by `eligible` are considered. Ties keep the pair met first.
pub fn best_pair(
    graph: &EntityGraph,
    eligible: impl Fn(CameraKey) -> bool,
) -> Option<(CameraKey, CameraKey, usize)> {
    let cameras: Vec<CameraKey> = graph
        .cameras()
        .map(|(key, _)| key)
        .filter(|&key| eligible(key))
        .collect();

    let mut best: Option<(CameraKey, CameraKey, usize)> = None;
    for (i, &a) in cameras.iter().enumerate() {
        for &b in &cameras[i + 1..] {
            let count = shared_correspondences(graph, a, b).len();
            if best.is_none_or(|(_, _, most)| count > most) {
                best = Some((a, b, count));
            }
        }
    }
    best
}

/// Place `first` at the origin with identity orientation and `second` at the
/// estimated relative pose, `baseline` away.
pub fn initialize_pair(
    graph: &mut EntityGraph,
    first: CameraKey,
    second: CameraKey,
    config: &TwoViewConfig,
) -> RoteraResult<PoseEstimate> {
    let correspondences: Vec<Correspondence> = shared_correspondences(graph, first, second)
        .into_iter()
        .map(|(_, c)| c)
        .collect();
    let estimate = estimate_relative_pose(&correspondences, config)?;

    let rotation = estimate.pose.rotation;
    let direction = -(rotation.transpose() * estimate.pose.translation);
    let center = if direction.norm() > f64::EPSILON {
        direction.normalize() * config.baseline
    } else {
        return Err(SolverError::DegenerateTranslation);
    };

    if let Some(camera) = graph.camera_mut(first) {
        camera.position = Vector3::zeros();
        camera.orientation = Quaternion::identity();
        camera.pose_initialized = true;
    }
    if let Some(camera) = graph.camera_mut(second) {
        camera.position = center;
        camera.orientation = Quaternion::from_rotation_matrix(&rotation);
        camera.pose_initialized = true;
    }

    info!(
        "Two-view initialization from {} correspondences: {} inliers, {} in front{}",
        correspondences.len(),
        estimate.score.inliers,
        estimate.score.cheirality,
        if estimate.fallback { " (direct fallback)" } else { "" }
    );
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::{Camera, Observation, WorldPoint};
    use nalgebra::Rotation3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    type Scene = (EntityGraph, CameraKey, CameraKey, Camera);

    fn stereo_scene(count: usize) -> Result<Scene, Box<dyn std::error::Error>> {
        let mut graph = EntityGraph::new();
        let a = graph.add_camera(Camera::new("a", 1000.0, 1920, 1080))?;
        let b = graph.add_camera(Camera::new("b", 1000.0, 1920, 1080))?;

        let rotation = Rotation3::from_euler_angles(0.02, -0.15, 0.03);
        let truth_b = Camera::new("b", 1000.0, 1920, 1080).with_pose(
            Vector3::new(1.2, 0.3, -0.2),
            Quaternion::from_rotation_matrix(rotation.matrix()),
        );
        let truth_a = Camera::new("a", 1000.0, 1920, 1080)
            .with_pose(Vector3::zeros(), Quaternion::identity());

        for i in 0..count {
            let k = i as f64;
            let p = Vector3::new(
                (k * 0.61).sin() * 2.0,
                (k * 0.83).cos(),
                6.0 + (k * 0.47).sin() * 2.0,
            );
            let key = graph.add_point(WorldPoint::new(format!("p{i}")));
            let pa = truth_a.project(&p).ok_or("behind a")?;
            let pb = truth_b.project(&p).ok_or("behind b")?;
            graph.add_observation(Observation::new(key, a, pa.x, pa.y))?;
            graph.add_observation(Observation::new(key, b, pb.x, pb.y))?;
        }
        Ok((graph, a, b, truth_b))
    }

    #[test]
    fn test_shared_correspondences() -> TestResult {
        let (mut graph, a, b, _) = stereo_scene(9)?;
        let lonely = graph.add_point(WorldPoint::new("lonely"));
        graph.add_observation(Observation::new(lonely, a, 10.0, 10.0))?;
        assert_eq!(shared_correspondences(&graph, a, b).len(), 9);
        let best = best_pair(&graph, |_| true).ok_or("no pair")?;
        assert_eq!(best.2, 9);
        Ok(())
    }

    #[test]
    fn test_initialize_pair_recovers_pose_up_to_scale() -> TestResult {
        let (mut graph, a, b, truth) = stereo_scene(14)?;
        let config = TwoViewConfig::default().with_baseline(2.5);
        initialize_pair(&mut graph, a, b, &config)?;

        let cam_a = graph.camera(a).ok_or("a")?;
        let cam_b = graph.camera(b).ok_or("b")?;
        assert!(cam_a.pose_initialized && cam_b.pose_initialized);
        assert_eq!(cam_a.position, Vector3::zeros());
        assert!((cam_b.position.norm() - 2.5).abs() < 1e-9);
        let direction = cam_b.position.normalize().dot(&truth.position.normalize());
        assert!(direction > 1.0 - 1e-6);
        assert!(cam_b.orientation.angle_to(&truth.orientation) < 1e-5);
        Ok(())
    }

    #[test]
    fn test_initialize_pair_needs_seven_points() -> TestResult {
        let (mut graph, a, b, _) = stereo_scene(5)?;
        let result = initialize_pair(&mut graph, a, b, &TwoViewConfig::default());
        assert!(matches!(
            result,
            Err(SolverError::InsufficientCorrespondences { found: 5, .. })
        ));
        assert!(!graph.camera(a).ok_or("a")?.pose_initialized);
        Ok(())
    }
}
