//! Multi-view linear triangulation and initial point placement.

use crate::core::entities::{Axis, Camera, PointKey};
use crate::core::graph::EntityGraph;
use crate::linalg::eigen::symmetric_eigen4;
use nalgebra::{Matrix4, Vector2, Vector3, Vector4};
use tracing::debug;

/// Rays closer than this (radians) carry no depth information
const MIN_PARALLAX: f64 = 1e-3;

/// How many points each seeding strategy placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub triangulated: usize,
    /// Placed along a single viewing ray
    pub ray_seeded: usize,
    /// Fully constrained, taken from effective coordinates
    pub constrained: usize,
    /// No posed camera sees the point and it has no known coordinates
    pub unseeded: usize,
}

/// DLT triangulation of one point from posed cameras.
///
/// Returns `None` with fewer than two views, near-parallel rays, or a solution
/// behind any of the cameras.
pub fn triangulate(views: &[(&Camera, Vector2<f64>)]) -> Option<Vector3<f64>> {
    if views.len() < 2 {
        return None;
    }

    let rays: Vec<Vector3<f64>> = views
        .iter()
        .map(|(camera, pixel)| camera.ray_direction(pixel))
        .collect();
    let parallax = rays
        .iter()
        .enumerate()
        .flat_map(|(i, a)| rays[i + 1..].iter().map(move |b| a.angle(b)))
        .fold(0.0_f64, f64::max);
    if parallax < MIN_PARALLAX {
        return None;
    }

    let mut ata = Matrix4::zeros();
    for (camera, pixel) in views {
        let n = camera.intrinsics.normalize_pixel(pixel);
        let r = camera.orientation.to_rotation_matrix();
        let t = -(r * camera.position);
        let row = |i: usize| Vector4::new(r[(i, 0)], r[(i, 1)], r[(i, 2)], t[i]);
        for a in [n.x * row(2) - row(0), n.y * row(2) - row(1)] {
            ata += a * a.transpose();
        }
    }

    let (_, vectors) = symmetric_eigen4(&ata);
    let h = vectors.column(0);
    if h[3].abs() < 1e-12 {
        return None;
    }
    let point = Vector3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);
    let in_front = views.iter().all(|(camera, _)| {
        let p_cam = camera.orientation.to_rotation_matrix() * (point - camera.position);
        p_cam.z > 0.0
    });
    (in_front && point.iter().all(|v| v.is_finite())).then_some(point)
}

/// Give every point without a working estimate an initial position.
///
/// Points seen by two or more posed cameras are triangulated, points seen by
/// one are placed `default_depth` along its ray. Effective coordinates always
/// override the seeded value on their axes.
pub fn seed_points(graph: &mut EntityGraph, default_depth: f64) -> SeedReport {
    let mut report = SeedReport::default();
    let pending: Vec<PointKey> = graph
        .points()
        .filter(|(_, p)| p.optimized.is_none())
        .map(|(key, _)| key)
        .collect();

    for key in pending {
        let Some(point) = graph.point(key) else {
            continue;
        };
        if point.is_fully_constrained() {
            let position = point.best_estimate();
            if let Some(p) = graph.point_mut(key) {
                p.optimized = position;
            }
            report.constrained += 1;
            continue;
        }

        let views: Vec<(&Camera, Vector2<f64>)> = graph
            .observations()
            .filter(|(_, obs)| obs.point == key)
            .filter_map(|(_, obs)| {
                graph
                    .camera(obs.camera)
                    .filter(|camera| camera.is_posed())
                    .map(|camera| (camera, obs.pixel))
            })
            .collect();

        let seed = match triangulate(&views) {
            Some(p) => {
                report.triangulated += 1;
                Some(p)
            }
            None => views.first().map(|(camera, pixel)| {
                report.ray_seeded += 1;
                camera.position + camera.ray_direction(pixel) * default_depth
            }),
        };

        let Some(mut position) = seed else {
            report.unseeded += 1;
            continue;
        };
        if let Some(p) = graph.point_mut(key) {
            for axis in Axis::ALL {
                if let Some(value) = p.effective(axis) {
                    position[axis.index()] = value;
                }
            }
            p.optimized = Some(position);
        }
    }

    debug!(
        "Seeded points: {} triangulated, {} along a ray, {} constrained, {} unseeded",
        report.triangulated, report.ray_seeded, report.constrained, report.unseeded
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::{Observation, WorldPoint};
    use crate::manifold::quaternion::Quaternion;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn camera_at(name: &str, position: Vector3<f64>, yaw: f64) -> Camera {
        let orientation = Quaternion::from_axis_angle(&Vector3::y(), yaw);
        Camera::new(name, 800.0, 640, 480).with_pose(position, orientation)
    }

    #[test]
    fn test_two_view_triangulation() -> TestResult {
        let truth = Vector3::new(0.3, -0.2, 6.0);
        let a = camera_at("a", Vector3::new(-1.0, 0.0, 0.0), 0.1);
        let b = camera_at("b", Vector3::new(1.0, 0.0, 0.0), -0.1);
        let pa = a.project(&truth).ok_or("not visible")?;
        let pb = b.project(&truth).ok_or("not visible")?;
        let point = triangulate(&[(&a, pa), (&b, pb)]).ok_or("no solution")?;
        assert!((point - truth).norm() < 1e-8);
        Ok(())
    }

    #[test]
    fn test_parallel_rays_rejected() -> TestResult {
        let a = camera_at("a", Vector3::zeros(), 0.0);
        let b = camera_at("b", Vector3::new(1e-6, 0.0, 0.0), 0.0);
        let truth = Vector3::new(0.0, 0.0, 50.0);
        let pa = a.project(&truth).ok_or("not visible")?;
        let pb = b.project(&truth).ok_or("not visible")?;
        assert!(triangulate(&[(&a, pa), (&b, pb)]).is_none());
        assert!(triangulate(&[(&a, pa)]).is_none());
        Ok(())
    }

    #[test]
    fn test_seed_points_strategies() -> TestResult {
        let mut graph = EntityGraph::new();
        let a = graph.add_camera(camera_at("a", Vector3::new(-1.0, 0.0, 0.0), 0.1))?;
        let b = graph.add_camera(camera_at("b", Vector3::new(1.0, 0.0, 0.0), -0.1))?;
        let unposed = graph.add_camera(Camera::new("c", 800.0, 640, 480))?;

        let truth = Vector3::new(0.2, 0.1, 5.0);
        let both = graph.add_point(WorldPoint::new("both"));
        let single = graph.add_point(WorldPoint::new("single").with_locked_axis(Axis::Y, 0.0));
        let orphan = graph.add_point(WorldPoint::new("orphan"));
        let anchor = graph.add_point(WorldPoint::locked("anchor", Vector3::new(1.0, 2.0, 3.0)));

        let pa = graph.camera(a).and_then(|c| c.project(&truth)).ok_or("a")?;
        let pb = graph.camera(b).and_then(|c| c.project(&truth)).ok_or("b")?;
        graph.add_observation(Observation::new(both, a, pa.x, pa.y))?;
        graph.add_observation(Observation::new(both, b, pb.x, pb.y))?;
        graph.add_observation(Observation::new(single, a, 320.0, 100.0))?;
        graph.add_observation(Observation::new(orphan, unposed, 320.0, 240.0))?;

        let report = seed_points(&mut graph, 10.0);
        assert_eq!(
            report,
            SeedReport {
                triangulated: 1,
                ray_seeded: 1,
                constrained: 1,
                unseeded: 1
            }
        );

        let seeded = graph.point(both).and_then(|p| p.optimized).ok_or("both")?;
        assert!((seeded - truth).norm() < 1e-8);
        let seeded = graph.point(single).and_then(|p| p.optimized).ok_or("single")?;
        assert_eq!(seeded.y, 0.0);
        assert!(seeded.z > 0.0);
        assert!(graph.point(orphan).and_then(|p| p.optimized).is_none());
        assert_eq!(
            graph.point(anchor).and_then(|p| p.optimized),
            Some(Vector3::new(1.0, 2.0, 3.0))
        );
        Ok(())
    }
}
