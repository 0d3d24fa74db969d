//! Initial camera poses and point positions before bundle adjustment.
//!
//! # Module Structure
//!
//! - `two_view`: relative pose of the best-connected camera pair
//! - `triangulation`: point seeding from posed cameras
//! - `pnp`: resection of the remaining cameras from seeded points

use crate::core::entities::CameraKey;
use crate::core::graph::EntityGraph;
use crate::epipolar::{PoseEstimate, TwoViewConfig};
use crate::error::RoteraResult;
use tracing::{debug, warn};

pub mod pnp;
pub mod triangulation;
pub mod two_view;

pub use pnp::{MIN_PNP_POINTS, ResectedPose, resect, resect_camera};
pub use triangulation::{SeedReport, seed_points, triangulate};
pub use two_view::{best_pair, initialize_pair, shared_correspondences};

/// What the initialization pass did
#[derive(Debug, Clone, Default)]
pub struct InitializationReport {
    /// Relative pose used to bootstrap an unposed scene
    pub two_view: Option<PoseEstimate>,
    /// Cameras posed by resection, in order
    pub resected: Vec<CameraKey>,
    /// Point seeding of the final pass
    pub seeds: SeedReport,
}

fn unposed_observing(graph: &EntityGraph) -> Vec<CameraKey> {
    graph
        .cameras()
        .filter(|(key, camera)| {
            !camera.is_posed() && graph.observations_of(*key).next().is_some()
        })
        .map(|(key, _)| key)
        .collect()
}

/// Resect every unposed camera that can be, reseeding points after each success.
///
/// Returns the first failure for a camera that never became resectable.
fn resect_remaining(
    graph: &mut EntityGraph,
    default_depth: f64,
    report: &mut InitializationReport,
) -> RoteraResult<()> {
    loop {
        let pending = unposed_observing(graph);
        if pending.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        let mut progressed = false;
        for key in pending {
            match resect_camera(graph, key) {
                Ok(pose) => {
                    if let Some(camera) = graph.camera_mut(key) {
                        debug!("Resected camera '{}'", camera.name);
                        camera.position = pose.position;
                        camera.orientation = pose.orientation;
                        camera.pose_initialized = true;
                    }
                    report.resected.push(key);
                    report.seeds = seed_points(graph, default_depth);
                    progressed = true;
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if !progressed {
            return first_error.map_or(Ok(()), Err);
        }
    }
}

/// Pose every camera that has observations and seed every reachable point.
///
/// When no camera has a pose, resection from known points is tried first; if
/// that poses nothing, the camera pair sharing the most points is initialized
/// from its essential matrix.
pub fn initialize(
    graph: &mut EntityGraph,
    config: &TwoViewConfig,
    default_depth: f64,
) -> RoteraResult<InitializationReport> {
    let mut report = InitializationReport::default();
    let any_posed = graph.cameras().any(|(_, camera)| camera.is_posed());

    if !any_posed && graph.camera_count() > 0 {
        // Known world points pin the scale and frame when there are enough of them
        for key in unposed_observing(graph) {
            if let Ok(pose) = resect_camera(graph, key)
                && let Some(camera) = graph.camera_mut(key)
            {
                camera.position = pose.position;
                camera.orientation = pose.orientation;
                camera.pose_initialized = true;
                report.resected.push(key);
            }
        }

        if report.resected.is_empty() {
            let pair = best_pair(graph, |key| {
                graph
                    .camera(key)
                    .is_some_and(|camera| !camera.is_posed())
            });
            match pair {
                Some((first, second, _)) => {
                    report.two_view = Some(initialize_pair(graph, first, second, config)?);
                }
                None => warn!("No camera pair available for two-view initialization"),
            }
        }
    }

    report.seeds = seed_points(graph, default_depth);
    resect_remaining(graph, default_depth, &mut report)?;
    Ok(report)
}
