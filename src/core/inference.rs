//! Pre-solve propagation of known coordinates along aligned lines.
//!
//! An axis-aligned line forces every point on it to share the two perpendicular
//! coordinates; a plane-aligned line forces them to share the normal coordinate.
//! Known values are copied to points that lack them until a pass changes nothing.
//!
//! Coordinates along a line's own direction are never derived from its target
//! length: `start + L` and `start − L` are equally consistent with the length.

use super::entities::{Axis, LineKey, PointKey};
use super::graph::EntityGraph;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const MAX_INFERENCE_PASSES: usize = 10;
pub const CONFLICT_TOLERANCE: f64 = 1e-6;

/// Two sources disagree about a coordinate. Advisory only.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConflict {
    pub point: PointKey,
    pub axis: Axis,
    /// Value already held (locked or inferred earlier)
    pub existing: f64,
    /// Value the line would have propagated
    pub proposed: f64,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceReport {
    pub passes: usize,
    /// Number of coordinates inferred beyond the locked ones
    pub inferred: usize,
    pub conflicts: Vec<InferenceConflict>,
}

/// Recompute every point's inferred coordinates from scratch.
pub fn infer_coordinates(graph: &mut EntityGraph) -> InferenceReport {
    for (_, point) in graph.points_mut() {
        point.inferred = point.locked;
    }

    let propagations: Vec<(LineKey, String, Vec<PointKey>, &'static [Axis])> = graph
        .lines()
        .filter(|(_, line)| !line.alignment.shared_axes().is_empty())
        .map(|(key, line)| {
            (
                key,
                format!("line '{}' ({})", line.name, line.alignment),
                line.points().collect(),
                line.alignment.shared_axes(),
            )
        })
        .collect();

    let mut report = InferenceReport::default();
    let mut reported: HashSet<(PointKey, Axis, LineKey)> = HashSet::new();

    while report.passes < MAX_INFERENCE_PASSES {
        report.passes += 1;
        let mut changed = false;

        for (line_key, source, members, axes) in &propagations {
            for &axis in axes.iter() {
                let known = members.iter().find_map(|&key| {
                    graph
                        .point(key)
                        .and_then(|p| p.effective(axis))
                        .map(|value| (key, value))
                });
                let Some((origin, value)) = known else {
                    continue;
                };

                for &key in members {
                    if key == origin {
                        continue;
                    }
                    let Some(point) = graph.point_mut(key) else {
                        continue;
                    };
                    match point.effective(axis) {
                        None => {
                            point.inferred[axis.index()] = Some(value);
                            report.inferred += 1;
                            changed = true;
                        }
                        Some(existing) if (existing - value).abs() > CONFLICT_TOLERANCE => {
                            if reported.insert((key, axis, *line_key)) {
                                report.conflicts.push(InferenceConflict {
                                    point: key,
                                    axis,
                                    existing,
                                    proposed: value,
                                    source: source.clone(),
                                });
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }

    for conflict in &report.conflicts {
        warn!(
            "Inference conflict on {:?} {} axis: kept {:.6}, proposed {:.6} from {}",
            conflict.point, conflict.axis, conflict.existing, conflict.proposed, conflict.source
        );
    }
    debug!(
        "Coordinate inference: {} values in {} passes, {} conflicts",
        report.inferred,
        report.passes,
        report.conflicts.len()
    );

    report
}
