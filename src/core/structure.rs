//! Observability of a solved problem.
//!
//! Looks at the dense Jacobian at the final variable vector: numerical rank and
//! conditioning, directions the residuals cannot see, and the resulting
//! per-point standard deviations. Scene-level degeneracies (too few cameras or
//! points, no gauge anchor) are reported alongside.
//!
//! Everything here is dense and `O(n³)` in the number of free scalars, so it
//! runs only when requested through the system configuration.

use super::entities::{CameraKey, PointKey};
use super::graph::EntityGraph;
use super::layout::{Slot, VariableLayout};
use super::problem::Problem;
use crate::factors::ResidualOwner;
use nalgebra::{DMatrix, Vector3};
use std::collections::HashMap;
use std::fmt;

/// Singular values below this fraction of the largest count as zero
pub const RANK_TOLERANCE: f64 = 1e-6;
/// Share of a nullspace basis an entity must carry to be reported
pub const NULLSPACE_PARTICIPATION: f64 = 0.1;
/// Diagonal loading of `JᵀJ` before inversion
pub const COVARIANCE_REGULARIZATION: f64 = 1e-6;
pub const ILL_CONDITIONED: f64 = 1e12;
pub const MIN_CAMERAS: usize = 2;
pub const MIN_POINTS: usize = 3;

/// Rank analysis of a Jacobian
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianRank {
    pub rows: usize,
    pub cols: usize,
    pub rank: usize,
    /// Rank equals `min(rows, cols)`
    pub full_rank: bool,
    /// Largest over smallest singular value; infinite when the smallest is zero
    pub condition_number: f64,
    /// Descending, `min(rows, cols)` of them
    pub singular_values: Vec<f64>,
    /// Free scalars minus rank
    pub nullspace_dimension: usize,
}

impl JacobianRank {
    pub fn analyze(jacobian: &DMatrix<f64>, tolerance: f64) -> Self {
        Self::decompose(jacobian, tolerance).0
    }

    /// Rank analysis plus an orthonormal basis of the nullspace, one column per direction
    fn decompose(jacobian: &DMatrix<f64>, tolerance: f64) -> (Self, DMatrix<f64>) {
        let (rows, cols) = jacobian.shape();
        if rows == 0 || cols == 0 {
            let rank = Self {
                rows,
                cols,
                rank: 0,
                full_rank: true,
                condition_number: 1.0,
                singular_values: Vec::new(),
                nullspace_dimension: cols,
            };
            return (rank, DMatrix::identity(cols, cols));
        }

        // Thin SVD only yields min(m, n) right singular vectors; pad to square
        // so the whole nullspace is available
        let padded = if rows < cols {
            let mut padded = DMatrix::zeros(cols, cols);
            padded.rows_mut(0, rows).copy_from(jacobian);
            padded
        } else {
            jacobian.clone()
        };
        let svd = padded.svd(false, true);
        let v_t = svd.v_t.unwrap_or_else(|| DMatrix::identity(cols, cols));

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
        let sorted: Vec<f64> = order.iter().map(|&i| svd.singular_values[i]).collect();

        let largest = sorted.first().copied().unwrap_or(0.0);
        let rank = sorted
            .iter()
            .filter(|&&s| largest > 0.0 && s > tolerance * largest)
            .count();
        let min_dimension = rows.min(cols);
        let singular_values: Vec<f64> = sorted.iter().take(min_dimension).copied().collect();
        let smallest = singular_values.last().copied().unwrap_or(0.0);
        let condition_number = if smallest > 0.0 {
            largest / smallest
        } else {
            f64::INFINITY
        };

        let nullspace_dimension = cols - rank;
        let mut nullspace = DMatrix::zeros(cols, nullspace_dimension);
        for (column, &i) in order.iter().skip(rank).enumerate() {
            nullspace.set_column(column, &v_t.row(i).transpose());
        }

        let analysis = Self {
            rows,
            cols,
            rank,
            full_rank: rank == min_dimension,
            condition_number,
            singular_values,
            nullspace_dimension,
        };
        (analysis, nullspace)
    }
}

/// Block of free scalars an unconstrained direction moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableGroup {
    Point(PointKey),
    CameraPosition(CameraKey),
    CameraOrientation(CameraKey),
    CameraIntrinsics(CameraKey),
}

impl VariableGroup {
    pub fn owner(&self) -> ResidualOwner {
        match *self {
            VariableGroup::Point(key) => ResidualOwner::Point(key),
            VariableGroup::CameraPosition(key)
            | VariableGroup::CameraOrientation(key)
            | VariableGroup::CameraIntrinsics(key) => ResidualOwner::Camera(key),
        }
    }
}

impl fmt::Display for VariableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableGroup::Point(key) => write!(f, "point {key:?}"),
            VariableGroup::CameraPosition(key) => write!(f, "camera {key:?} position"),
            VariableGroup::CameraOrientation(key) => write!(f, "camera {key:?} orientation"),
            VariableGroup::CameraIntrinsics(key) => write!(f, "camera {key:?} intrinsics"),
        }
    }
}

/// A variable group with a significant share of the nullspace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnconstrainedDof {
    pub group: VariableGroup,
    /// Frobenius norm of the nullspace basis restricted to the group
    pub magnitude: f64,
}

/// Scene-level reasons a solve may be ill-posed
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    TooFewCameras { found: usize },
    TooFewPoints { found: usize },
    /// No locked camera pose and no locked point coordinate
    NoGaugeAnchor,
    RankDeficient { rank: usize, min_dimension: usize },
    IllConditioned { condition_number: f64 },
    UnconstrainedDofs { count: usize },
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degeneracy::TooFewCameras { found } => {
                write!(f, "{found} camera(s), fewer than {MIN_CAMERAS}: scale is undetermined")
            }
            Degeneracy::TooFewPoints { found } => {
                write!(f, "{found} world point(s), fewer than {MIN_POINTS}")
            }
            Degeneracy::NoGaugeAnchor => {
                write!(f, "nothing locked: global position, rotation and scale are free")
            }
            Degeneracy::RankDeficient {
                rank,
                min_dimension,
            } => write!(f, "Jacobian rank {rank} < {min_dimension}"),
            Degeneracy::IllConditioned { condition_number } => {
                write!(f, "Jacobian condition number {condition_number:.2e}")
            }
            Degeneracy::UnconstrainedDofs { count } => {
                write!(f, "{count} unconstrained degrees of freedom")
            }
        }
    }
}

/// Scene checks that need no Jacobian, plus the rank-based ones when given
pub fn detect_degeneracies(graph: &EntityGraph, rank: Option<&JacobianRank>) -> Vec<Degeneracy> {
    let mut found = Vec::new();

    let cameras = graph.camera_count();
    if cameras > 0 && cameras < MIN_CAMERAS {
        found.push(Degeneracy::TooFewCameras { found: cameras });
    }
    let points = graph.point_count();
    if points < MIN_POINTS {
        found.push(Degeneracy::TooFewPoints { found: points });
    }

    let anchored = graph.cameras().any(|(_, camera)| camera.pose_locked)
        || graph
            .points()
            .any(|(_, point)| point.locked.iter().any(Option::is_some));
    if !anchored {
        found.push(Degeneracy::NoGaugeAnchor);
    }

    if let Some(rank) = rank {
        if !rank.full_rank {
            found.push(Degeneracy::RankDeficient {
                rank: rank.rank,
                min_dimension: rank.rows.min(rank.cols),
            });
        }
        if rank.condition_number > ILL_CONDITIONED {
            found.push(Degeneracy::IllConditioned {
                condition_number: rank.condition_number,
            });
        }
        if rank.nullspace_dimension > 0 {
            found.push(Degeneracy::UnconstrainedDofs {
                count: rank.nullspace_dimension,
            });
        }
    }
    found
}

/// Free indices of every variable group in the layout
fn variable_groups(layout: &VariableLayout) -> Vec<(VariableGroup, Vec<usize>)> {
    let free = |slots: &[Slot]| -> Vec<usize> { slots.iter().filter_map(Slot::index).collect() };

    let mut groups = Vec::new();
    for (key, slots) in layout.points() {
        groups.push((VariableGroup::Point(key), free(&slots.0)));
    }
    for (key, slots) in layout.cameras() {
        groups.push((VariableGroup::CameraPosition(key), free(&slots.position)));
        groups.push((VariableGroup::CameraOrientation(key), free(&slots.orientation)));
        let intrinsics = [
            slots.focal_length,
            slots.aspect_ratio,
            slots.principal_point[0],
            slots.principal_point[1],
            slots.skew,
        ];
        groups.push((VariableGroup::CameraIntrinsics(key), free(&intrinsics)));
    }
    groups.retain(|(_, indices)| !indices.is_empty());
    groups
}

/// Observability report of one solve
#[derive(Debug, Clone, PartialEq)]
pub struct StructureReport {
    pub rank: JacobianRank,
    /// Variable groups moved by the nullspace, largest share first
    pub unconstrained: Vec<UnconstrainedDof>,
    /// Standard deviation per axis from the regularized `(JᵀJ)⁻¹`; zero on fixed axes
    pub point_uncertainties: HashMap<PointKey, Vector3<f64>>,
    pub degeneracies: Vec<Degeneracy>,
}

impl StructureReport {
    pub fn analyze(
        graph: &EntityGraph,
        layout: &VariableLayout,
        problem: &Problem,
        vars: &[f64],
    ) -> Self {
        let jacobian = problem.jacobian(vars);
        let (rank, nullspace) = JacobianRank::decompose(&jacobian, RANK_TOLERANCE);

        let mut unconstrained: Vec<UnconstrainedDof> = if nullspace.ncols() > 0 {
            variable_groups(layout)
                .into_iter()
                .filter_map(|(group, indices)| {
                    let magnitude = indices
                        .iter()
                        .map(|&i| nullspace.row(i).norm_squared())
                        .sum::<f64>()
                        .sqrt();
                    (magnitude > NULLSPACE_PARTICIPATION).then_some(UnconstrainedDof {
                        group,
                        magnitude,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        unconstrained.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));

        let point_uncertainties = point_uncertainties(&jacobian, layout);
        let degeneracies = detect_degeneracies(graph, Some(&rank));

        Self {
            rank,
            unconstrained,
            point_uncertainties,
            degeneracies,
        }
    }
}

fn point_uncertainties(
    jacobian: &DMatrix<f64>,
    layout: &VariableLayout,
) -> HashMap<PointKey, Vector3<f64>> {
    let n = jacobian.ncols();
    if n == 0 {
        return layout
            .points()
            .map(|(key, _)| (key, Vector3::zeros()))
            .collect();
    }

    let mut information = jacobian.transpose() * jacobian;
    for i in 0..n {
        information[(i, i)] += COVARIANCE_REGULARIZATION;
    }
    let covariance = match information.clone().cholesky() {
        Some(cholesky) => cholesky.inverse(),
        None => match information.pseudo_inverse(f64::EPSILON) {
            Ok(inverse) => inverse,
            Err(_) => return HashMap::new(),
        },
    };

    layout
        .points()
        .map(|(key, slots)| {
            let sigma = slots
                .0
                .map(|slot| slot.index().map_or(0.0, |i| covariance[(i, i)].max(0.0).sqrt()));
            (key, Vector3::from(sigma))
        })
        .collect()
}

impl fmt::Display for StructureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.rank;
        writeln!(f, "=== Structure ===")?;
        writeln!(
            f,
            "Jacobian {}x{}: rank {}, nullspace {}, condition {:.2e}",
            r.rows, r.cols, r.rank, r.nullspace_dimension, r.condition_number
        )?;
        for dof in &self.unconstrained {
            writeln!(f, "  unconstrained {} ({:.3})", dof.group, dof.magnitude)?;
        }
        for degeneracy in &self.degeneracies {
            writeln!(f, "  {degeneracy}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraints::Constraint;
    use crate::core::entities::{Camera, Observation, WorldPoint};
    use crate::core::layout::IntrinsicsMode;
    use crate::core::problem::ProblemSettings;
    use crate::manifold::quaternion::Quaternion;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_rank_of_deficient_matrix() {
        // Third column is the sum of the first two
        #[rustfmt::skip]
        let jacobian = DMatrix::from_row_slice(4, 3, &[
            1.0, 0.0, 1.0,
            0.0, 1.0, 1.0,
            2.0, 1.0, 3.0,
            1.0, 3.0, 4.0,
        ]);
        let rank = JacobianRank::analyze(&jacobian, RANK_TOLERANCE);
        assert_eq!(rank.rank, 2);
        assert!(!rank.full_rank);
        assert_eq!(rank.nullspace_dimension, 1);
        assert_eq!(rank.singular_values.len(), 3);
        assert!(rank.singular_values.windows(2).all(|w| w[0] >= w[1]));
        assert!(rank.condition_number > 1e12);
    }

    #[test]
    fn test_wide_matrix_nullspace() {
        let jacobian = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 2.0]);
        let (rank, nullspace) = JacobianRank::decompose(&jacobian, RANK_TOLERANCE);
        assert_eq!(rank.rank, 1);
        assert!(rank.full_rank);
        assert_eq!(rank.singular_values.len(), 1);
        assert!((rank.singular_values[0] - 3.0).abs() < 1e-12);
        assert_eq!(nullspace.ncols(), 2);
        assert!((&jacobian * &nullspace).norm() < 1e-12);
        assert!((nullspace.transpose() * &nullspace - DMatrix::identity(2, 2)).norm() < 1e-12);
    }

    #[test]
    fn test_empty_jacobian() {
        let rank = JacobianRank::analyze(&DMatrix::zeros(0, 0), RANK_TOLERANCE);
        assert_eq!(rank.rank, 0);
        assert!(rank.full_rank);
        assert_eq!(rank.condition_number, 1.0);
    }

    #[test]
    fn test_distance_only_leaves_point_free() -> TestResult {
        // A single distance pins one of the three free directions of `b`
        let mut graph = EntityGraph::new();
        let a = graph.add_point(WorldPoint::locked("a", Vector3::zeros()));
        let b = graph.add_point(WorldPoint::new("b").with_initial(Vector3::new(2.0, 0.0, 0.0)));
        graph.add_constraint(Constraint::Distance {
            a,
            b,
            distance: 2.0,
        })?;

        let layout = VariableLayout::build(&graph, IntrinsicsMode::Fixed);
        let problem = Problem::assemble(&graph, &layout, &ProblemSettings::default())?;
        let report = StructureReport::analyze(&graph, &layout, &problem, layout.initial_values());

        assert_eq!(report.rank.cols, 3);
        assert_eq!(report.rank.rank, 1);
        assert_eq!(report.rank.nullspace_dimension, 2);
        assert_eq!(report.unconstrained.len(), 1);
        assert_eq!(report.unconstrained[0].group, VariableGroup::Point(b));
        assert!((report.unconstrained[0].magnitude - 2.0_f64.sqrt()).abs() < 1e-9);

        // Along the distance the point is pinned; across it only the loading remains
        let sigma = report.point_uncertainties[&b];
        assert!(sigma.x < 1.0);
        assert!(sigma.y > 100.0 && sigma.z > 100.0);
        assert_eq!(report.point_uncertainties[&a], Vector3::zeros());

        assert!(report.degeneracies.contains(&Degeneracy::TooFewPoints { found: 2 }));
        assert!(report.degeneracies.contains(&Degeneracy::UnconstrainedDofs { count: 2 }));
        assert!(!report.degeneracies.contains(&Degeneracy::NoGaugeAnchor));
        Ok(())
    }

    #[test]
    fn test_scene_degeneracies_without_jacobian() -> TestResult {
        let mut graph = EntityGraph::new();
        let camera = graph.add_camera(
            Camera::new("only", 800.0, 640, 480).with_pose(Vector3::zeros(), Quaternion::identity()),
        )?;
        for i in 0..4 {
            let point = graph.add_point(WorldPoint::new(format!("p{i}")));
            graph.add_observation(Observation::new(point, camera, 320.0 + i as f64, 240.0))?;
        }

        let found = detect_degeneracies(&graph, None);
        assert_eq!(
            found,
            vec![Degeneracy::TooFewCameras { found: 1 }, Degeneracy::NoGaugeAnchor]
        );
        assert!(found[0].to_string().contains("scale"));
        Ok(())
    }
}
