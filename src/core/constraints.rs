//! Explicit geometric constraints between world points.
//!
//! The set of variants is closed. Each variant is turned into its residual
//! providers once, when the problem is assembled, so the solve loop never
//! inspects constraint kinds.

use super::entities::PointKey;
use crate::error::{RoteraResult, SolverError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A user-declared relationship between world points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// `‖b − a‖ = distance`
    Distance {
        a: PointKey,
        b: PointKey,
        distance: f64,
    },
    /// Angle `a–vertex–c` equals `radians`
    Angle {
        a: PointKey,
        vertex: PointKey,
        c: PointKey,
        radians: f64,
    },
    /// At least four points on a common plane
    Coplanar { points: Vec<PointKey> },
    /// Point pinned to literal coordinates
    FixedPoint {
        point: PointKey,
        target: Vector3<f64>,
    },
    /// All pair distances equal to each other
    EqualDistances { pairs: Vec<(PointKey, PointKey)> },
    /// All `(a, vertex, c)` angles equal to each other
    EqualAngles {
        triplets: Vec<(PointKey, PointKey, PointKey)>,
    },
    /// At least three points on a common line
    Collinear { points: Vec<PointKey> },
}

impl Constraint {
    pub fn distance(a: PointKey, b: PointKey, distance: f64) -> Self {
        Constraint::Distance { a, b, distance }
    }

    pub fn angle_degrees(a: PointKey, vertex: PointKey, c: PointKey, degrees: f64) -> Self {
        Constraint::Angle {
            a,
            vertex,
            c,
            radians: degrees.to_radians(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Constraint::Distance { .. } => "distance",
            Constraint::Angle { .. } => "angle",
            Constraint::Coplanar { .. } => "coplanar",
            Constraint::FixedPoint { .. } => "fixed_point",
            Constraint::EqualDistances { .. } => "equal_distances",
            Constraint::EqualAngles { .. } => "equal_angles",
            Constraint::Collinear { .. } => "collinear",
        }
    }

    /// Every point referenced, in declaration order (may repeat)
    pub fn points(&self) -> Vec<PointKey> {
        match self {
            Constraint::Distance { a, b, .. } => vec![*a, *b],
            Constraint::Angle { a, vertex, c, .. } => vec![*a, *vertex, *c],
            Constraint::Coplanar { points } | Constraint::Collinear { points } => points.clone(),
            Constraint::FixedPoint { point, .. } => vec![*point],
            Constraint::EqualDistances { pairs } => {
                pairs.iter().flat_map(|&(a, b)| [a, b]).collect()
            }
            Constraint::EqualAngles { triplets } => {
                triplets.iter().flat_map(|&(a, v, c)| [a, v, c]).collect()
            }
        }
    }

    /// Number of scalar residuals this constraint contributes
    pub fn residual_count(&self) -> usize {
        match self {
            Constraint::Distance { .. } | Constraint::Angle { .. } => 1,
            Constraint::Coplanar { points } => points.len().saturating_sub(3),
            Constraint::FixedPoint { .. } => 3,
            Constraint::EqualDistances { pairs } => pairs.len().saturating_sub(1),
            Constraint::EqualAngles { triplets } => triplets.len().saturating_sub(1),
            Constraint::Collinear { points } => 3 * points.len().saturating_sub(2),
        }
    }

    /// Check arity and numeric ranges
    pub fn validate(&self) -> RoteraResult<()> {
        let invalid = |msg: String| Err(SolverError::InvalidInput(msg));
        match self {
            Constraint::Distance { a, b, distance } => {
                if a == b {
                    return invalid("distance constraint needs two distinct points".into());
                }
                if !distance.is_finite() || *distance < 0.0 {
                    return invalid(format!("distance must be non-negative, got {distance}"));
                }
            }
            Constraint::Angle {
                a,
                vertex,
                c,
                radians,
            } => {
                if a == vertex || c == vertex {
                    return invalid("angle arms must differ from the vertex".into());
                }
                if !radians.is_finite() || !(0.0..=std::f64::consts::PI).contains(radians) {
                    return invalid(format!("angle must lie in [0, π], got {radians}"));
                }
            }
            Constraint::Coplanar { points } => {
                if points.len() < 4 {
                    return invalid(format!(
                        "coplanar constraint needs at least 4 points, got {}",
                        points.len()
                    ));
                }
            }
            Constraint::FixedPoint { target, .. } => {
                if !target.iter().all(|v| v.is_finite()) {
                    return invalid("fixed point target must be finite".into());
                }
            }
            Constraint::EqualDistances { pairs } => {
                if pairs.len() < 2 {
                    return invalid("equal distances needs at least 2 pairs".into());
                }
            }
            Constraint::EqualAngles { triplets } => {
                if triplets.len() < 2 {
                    return invalid("equal angles needs at least 2 angles".into());
                }
            }
            Constraint::Collinear { points } => {
                if points.len() < 3 {
                    return invalid(format!(
                        "collinear constraint needs at least 3 points, got {}",
                        points.len()
                    ));
                }
            }
        }
        Ok(())
    }
}
