//! Analytic residual providers.
//!
//! Every provider produces one scalar residual together with its gradient with
//! respect to the few variables it touches. Nothing here ever forms a full
//! Jacobian row: the optimizer scatters each gradient into the normal equations
//! through the provider's [`ResidualProvider::indices`].
//!
//! # Module Structure
//!
//! - `geometry`: distances, line directions, collinearity, angles, coplanarity,
//!   fixed points, equal distances/angles, regularization
//! - `reprojection`: pixel residuals of observations
//! - `priors`: quaternion unit norm, focal length prior, vanishing directions
//! - `robust`: folding a robust loss into a scalar residual
//!
//! # Operands
//!
//! Providers read their inputs through [`Operand`]s bound by an [`OperandSet`].
//! A free scalar becomes `Var` (its global index plus its position in the
//! provider's gradient), a fixed scalar becomes `Const`. Binding deduplicates
//! indices, so a point referenced twice by one provider contributes a single
//! gradient entry.

use crate::core::entities::{CameraKey, ConstraintKey, LineKey, ObservationKey, PointKey};
use crate::core::layout::{PointSlots, Slot};
use nalgebra::Vector3;
use std::fmt;

pub mod geometry;
pub mod priors;
pub mod reprojection;
pub mod robust;

pub use geometry::{
    AngleDifferenceResidual, AngleResidual, AxisDeltaResidual, CollinearResidual,
    CoplanarResidual, DistanceDifferenceResidual, DistanceResidual, FixedPointResidual,
    RegularizationResidual,
};
pub use priors::{FocalPriorResidual, QuaternionNormResidual, VanishingPointResidual};
pub use reprojection::ReprojectionResidual;

/// Line length residuals are multiplied by this so their magnitude is comparable
/// to pixel-space reprojection residuals
pub const LINE_LENGTH_SCALE: f64 = 100.0;

/// Residual reported by a reprojection whose point is behind its camera
pub const BEHIND_CAMERA_PENALTY: f64 = 1e3;

/// Entity a residual is attributed to in post-solve diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidualOwner {
    Point(PointKey),
    Camera(CameraKey),
    Line(LineKey),
    Observation(ObservationKey),
    Constraint(ConstraintKey),
}

impl fmt::Display for ResidualOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidualOwner::Point(key) => write!(f, "point {key:?}"),
            ResidualOwner::Camera(key) => write!(f, "camera {key:?}"),
            ResidualOwner::Line(key) => write!(f, "line {key:?}"),
            ResidualOwner::Observation(key) => write!(f, "observation {key:?}"),
            ResidualOwner::Constraint(key) => write!(f, "constraint {key:?}"),
        }
    }
}

/// Owner plus the position of this residual among the owner's residuals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResidualTag {
    pub owner: ResidualOwner,
    pub slot: usize,
}

impl ResidualTag {
    pub fn new(owner: ResidualOwner, slot: usize) -> Self {
        Self { owner, slot }
    }
}

/// A scalar residual with an analytic gradient.
pub trait ResidualProvider: fmt::Debug + Send + Sync {
    /// Global variable indices, aligned with [`ResidualProvider::gradient`]
    fn indices(&self) -> &[usize];

    fn residual(&self, vars: &[f64]) -> f64;

    /// Partial derivatives with respect to [`ResidualProvider::indices`]
    fn gradient(&self, vars: &[f64]) -> Vec<f64>;

    /// Residual and gradient together; override when they share work
    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        (self.residual(vars), self.gradient(vars))
    }

    fn tag(&self) -> ResidualTag;

    fn owner(&self) -> ResidualOwner {
        self.tag().owner
    }

    /// Short name of the residual kind, used in diagnostics
    fn kind(&self) -> &'static str;
}

/// A scalar input of a provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Var { local: usize, global: usize },
    Const(f64),
}

impl Operand {
    #[inline]
    pub fn value(&self, vars: &[f64]) -> f64 {
        match *self {
            Operand::Var { global, .. } => vars[global],
            Operand::Const(value) => value,
        }
    }

    /// Add `derivative` to this operand's gradient entry, if it is a variable
    #[inline]
    pub fn accumulate(&self, gradient: &mut [f64], derivative: f64) {
        if let Operand::Var { local, .. } = *self {
            gradient[local] += derivative;
        }
    }
}

/// Three operands forming a 3D vector
pub type Operand3 = [Operand; 3];

#[inline]
pub fn read3(ops: &Operand3, vars: &[f64]) -> Vector3<f64> {
    Vector3::new(ops[0].value(vars), ops[1].value(vars), ops[2].value(vars))
}

#[inline]
pub fn accumulate3(ops: &Operand3, gradient: &mut [f64], derivative: &Vector3<f64>) {
    for (op, d) in ops.iter().zip(derivative.iter()) {
        op.accumulate(gradient, *d);
    }
}

/// Binds layout slots to operands, collecting unique free indices.
#[derive(Debug, Clone, Default)]
pub struct OperandSet {
    indices: Vec<usize>,
}

impl OperandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, slot: Slot) -> Operand {
        match slot {
            Slot::Fixed(value) => Operand::Const(value),
            Slot::Free(global) => {
                let local = match self.indices.iter().position(|&i| i == global) {
                    Some(local) => local,
                    None => {
                        self.indices.push(global);
                        self.indices.len() - 1
                    }
                };
                Operand::Var { local, global }
            }
        }
    }

    pub fn bind_point(&mut self, slots: &PointSlots) -> Operand3 {
        slots.0.map(|slot| self.bind(slot))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn into_indices(self) -> Vec<usize> {
        self.indices
    }
}

/// Central-difference gradient, for tests of the analytic gradients
#[cfg(test)]
pub(crate) fn numeric_gradient(provider: &dyn ResidualProvider, vars: &[f64]) -> Vec<f64> {
    let eps = 1e-6;
    provider
        .indices()
        .iter()
        .map(|&index| {
            let mut plus = vars.to_vec();
            let mut minus = vars.to_vec();
            plus[index] += eps;
            minus[index] -= eps;
            (provider.residual(&plus) - provider.residual(&minus)) / (2.0 * eps)
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn assert_gradient_matches(provider: &dyn ResidualProvider, vars: &[f64], tolerance: f64) {
    let analytic = provider.gradient(vars);
    let numeric = numeric_gradient(provider, vars);
    assert_eq!(analytic.len(), provider.indices().len());
    for (i, (a, n)) in analytic.iter().zip(numeric.iter()).enumerate() {
        let scale = 1.0 + n.abs();
        assert!(
            (a - n).abs() < tolerance * scale,
            "{} gradient entry {} mismatch: analytic {} vs numeric {}",
            provider.kind(),
            i,
            a,
            n
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_set_deduplicates() {
        let mut set = OperandSet::new();
        let a = set.bind(Slot::Free(7));
        let b = set.bind(Slot::Fixed(2.0));
        let c = set.bind(Slot::Free(3));
        let d = set.bind(Slot::Free(7));
        assert_eq!(a, Operand::Var { local: 0, global: 7 });
        assert_eq!(b, Operand::Const(2.0));
        assert_eq!(c, Operand::Var { local: 1, global: 3 });
        assert_eq!(d, a);
        assert_eq!(set.into_indices(), vec![7, 3]);
    }

    #[test]
    fn test_operand_accumulate() {
        let mut gradient = vec![0.0; 2];
        Operand::Var { local: 1, global: 0 }.accumulate(&mut gradient, 2.0);
        Operand::Const(5.0).accumulate(&mut gradient, 9.0);
        Operand::Var { local: 1, global: 0 }.accumulate(&mut gradient, 0.5);
        assert_eq!(gradient, vec![0.0, 2.5]);
    }
}
