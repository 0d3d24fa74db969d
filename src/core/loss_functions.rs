//! Robust loss functions for reprojection residuals.
//!
//! With a robust loss ρ the contribution of a residual `r` to the cost becomes
//! `ρ(r²)` instead of `r²`. The residual providers stay scalar, so the loss is
//! folded into them: the corrected residual is `r' = sign(r)·√ρ(r²)` and its
//! gradient is scaled by `ρ'(r²)·r / r'`. Squaring `r'` reproduces the robust cost
//! exactly, which keeps the Levenberg-Marquardt acceptance test consistent.
//!
//! # Available Loss Functions
//!
//! - [`HuberLoss`]: Quadratic for inliers, linear for outliers
//! - [`CauchyLoss`]: Heavier suppression of large residuals
//!
//! # Example
//!
//! ```
//! use rotera_solver::core::loss_functions::{HuberLoss, Loss};
//!
//! let huber = HuberLoss::new(2.0).unwrap();
//! let [rho, rho_prime, _] = huber.evaluate(1.0);
//! assert_eq!(rho, 1.0);
//! assert_eq!(rho_prime, 1.0);
//! ```

use crate::error::{RoteraResult, SolverError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Robust cost applied to a squared residual.
///
/// `evaluate(s)` returns `[ρ(s), ρ'(s), ρ''(s)]`. Implementations satisfy
/// ρ(0) = 0 and ρ'(0) = 1, so small residuals behave like plain least squares.
pub trait Loss: Send + Sync + fmt::Debug {
    fn evaluate(&self, s: f64) -> [f64; 3];
}

/// Huber loss.
///
/// ```text
/// ρ(s) = s              if s ≤ δ²
///        2δ√s − δ²      otherwise
/// ```
#[derive(Debug, Clone)]
pub struct HuberLoss {
    scale: f64,
    scale2: f64,
}

impl HuberLoss {
    /// `scale` is the residual magnitude δ where the cost turns linear (pixels for
    /// reprojection residuals).
    pub fn new(scale: f64) -> RoteraResult<Self> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(SolverError::InvalidInput(
                "scale needs to be larger than zero".to_string(),
            ));
        }
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl Loss for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            let r = s.sqrt();
            let rho1 = self.scale / r;
            [2.0 * self.scale * r - self.scale2, rho1, -rho1 / (2.0 * s)]
        } else {
            [s, 1.0, 0.0]
        }
    }
}

/// Cauchy (Lorentzian) loss.
///
/// ```text
/// ρ(s)   = δ² · ln(1 + s/δ²)
/// ρ'(s)  = 1 / (1 + s/δ²)
/// ρ''(s) = −1 / (δ² · (1 + s/δ²)²)
/// ```
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    scale2: f64,
    c: f64,
}

impl CauchyLoss {
    pub fn new(scale: f64) -> RoteraResult<Self> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(SolverError::InvalidInput(
                "scale needs to be larger than zero".to_string(),
            ));
        }
        let scale2 = scale * scale;
        Ok(CauchyLoss {
            scale2,
            c: 1.0 / scale2,
        })
    }
}

impl Loss for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        let sum = 1.0 + s * self.c;
        let inv = 1.0 / sum;
        [self.scale2 * sum.ln(), inv, -self.c * (inv * inv)]
    }
}

/// Serializable loss selection for the solver configuration
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LossKind {
    /// Plain least squares
    #[default]
    None,
    Huber { scale: f64 },
    Cauchy { scale: f64 },
}

impl LossKind {
    /// Instantiate the loss, `None` for plain least squares
    pub fn build(&self) -> RoteraResult<Option<std::sync::Arc<dyn Loss>>> {
        Ok(match *self {
            LossKind::None => None,
            LossKind::Huber { scale } => Some(std::sync::Arc::new(HuberLoss::new(scale)?)),
            LossKind::Cauchy { scale } => Some(std::sync::Arc::new(CauchyLoss::new(scale)?)),
        })
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossKind::None => write!(f, "none"),
            LossKind::Huber { scale } => write!(f, "huber({scale})"),
            LossKind::Cauchy { scale } => write!(f, "cauchy({scale})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn check_derivative(loss: &dyn Loss, s: f64) {
        let eps = 1e-6;
        let [_, rho1, rho2] = loss.evaluate(s);
        let numeric1 = (loss.evaluate(s + eps)[0] - loss.evaluate(s - eps)[0]) / (2.0 * eps);
        let numeric2 = (loss.evaluate(s + eps)[1] - loss.evaluate(s - eps)[1]) / (2.0 * eps);
        assert!((rho1 - numeric1).abs() < 1e-6, "ρ' at {s}: {rho1} vs {numeric1}");
        assert!((rho2 - numeric2).abs() < 1e-6, "ρ'' at {s}: {rho2} vs {numeric2}");
    }

    #[test]
    fn test_huber_regions() -> TestResult {
        let huber = HuberLoss::new(1.345)?;
        assert_eq!(huber.evaluate(0.5), [0.5, 1.0, 0.0]);
        let [rho, rho1, _] = huber.evaluate(10.0);
        assert!(rho < 10.0);
        assert!(rho1 < 1.0);
        check_derivative(&huber, 10.0);
        Ok(())
    }

    #[test]
    fn test_cauchy_behaves_like_least_squares_near_zero() -> TestResult {
        let cauchy = CauchyLoss::new(2.0)?;
        let [rho, rho1, _] = cauchy.evaluate(1e-8);
        assert!((rho - 1e-8).abs() < 1e-14);
        assert!((rho1 - 1.0).abs() < 1e-8);
        check_derivative(&cauchy, 3.0);
        check_derivative(&cauchy, 100.0);
        Ok(())
    }

    #[test]
    fn test_invalid_scale_rejected() {
        assert!(HuberLoss::new(0.0).is_err());
        assert!(CauchyLoss::new(-1.0).is_err());
        assert!(LossKind::Huber { scale: f64::NAN }.build().is_err());
    }

    #[test]
    fn test_loss_kind_build() -> TestResult {
        assert!(LossKind::None.build()?.is_none());
        let loss = LossKind::Cauchy { scale: 1.0 }.build()?.ok_or("loss expected")?;
        assert!(loss.evaluate(4.0)[0] < 4.0);
        Ok(())
    }
}
