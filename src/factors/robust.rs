//! Folding a robust loss into a scalar residual.
//!
//! A provider that reports `r` with gradient `g` contributes `r²` to the cost.
//! To contribute `ρ(r²)` instead it reports
//!
//! ```text
//! r' = sign(r) · √ρ(r²)
//! g' = ρ'(r²) · r / r' · g
//! ```
//!
//! so that `r'² = ρ(r²)` and `2r'g' = ρ'(r²)·2r·g`, the exact gradient of the
//! robust cost. Near zero the factor tends to `√ρ'(0) = 1`.

use crate::core::loss_functions::Loss;

/// Correct a residual and its gradient in place
pub fn robustify(loss: &dyn Loss, residual: &mut f64, gradient: &mut [f64]) {
    let r = *residual;
    let [rho, rho1, _] = loss.evaluate(r * r);
    let corrected = r.signum() * rho.max(0.0).sqrt();

    let factor = if corrected.abs() > f64::MIN_POSITIVE {
        rho1 * r / corrected
    } else {
        rho1.max(0.0).sqrt()
    };

    *residual = corrected;
    for g in gradient.iter_mut() {
        *g *= factor;
    }
}

/// Corrected residual alone
pub fn robust_residual(loss: &dyn Loss, residual: f64) -> f64 {
    let rho = loss.evaluate(residual * residual)[0];
    residual.signum() * rho.max(0.0).sqrt()
}
