//! Real roots of `a·x³ + b·x² + c·x + d = 0`.
//!
//! The polynomial is depressed with `x = t − b/(3a)` and solved with Cardano's
//! formula or the trigonometric form, depending on the sign of the discriminant.
//! Every root is then polished with a few Newton steps on the original polynomial.
//! A vanishing leading coefficient degrades to the quadratic or linear case.

use std::f64::consts::PI;

const NEWTON_STEPS: usize = 4;
const DUPLICATE_TOLERANCE: f64 = 1e-10;

fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    let scale = a.abs().max(b.abs()).max(c.abs());
    if scale == 0.0 {
        return Vec::new();
    }
    if a.abs() <= 1e-14 * scale {
        if b.abs() <= 1e-14 * scale {
            return Vec::new();
        }
        return vec![-c / b];
    }

    let disc = b * b - 4.0 * a * c;
    if disc < -1e-14 * (b * b).max(1.0) {
        return Vec::new();
    }
    let sqrt_disc = disc.max(0.0).sqrt();
    // Numerically stable pairing of the two roots
    let q = -0.5 * (b + b.signum() * sqrt_disc);
    if q == 0.0 {
        return vec![0.0];
    }
    let mut roots = vec![q / a, c / q];
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() < DUPLICATE_TOLERANCE);
    roots
}

fn polish(a: f64, b: f64, c: f64, d: f64, mut x: f64) -> f64 {
    for _ in 0..NEWTON_STEPS {
        let f = ((a * x + b) * x + c) * x + d;
        let df = (3.0 * a * x + 2.0 * b) * x + c;
        if df.abs() < f64::EPSILON {
            break;
        }
        let next = x - f / df;
        if !next.is_finite() {
            break;
        }
        x = next;
    }
    x
}

/// Real roots sorted ascending, duplicates merged
pub fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let scale = b.abs().max(c.abs()).max(d.abs());
    if a.abs() <= 1e-12 * scale || a == 0.0 {
        return solve_quadratic(b, c, d);
    }

    let bn = b / a;
    let cn = c / a;
    let dn = d / a;

    let shift = bn / 3.0;
    let p = cn - bn * bn / 3.0;
    let q = 2.0 * bn * bn * bn / 27.0 - bn * cn / 3.0 + dn;
    let disc = (q * 0.5) * (q * 0.5) + (p / 3.0).powi(3);

    let magnitude = (q * q).max(p.abs().powi(3)).max(f64::MIN_POSITIVE);
    let mut roots = if disc > 1e-14 * magnitude {
        let sqrt_disc = disc.sqrt();
        let u = (-0.5 * q + sqrt_disc).cbrt();
        let v = (-0.5 * q - sqrt_disc).cbrt();
        vec![u + v - shift]
    } else if disc >= -1e-14 * magnitude {
        if p.abs() <= 1e-14 * magnitude.cbrt() {
            vec![-shift]
        } else {
            vec![3.0 * q / p - shift, -1.5 * q / p - shift]
        }
    } else {
        let r = (-p / 3.0).sqrt();
        let phi = (-0.5 * q / (r * r * r)).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| 2.0 * r * ((phi - 2.0 * PI * k as f64) / 3.0).cos() - shift)
            .collect()
    };

    for root in roots.iter_mut() {
        *root = polish(a, b, c, d, *root);
    }
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() < DUPLICATE_TOLERANCE * (1.0 + y.abs()));
    roots
}
