//! Residuals of geometric relationships between world points.
//!
//! ```text
//! distance         s·(‖b − a‖ − target)
//! axis delta       b[k] − a[k]
//! collinear        ((m − a) × (f − a))[k]
//! angle            acos(clamp(û·ŵ)) − target,  u = a − v, w = c − v
//! coplanar         (p1 − p0)·((p2 − p0) × (p3 − p0)) / (‖p1 − p0‖‖p2 − p0‖‖p3 − p0‖)
//! fixed point      p[k] − target[k]
//! equal distances  d_i − d_0
//! equal angles     θ_i − θ_0
//! regularization   w·(p[k] − p₀[k])
//! ```

use super::{
    Operand, Operand3, OperandSet, ResidualProvider, ResidualTag, accumulate3, read3,
};
use crate::core::entities::Axis;
use crate::core::layout::{PointSlots, Slot};
use nalgebra::Vector3;

/// Edge lengths below this are treated as degenerate
const DEGENERATE_LENGTH: f64 = 1e-12;

/// `acos(clamp(û·ŵ))` with its derivatives with respect to `u` and `w`.
///
/// The gradient vanishes where the angle is not differentiable (collinear or
/// zero-length arms).
fn angle_between(u: &Vector3<f64>, w: &Vector3<f64>) -> (f64, Vector3<f64>, Vector3<f64>) {
    let nu = u.norm();
    let nw = w.norm();
    if nu < DEGENERATE_LENGTH || nw < DEGENERATE_LENGTH {
        return (0.0, Vector3::zeros(), Vector3::zeros());
    }
    let u_hat = u / nu;
    let w_hat = w / nw;
    let cos = u_hat.dot(&w_hat).clamp(-1.0, 1.0);
    let angle = cos.acos();
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    if sin < 1e-9 {
        return (angle, Vector3::zeros(), Vector3::zeros());
    }
    let d_u = -(w_hat - u_hat * cos) / (nu * sin);
    let d_w = -(u_hat - w_hat * cos) / (nw * sin);
    (angle, d_u, d_w)
}

/// Angle at `vertex` with derivatives for `(a, vertex, c)`
fn vertex_angle(
    a: &Vector3<f64>,
    vertex: &Vector3<f64>,
    c: &Vector3<f64>,
) -> (f64, [Vector3<f64>; 3]) {
    let (angle, d_u, d_w) = angle_between(&(a - vertex), &(c - vertex));
    (angle, [d_u, -(d_u + d_w), d_w])
}

/// `‖b − a‖` with its derivative with respect to `b` (negate for `a`)
fn distance_between(a: &Vector3<f64>, b: &Vector3<f64>) -> (f64, Vector3<f64>) {
    let delta = b - a;
    let length = delta.norm();
    if length < DEGENERATE_LENGTH {
        (length, Vector3::zeros())
    } else {
        (length, delta / length)
    }
}

/// Scaled distance between two points
#[derive(Debug, Clone)]
pub struct DistanceResidual {
    a: Operand3,
    b: Operand3,
    target: f64,
    scale: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl DistanceResidual {
    pub fn new(a: &PointSlots, b: &PointSlots, target: f64, scale: f64, tag: ResidualTag) -> Self {
        let mut set = OperandSet::new();
        let a = set.bind_point(a);
        let b = set.bind_point(b);
        Self {
            a,
            b,
            target,
            scale,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for DistanceResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        let (length, _) = distance_between(&read3(&self.a, vars), &read3(&self.b, vars));
        self.scale * (length - self.target)
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let (length, direction) = distance_between(&read3(&self.a, vars), &read3(&self.b, vars));
        let mut gradient = vec![0.0; self.indices.len()];
        accumulate3(&self.b, &mut gradient, &(direction * self.scale));
        accumulate3(&self.a, &mut gradient, &(-direction * self.scale));
        (self.scale * (length - self.target), gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        if self.scale == 1.0 {
            "distance"
        } else {
            "line_length"
        }
    }
}

/// Coordinate difference `b[axis] − a[axis]` of an aligned line
#[derive(Debug, Clone)]
pub struct AxisDeltaResidual {
    a: Operand,
    b: Operand,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl AxisDeltaResidual {
    pub fn new(a: &PointSlots, b: &PointSlots, axis: Axis, tag: ResidualTag) -> Self {
        let mut set = OperandSet::new();
        let a = set.bind(a.axis(axis));
        let b = set.bind(b.axis(axis));
        Self {
            a,
            b,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for AxisDeltaResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.b.value(vars) - self.a.value(vars)
    }

    fn gradient(&self, _vars: &[f64]) -> Vec<f64> {
        let mut gradient = vec![0.0; self.indices.len()];
        self.b.accumulate(&mut gradient, 1.0);
        self.a.accumulate(&mut gradient, -1.0);
        gradient
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "line_direction"
    }
}

/// One component of `(middle − anchor) × (far − anchor)`
#[derive(Debug, Clone)]
pub struct CollinearResidual {
    anchor: Operand3,
    middle: Operand3,
    far: Operand3,
    component: usize,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl CollinearResidual {
    pub fn new(
        anchor: &PointSlots,
        middle: &PointSlots,
        far: &PointSlots,
        component: usize,
        tag: ResidualTag,
    ) -> Self {
        assert!(component < 3, "cross product component {component} out of range");
        let mut set = OperandSet::new();
        let anchor = set.bind_point(anchor);
        let middle = set.bind_point(middle);
        let far = set.bind_point(far);
        Self {
            anchor,
            middle,
            far,
            component,
            indices: set.into_indices(),
            tag,
        }
    }

    /// Three residuals, one per cross-product component, with consecutive slots
    pub fn triple(
        anchor: &PointSlots,
        middle: &PointSlots,
        far: &PointSlots,
        tag: ResidualTag,
    ) -> [Self; 3] {
        [0, 1, 2].map(|k| {
            Self::new(
                anchor,
                middle,
                far,
                k,
                ResidualTag::new(tag.owner, tag.slot + k),
            )
        })
    }
}

impl ResidualProvider for CollinearResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        let a = read3(&self.anchor, vars);
        let u = read3(&self.middle, vars) - a;
        let w = read3(&self.far, vars) - a;
        u.cross(&w)[self.component]
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        let a = read3(&self.anchor, vars);
        let u = read3(&self.middle, vars) - a;
        let w = read3(&self.far, vars) - a;
        let mut e = Vector3::zeros();
        e[self.component] = 1.0;

        // (u × w)·e = u·(w × e) = w·(e × u)
        let d_u = w.cross(&e);
        let d_w = e.cross(&u);
        let mut gradient = vec![0.0; self.indices.len()];
        accumulate3(&self.middle, &mut gradient, &d_u);
        accumulate3(&self.far, &mut gradient, &d_w);
        accumulate3(&self.anchor, &mut gradient, &-(d_u + d_w));
        gradient
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "collinear"
    }
}

/// Angle at a vertex against a target, in radians
#[derive(Debug, Clone)]
pub struct AngleResidual {
    points: [Operand3; 3],
    target: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl AngleResidual {
    pub fn new(
        a: &PointSlots,
        vertex: &PointSlots,
        c: &PointSlots,
        target: f64,
        tag: ResidualTag,
    ) -> Self {
        let mut set = OperandSet::new();
        let points = [a, vertex, c].map(|slots| set.bind_point(slots));
        Self {
            points,
            target,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for AngleResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.evaluate(vars).0
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let [a, v, c] = self.points.map(|ops| read3(&ops, vars));
        let (angle, derivatives) = vertex_angle(&a, &v, &c);
        let mut gradient = vec![0.0; self.indices.len()];
        for (ops, d) in self.points.iter().zip(derivatives.iter()) {
            accumulate3(ops, &mut gradient, d);
        }
        (angle - self.target, gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "angle"
    }
}

/// Difference of two vertex angles, `θ(measured) − θ(reference)`
#[derive(Debug, Clone)]
pub struct AngleDifferenceResidual {
    reference: [Operand3; 3],
    measured: [Operand3; 3],
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl AngleDifferenceResidual {
    pub fn new(
        reference: [&PointSlots; 3],
        measured: [&PointSlots; 3],
        tag: ResidualTag,
    ) -> Self {
        let mut set = OperandSet::new();
        let reference = reference.map(|slots| set.bind_point(slots));
        let measured = measured.map(|slots| set.bind_point(slots));
        Self {
            reference,
            measured,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for AngleDifferenceResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.evaluate(vars).0
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let [a0, v0, c0] = self.reference.map(|ops| read3(&ops, vars));
        let [a1, v1, c1] = self.measured.map(|ops| read3(&ops, vars));
        let (theta0, d0) = vertex_angle(&a0, &v0, &c0);
        let (theta1, d1) = vertex_angle(&a1, &v1, &c1);

        let mut gradient = vec![0.0; self.indices.len()];
        for (ops, d) in self.measured.iter().zip(d1.iter()) {
            accumulate3(ops, &mut gradient, d);
        }
        for (ops, d) in self.reference.iter().zip(d0.iter()) {
            accumulate3(ops, &mut gradient, &-d);
        }
        (theta1 - theta0, gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "equal_angles"
    }
}

/// Difference of two distances, `‖b₁ − a₁‖ − ‖b₀ − a₀‖`
#[derive(Debug, Clone)]
pub struct DistanceDifferenceResidual {
    reference: [Operand3; 2],
    measured: [Operand3; 2],
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl DistanceDifferenceResidual {
    pub fn new(
        reference: [&PointSlots; 2],
        measured: [&PointSlots; 2],
        tag: ResidualTag,
    ) -> Self {
        let mut set = OperandSet::new();
        let reference = reference.map(|slots| set.bind_point(slots));
        let measured = measured.map(|slots| set.bind_point(slots));
        Self {
            reference,
            measured,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for DistanceDifferenceResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.evaluate(vars).0
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let [a0, b0] = self.reference.map(|ops| read3(&ops, vars));
        let [a1, b1] = self.measured.map(|ops| read3(&ops, vars));
        let (d0, dir0) = distance_between(&a0, &b0);
        let (d1, dir1) = distance_between(&a1, &b1);

        let mut gradient = vec![0.0; self.indices.len()];
        accumulate3(&self.measured[1], &mut gradient, &dir1);
        accumulate3(&self.measured[0], &mut gradient, &-dir1);
        accumulate3(&self.reference[1], &mut gradient, &-dir0);
        accumulate3(&self.reference[0], &mut gradient, &dir0);
        (d1 - d0, gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "equal_distances"
    }
}

/// Scalar triple product of an anchor and three further points
#[derive(Debug, Clone)]
pub struct CoplanarResidual {
    points: [Operand3; 4],
    normalize: bool,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl CoplanarResidual {
    pub fn new(points: [&PointSlots; 4], normalize: bool, tag: ResidualTag) -> Self {
        let mut set = OperandSet::new();
        let points = points.map(|slots| set.bind_point(slots));
        Self {
            points,
            normalize,
            indices: set.into_indices(),
            tag,
        }
    }

    /// `n − 3` residuals for `n ≥ 4` points: the anchor `p0` with each window
    /// `(p_{i+1}, p_{i+2}, p_{i+3})` of the remaining points
    pub fn chain(points: &[&PointSlots], normalize: bool, tag: ResidualTag) -> Vec<Self> {
        if points.len() < 4 {
            return Vec::new();
        }
        (0..points.len() - 3)
            .map(|i| {
                Self::new(
                    [points[0], points[i + 1], points[i + 2], points[i + 3]],
                    normalize,
                    ResidualTag::new(tag.owner, tag.slot + i),
                )
            })
            .collect()
    }
}

impl ResidualProvider for CoplanarResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.evaluate(vars).0
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let [p0, p1, p2, p3] = self.points.map(|ops| read3(&ops, vars));
        let edges = [p1 - p0, p2 - p0, p3 - p0];
        let volume = edges[0].dot(&edges[1].cross(&edges[2]));
        let mut d_edges = [
            edges[1].cross(&edges[2]),
            edges[2].cross(&edges[0]),
            edges[0].cross(&edges[1]),
        ];

        let lengths = edges.map(|e| e.norm());
        let scale = lengths[0] * lengths[1] * lengths[2];
        let residual = if self.normalize && scale > DEGENERATE_LENGTH {
            let r = volume / scale;
            for (d, (edge, length)) in d_edges.iter_mut().zip(edges.iter().zip(lengths)) {
                *d = *d / scale - edge * (r / (length * length));
            }
            r
        } else {
            volume
        };

        let mut gradient = vec![0.0; self.indices.len()];
        for (ops, d) in self.points[1..].iter().zip(d_edges.iter()) {
            accumulate3(ops, &mut gradient, d);
        }
        let anchor = -(d_edges[0] + d_edges[1] + d_edges[2]);
        accumulate3(&self.points[0], &mut gradient, &anchor);
        (residual, gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "coplanar"
    }
}

/// One coordinate pinned to a literal value
#[derive(Debug, Clone)]
pub struct FixedPointResidual {
    coordinate: Operand,
    target: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl FixedPointResidual {
    pub fn new(point: &PointSlots, axis: Axis, target: f64, tag: ResidualTag) -> Self {
        let mut set = OperandSet::new();
        let coordinate = set.bind(point.axis(axis));
        Self {
            coordinate,
            target,
            indices: set.into_indices(),
            tag,
        }
    }
}

impl ResidualProvider for FixedPointResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.coordinate.value(vars) - self.target
    }

    fn gradient(&self, _vars: &[f64]) -> Vec<f64> {
        let mut gradient = vec![0.0; self.indices.len()];
        self.coordinate.accumulate(&mut gradient, 1.0);
        gradient
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "fixed_point"
    }
}

/// Weighted drift of a free coordinate from its pre-solve value
#[derive(Debug, Clone)]
pub struct RegularizationResidual {
    coordinate: Operand,
    initial: f64,
    weight: f64,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl RegularizationResidual {
    /// `None` when the coordinate is not free
    pub fn new(slot: Slot, initial: f64, weight: f64, tag: ResidualTag) -> Option<Self> {
        if !slot.is_free() {
            return None;
        }
        let mut set = OperandSet::new();
        let coordinate = set.bind(slot);
        Some(Self {
            coordinate,
            initial,
            weight,
            indices: set.into_indices(),
            tag,
        })
    }
}

impl ResidualProvider for RegularizationResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        self.weight * (self.coordinate.value(vars) - self.initial)
    }

    fn gradient(&self, _vars: &[f64]) -> Vec<f64> {
        vec![self.weight]
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "regularization"
    }
}
