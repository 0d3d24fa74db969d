//! Pixel residuals of an observation.
//!
//! Each observation yields two providers, one for `u` and one for `v`:
//!
//! ```text
//! r = c · (project(P; C, q, K)[k] − observed[k])
//! ```
//!
//! with confidence `c`. Prediction and Jacobian come from
//! [`crate::camera::project_with_jacobian`], the same code path callers use to
//! display projections. A point at or behind the image plane yields the constant
//! [`BEHIND_CAMERA_PENALTY`] with a zero gradient: the configuration scores badly
//! and the damping loop backs away from it.

use super::robust::{robust_residual, robustify};
use super::{
    BEHIND_CAMERA_PENALTY, Operand, Operand3, OperandSet, ResidualProvider, ResidualTag,
    accumulate3, read3,
};
use crate::camera::{self, CameraIntrinsics, Distortion, ProjectionJacobian};
use crate::core::layout::{CameraSlots, PointSlots};
use crate::core::loss_functions::Loss;
use nalgebra::{Vector2, Vector3};
use std::sync::Arc;

/// Pixel axis of a reprojection residual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelAxis {
    U,
    V,
}

impl PixelAxis {
    fn index(self) -> usize {
        match self {
            PixelAxis::U => 0,
            PixelAxis::V => 1,
        }
    }
}

#[derive(Debug, Clone)]
struct CameraOperands {
    center: Operand3,
    orientation: [Operand; 4],
    focal_length: Operand,
    aspect_ratio: Operand,
    principal_point: [Operand; 2],
    skew: Operand,
}

impl CameraOperands {
    fn bind(set: &mut OperandSet, slots: &CameraSlots) -> Self {
        Self {
            center: slots.position.map(|s| set.bind(s)),
            orientation: slots.orientation.map(|s| set.bind(s)),
            focal_length: set.bind(slots.focal_length),
            aspect_ratio: set.bind(slots.aspect_ratio),
            principal_point: slots.principal_point.map(|s| set.bind(s)),
            skew: set.bind(slots.skew),
        }
    }

    fn orientation(&self, vars: &[f64]) -> [f64; 4] {
        self.orientation.map(|op| op.value(vars))
    }

    fn intrinsics(&self, distortion: Distortion, vars: &[f64]) -> CameraIntrinsics {
        CameraIntrinsics {
            focal_length: self.focal_length.value(vars),
            aspect_ratio: self.aspect_ratio.value(vars),
            principal_point: Vector2::new(
                self.principal_point[0].value(vars),
                self.principal_point[1].value(vars),
            ),
            skew: self.skew.value(vars),
            distortion,
        }
    }
}

/// One pixel coordinate of one observation
#[derive(Debug, Clone)]
pub struct ReprojectionResidual {
    point: Operand3,
    camera: CameraOperands,
    distortion: Distortion,
    observed: f64,
    axis: PixelAxis,
    confidence: f64,
    loss: Option<Arc<dyn Loss>>,
    indices: Vec<usize>,
    tag: ResidualTag,
}

impl ReprojectionResidual {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        point: &PointSlots,
        camera: &CameraSlots,
        distortion: Distortion,
        observed: &Vector2<f64>,
        axis: PixelAxis,
        confidence: f64,
        loss: Option<Arc<dyn Loss>>,
        tag: ResidualTag,
    ) -> Self {
        let mut set = OperandSet::new();
        let point = set.bind_point(point);
        let camera = CameraOperands::bind(&mut set, camera);
        Self {
            point,
            camera,
            distortion,
            observed: observed[axis.index()],
            axis,
            confidence,
            loss,
            indices: set.into_indices(),
            tag,
        }
    }

    /// The `u` and `v` residuals of an observation, slots 0 and 1
    pub fn pair(
        point: &PointSlots,
        camera: &CameraSlots,
        distortion: Distortion,
        observed: &Vector2<f64>,
        confidence: f64,
        loss: Option<Arc<dyn Loss>>,
        owner: super::ResidualOwner,
    ) -> [Self; 2] {
        [PixelAxis::U, PixelAxis::V].map(|axis| {
            Self::new(
                point,
                camera,
                distortion,
                observed,
                axis,
                confidence,
                loss.clone(),
                ResidualTag::new(owner, axis.index()),
            )
        })
    }

    /// Predicted pixel, `None` when the point is not in front of the camera
    pub fn predict(&self, vars: &[f64]) -> Option<Vector2<f64>> {
        camera::project(
            &self.camera.intrinsics(self.distortion, vars),
            &self.camera.orientation(vars),
            &read3(&self.camera.center, vars),
            &read3(&self.point, vars),
        )
    }

    fn scatter(&self, jacobian: &ProjectionJacobian) -> Vec<f64> {
        let row = self.axis.index();
        let mut gradient = vec![0.0; self.indices.len()];
        let d_point: Vector3<f64> = jacobian.point.row(row).transpose();
        accumulate3(&self.point, &mut gradient, &d_point);
        accumulate3(&self.camera.center, &mut gradient, &-d_point);
        for (op, d) in self
            .camera
            .orientation
            .iter()
            .zip(jacobian.quaternion.row(row).iter())
        {
            op.accumulate(&mut gradient, *d);
        }
        self.camera
            .focal_length
            .accumulate(&mut gradient, jacobian.focal_length[row]);
        self.camera
            .aspect_ratio
            .accumulate(&mut gradient, jacobian.aspect_ratio[row]);
        self.camera.skew.accumulate(&mut gradient, jacobian.skew[row]);
        self.camera.principal_point[row].accumulate(&mut gradient, 1.0);

        for g in gradient.iter_mut() {
            *g *= self.confidence;
        }
        gradient
    }
}

impl ResidualProvider for ReprojectionResidual {
    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn residual(&self, vars: &[f64]) -> f64 {
        match self.predict(vars) {
            Some(pixel) => {
                let r = self.confidence * (pixel[self.axis.index()] - self.observed);
                match &self.loss {
                    Some(loss) => robust_residual(loss.as_ref(), r),
                    None => r,
                }
            }
            None => BEHIND_CAMERA_PENALTY,
        }
    }

    fn gradient(&self, vars: &[f64]) -> Vec<f64> {
        self.evaluate(vars).1
    }

    fn evaluate(&self, vars: &[f64]) -> (f64, Vec<f64>) {
        let projected = camera::project_with_jacobian(
            &self.camera.intrinsics(self.distortion, vars),
            &self.camera.orientation(vars),
            &read3(&self.camera.center, vars),
            &read3(&self.point, vars),
        );
        let Some((pixel, jacobian)) = projected else {
            return (BEHIND_CAMERA_PENALTY, vec![0.0; self.indices.len()]);
        };

        let mut residual = self.confidence * (pixel[self.axis.index()] - self.observed);
        let mut gradient = self.scatter(&jacobian);
        if let Some(loss) = &self.loss {
            robustify(loss.as_ref(), &mut residual, &mut gradient);
        }
        (residual, gradient)
    }

    fn tag(&self) -> ResidualTag {
        self.tag
    }

    fn kind(&self) -> &'static str {
        "reprojection"
    }
}
