//! Geometric constraint solving and bundle adjustment for image-based scene
//! reconstruction.
//!
//! Callers populate a [`ConstraintSystem`] with world points, cameras, pixel
//! observations, lines and explicit constraints, then call
//! [`ConstraintSystem::solve`]. Unknown camera poses are initialized from
//! two-view geometry or resection, and everything free is refined jointly by
//! Levenberg-Marquardt.

pub mod camera;
pub mod core;
pub mod epipolar;
pub mod error;
pub mod factors;
pub mod initialization;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod synthetic;

pub use crate::core::constraints::Constraint;
pub use crate::core::entities::{
    Axis, Camera, CameraKey, ConstraintKey, Line, LineAlignment, LineKey, Observation,
    ObservationKey, PointKey, VanishingLine, VanishingLineKey, WorldPoint,
};
pub use crate::core::layout::IntrinsicsMode;
pub use crate::core::loss_functions::LossKind;
pub use crate::core::system::{ConstraintSystem, SolveOutcome, SystemConfig};
pub use error::{RoteraResult, SolverError};
pub use logger::{init_logger, init_logger_with_level};
