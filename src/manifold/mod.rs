//! Rotation representations used by cameras and the solver.
//!
//! Camera orientations live in the optimization vector as four raw quaternion
//! scalars. The solver updates them additively and projects each block back onto
//! the unit sphere after every accepted step, so no tangent-space machinery is
//! needed here: [`quaternion`] provides the value type, the rotation matrix of raw
//! coordinates and its partial derivatives.

pub mod quaternion;

pub use quaternion::{Quaternion, rotation_matrix, rotation_matrix_derivatives};
