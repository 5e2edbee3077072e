//! Forward model of the magnetometer response.
//!
//! The model is a small pure function so the fitting code can stay agnostic of
//! the instrument geometry.

pub mod model;

pub use model::*;
