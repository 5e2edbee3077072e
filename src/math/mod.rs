//! Numerical utilities: the nonlinear least squares solver.

pub mod lm;

pub use lm::*;
