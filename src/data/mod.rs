//! Data sources that do not come from instrument files.

pub mod synthetic;

pub use synthetic::*;
