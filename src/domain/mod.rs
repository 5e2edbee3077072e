//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - the parameter vector and its named slots (`Params`, `Param`, `Sign`)
//! - fit outputs (`FitResult`, `ReferenceFit`, `FitChange`)
//! - scan input records (`RawSample`, `RawScan`) and export rows

pub mod types;

pub use types::*;
