//! Input/output helpers.
//!
//! - raw `.rso.dat` data section reader (`rso`)
//! - per-scan result export (`export`)

pub mod export;
pub mod rso;

pub use export::*;
pub use rso::*;
