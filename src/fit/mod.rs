//! Per-scan fitting and the chained scan sequence.
//!
//! Responsibilities:
//!
//! - decide whether a candidate fit replaces a stored one (`acceptance`)
//! - repair voltage steps before refitting (`offset`)
//! - fit a single scan: default guesses, multi-start, locks (`measurement`)
//! - load, chain and bulk-refit a sequence of scans (`sequence`)

pub mod acceptance;
pub mod measurement;
pub mod offset;
pub mod sequence;

pub use acceptance::*;
pub use measurement::*;
pub use offset::*;
pub use sequence::*;
