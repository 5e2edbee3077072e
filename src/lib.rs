//! `squid-fit` library crate.
//!
//! The binary (`sqf`) is a thin wrapper around this library so that:
//!
//! - the fitting engine is testable without spawning processes
//! - front-ends (CLI today, an interactive viewer later) share one engine
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod constraints;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
