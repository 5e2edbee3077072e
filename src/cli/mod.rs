//! Command-line parsing for the SQUID RSO scan fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code: everything here ends up in a `FitConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::{DEMO_NOISE, DEMO_POSITIONS, DEMO_SEED};
use crate::domain::{DependenceMode, OffsetCorrection};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "sqf", version, about = "SQUID magnetometer RSO scan fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every scan of one or more `.rso.dat` files and print a summary.
    Fit(FitArgs),
    /// Fit a synthetic temperature sweep with known parameters.
    Demo(DemoArgs),
}

/// Options for fitting instrument files.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Raw data files (`.rso.dat`).
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub options: FitOptions,
}

/// Options for the synthetic demo.
#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Number of synthetic scans.
    #[arg(long, default_value_t = 6)]
    pub scans: usize,

    /// Position samples per scan.
    #[arg(long, default_value_t = DEMO_POSITIONS)]
    pub positions: usize,

    /// Standard deviation of the voltage noise.
    #[arg(long, default_value_t = DEMO_NOISE, allow_hyphen_values = true)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = DEMO_SEED)]
    pub seed: u64,

    #[command(flatten)]
    pub options: FitOptions,
}

/// Options shared by `fit` and `demo`.
#[derive(Debug, Args, Clone)]
pub struct FitOptions {
    /// Independent variable of the summary (and fitting order when temperature).
    #[arg(long, value_enum, default_value_t = DependenceMode::Temperature)]
    pub dependence: DependenceMode,

    /// Lower limit for the offset (x1). Malformed values are ignored.
    #[arg(long = "x1-min", allow_hyphen_values = true)]
    pub x1_min: Option<String>,
    /// Upper limit for the offset (x1).
    #[arg(long = "x1-max", allow_hyphen_values = true)]
    pub x1_max: Option<String>,
    /// Lower limit for the drift (x2).
    #[arg(long = "x2-min", allow_hyphen_values = true)]
    pub x2_min: Option<String>,
    /// Upper limit for the drift (x2).
    #[arg(long = "x2-max", allow_hyphen_values = true)]
    pub x2_max: Option<String>,
    /// Lower limit for the amplitude (x3).
    #[arg(long = "x3-min", allow_hyphen_values = true)]
    pub x3_min: Option<String>,
    /// Upper limit for the amplitude (x3).
    #[arg(long = "x3-max", allow_hyphen_values = true)]
    pub x3_max: Option<String>,
    /// Lower limit for the center (x4, cm).
    #[arg(long = "x4-min", allow_hyphen_values = true)]
    pub x4_min: Option<String>,
    /// Upper limit for the center (x4, cm).
    #[arg(long = "x4-max", allow_hyphen_values = true)]
    pub x4_max: Option<String>,

    /// Maximum optimizer steps per fit.
    #[arg(long, default_value_t = 400)]
    pub max_iterations: usize,

    /// Relative SSR reduction below which a fit stops.
    #[arg(long, default_value_t = 1e-12)]
    pub ftol: f64,

    /// Relative step size below which a fit stops.
    #[arg(long, default_value_t = 1e-10)]
    pub xtol: f64,

    /// Independent multi-start refit of every scan after loading.
    #[arg(long)]
    pub refit_centers: bool,

    /// Chained refit of the whole sequence after loading.
    #[arg(long)]
    pub refit_all: bool,

    /// Run the chained refit from the last scan to the first.
    #[arg(long)]
    pub reverse: bool,

    /// Amplitude sign lock for refits: 1, -1, or 0 for none.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub sign: i8,

    /// Multi-start refit of every reference fit.
    #[arg(long)]
    pub recompute_original: bool,

    /// Offset correction `SCAN:INDEX[:SLOPE]` (repeatable).
    #[arg(long = "correct", value_name = "SCAN:INDEX[:SLOPE]", value_parser = parse_correction)]
    pub corrections: Vec<OffsetCorrection>,

    /// Scans with a best chi2 above this are flagged.
    #[arg(long, default_value_t = 100.0)]
    pub chi2_bound: f64,

    /// Print the full fit detail of this scan index.
    #[arg(long)]
    pub detail: Option<usize>,

    /// Export per-scan results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Parse `SCAN:INDEX[:SLOPE]`.
pub fn parse_correction(text: &str) -> Result<OffsetCorrection, String> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(format!("expected SCAN:INDEX[:SLOPE], got '{text}'"));
    }
    let scan = parts[0]
        .parse::<usize>()
        .map_err(|_| format!("invalid scan index '{}'", parts[0]))?;
    let breakpoint = parts[1]
        .parse::<usize>()
        .map_err(|_| format!("invalid sample index '{}'", parts[1]))?;
    let slope = match parts.get(2) {
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => return Err(format!("invalid slope '{s}'")),
        },
        None => None,
    };
    Ok(OffsetCorrection {
        scan,
        breakpoint,
        slope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_syntax() {
        let c = parse_correction("2:5").unwrap();
        assert_eq!((c.scan, c.breakpoint, c.slope), (2, 5, None));
        let c = parse_correction("0:7:-1.5e-6").unwrap();
        assert_eq!(c.slope, Some(-1.5e-6));
        assert!(parse_correction("3").is_err());
        assert!(parse_correction("a:1").is_err());
        assert!(parse_correction("1:2:nan").is_err());
    }

    #[test]
    fn negative_bounds_and_sign_parse() {
        let cli = Cli::try_parse_from([
            "sqf", "fit", "a.rso.dat", "--x4-min", "-3", "--x4-max", "-1", "--sign", "-1", "--refit-all",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.options.x4_min.as_deref(), Some("-3"));
        assert_eq!(args.options.sign, -1);
        assert!(args.options.refit_all);
        assert_eq!(args.files.len(), 1);
    }

    #[test]
    fn demo_defaults_match_the_synthetic_sweep() {
        let cli = Cli::try_parse_from(["sqf", "demo"]).unwrap();
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.positions, DEMO_POSITIONS);
        assert_eq!(args.noise, DEMO_NOISE);
        assert_eq!(args.seed, DEMO_SEED);

        let cli = Cli::try_parse_from(["sqf", "demo", "--noise", "-1"]).unwrap();
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.noise, -1.0);
    }
}
