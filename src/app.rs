//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - reads raw files (or generates a synthetic sweep)
//! - runs the fit pipeline
//! - prints reports and writes the optional export

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::cli::{Command, DemoArgs, FitArgs, FitOptions};
use crate::domain::{FitConfig, Sign};
use crate::error::AppError;
use crate::fit::ScanSequence;
use crate::math::LmConfig;

pub mod pipeline;

/// Entry point for the `sqf` binary.
pub fn run() -> Result<(), AppError> {
    init_logging();
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Demo(args) => handle_demo(args),
    }
}

/// `info` by default; `RUST_LOG` overrides.
fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).format_timestamp(None).try_init();
}

/// Every file is fitted, reported and exported as its own sequence.
fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args.options, args.files);
    for path in &config.files {
        let loaded = pipeline::load_file(path)?;
        if loaded.row_errors > 0 {
            log::warn!("{}: skipped {}/{} rows", path.display(), loaded.row_errors, loaded.rows_read);
        }
        let sequence = pipeline::run_fit(&config, loaded.scans)?;
        println!("File: {}", path.display());
        let export = config
            .export
            .as_deref()
            .map(|export| pipeline::export_path(export, path, config.files.len()));
        present(&sequence, &config, export.as_deref())?;
    }
    Ok(())
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    if args.scans == 0 {
        return Err(AppError::new(2, "Scan count must be > 0."));
    }
    let config = fit_config_from_args(&args.options, Vec::new());
    let shapes = crate::data::demo_shapes(args.scans);
    let scans = crate::data::synthetic_sequence(&shapes, args.positions, args.noise, args.seed)?;
    let sequence = pipeline::run_fit(&config, scans)?;
    present(&sequence, &config, config.export.as_deref())?;

    // Shapes are generated in temperature order; the sequence is chronological.
    println!("Ground truth vs fitted amplitude:");
    for shape in &shapes {
        let fitted = sequence
            .scans()
            .iter()
            .find(|s| s.time() == shape.time)
            .and_then(|s| s.best())
            .map(|f| f.params.amplitude());
        match fitted {
            Some(a) => println!(
                "  T={:>7.3} K  true {:.4e}  fitted {:.4e}",
                0.5 * (shape.start_temperature + shape.end_temperature),
                shape.truth.amplitude(),
                a
            ),
            None => println!("  time {} not fitted", shape.time),
        }
    }
    Ok(())
}

fn present(sequence: &ScanSequence, config: &FitConfig, export: Option<&Path>) -> Result<(), AppError> {
    println!("{}", crate::report::format_run_summary(sequence, config));
    if config.detail.is_some() {
        println!("{}", crate::report::format_scan_detail(sequence));
    }
    if let Some(path) = export {
        crate::io::write_export_csv(path, &sequence.export_rows())?;
        log::info!("Exported {} scans to {}", sequence.len(), path.display());
    }
    Ok(())
}

pub fn fit_config_from_args(options: &FitOptions, files: Vec<PathBuf>) -> FitConfig {
    FitConfig {
        files,
        dependence: options.dependence,
        min_bounds: [
            options.x1_min.clone(),
            options.x2_min.clone(),
            options.x3_min.clone(),
            options.x4_min.clone(),
        ],
        max_bounds: [
            options.x1_max.clone(),
            options.x2_max.clone(),
            options.x3_max.clone(),
            options.x4_max.clone(),
        ],
        lm: LmConfig {
            max_iterations: options.max_iterations,
            ftol: options.ftol,
            xtol: options.xtol,
            ..LmConfig::default()
        },
        refit_centers: options.refit_centers,
        refit_all: options.refit_all,
        reverse: options.reverse,
        sign_lock: Sign::from_i8(options.sign),
        recompute_original: options.recompute_original,
        corrections: options.corrections.clone(),
        chi2_bound: options.chi2_bound,
        detail: options.detail,
        export: options.export.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::domain::Param;

    #[test]
    fn options_map_onto_the_config() {
        let cli = Cli::try_parse_from([
            "sqf", "demo", "--x3-min", "0", "--x4-max", "-1", "--sign", "1", "--max-iterations", "50",
            "--correct", "0:4",
        ])
        .unwrap();
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        let config = fit_config_from_args(&args.options, Vec::new());
        assert_eq!(config.min_bounds[Param::Amplitude.index()].as_deref(), Some("0"));
        assert_eq!(config.max_bounds[Param::Center.index()].as_deref(), Some("-1"));
        assert_eq!(config.sign_lock, Some(Sign::Positive));
        assert_eq!(config.lm.max_iterations, 50);
        assert_eq!(config.lm.gtol, LmConfig::default().gtol);
        assert_eq!(config.corrections.len(), 1);
    }
}
