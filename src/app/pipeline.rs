//! Shared fit pipeline used by the `fit` and `demo` commands.
//!
//! raw scans -> constraint state -> chained load -> corrections -> bulk refits
//!
//! Each input file is its own sequence: scans are never chained across files.
//!
//! The commands only differ in where the raw scans come from and can focus on
//! presentation.

use std::path::{Path, PathBuf};

use crate::constraints::ConstraintState;
use crate::domain::{FitConfig, Param, RawScan};
use crate::error::AppError;
use crate::fit::ScanSequence;
use crate::io::{RowError, load_rso};

/// Raw scans of one input file.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub scans: Vec<RawScan>,
    pub rows_read: usize,
    pub row_errors: usize,
}

/// Read and group the data section of one input file.
pub fn load_file(path: &Path) -> Result<LoadedFile, AppError> {
    let data = load_rso(path)?;
    report_row_errors(&path.display().to_string(), &data.row_errors);

    let scans = crate::fit::group_by_time(data.samples);
    log::info!("{}: {} scans from {} rows", path.display(), scans.len(), data.rows_read);
    Ok(LoadedFile {
        path: path.to_path_buf(),
        scans,
        rows_read: data.rows_read,
        row_errors: data.row_errors.len(),
    })
}

/// Export target for one of `files` inputs.
///
/// A single input writes to `export` itself; with several inputs each one gets
/// `<export stem>_<input stem>.<export extension>` next to `export`.
pub fn export_path(export: &Path, source: &Path, files: usize) -> PathBuf {
    if files <= 1 {
        return export.to_path_buf();
    }
    let stem = export.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let source_stem = source
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let source_stem = source_stem.split('.').next().unwrap_or_default();
    let mut name = format!("{stem}_{source_stem}");
    if let Some(ext) = export.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    export.with_file_name(name)
}

fn report_row_errors(source: &str, errors: &[RowError]) {
    const SHOWN: usize = 5;
    for e in errors.iter().take(SHOWN) {
        log::warn!("{source}:{}: {}", e.line, e.message);
    }
    if errors.len() > SHOWN {
        log::warn!("{source}: {} more rows skipped", errors.len() - SHOWN);
    }
}

/// Constraint state described by the configuration.
pub fn constraint_state(config: &FitConfig) -> ConstraintState {
    let mut state = ConstraintState::new(config.dependence);
    for param in Param::ALL {
        if let Some(text) = &config.min_bounds[param.index()] {
            state.set_min_text(param, text);
        }
        if let Some(text) = &config.max_bounds[param.index()] {
            state.set_max_text(param, text);
        }
    }
    state
}

/// Load, correct and refit a sequence as the configuration asks.
pub fn run_fit(config: &FitConfig, scans: Vec<RawScan>) -> Result<ScanSequence, AppError> {
    if scans.is_empty() {
        return Err(AppError::new(3, "No scans to fit."));
    }

    let state = constraint_state(config);
    if !state.bounds.is_unbounded() {
        log::info!("Fitting limits:\n{}", state.describe_bounds());
    }

    let mut sequence = ScanSequence::load(scans, state, config.lm.clone())?;

    for c in &config.corrections {
        sequence.correct_offset(c.scan, c.breakpoint, c.slope)?;
    }
    if config.refit_centers {
        sequence.refit_centers(config.sign_lock)?;
    }
    if config.refit_all {
        sequence.refit_all(config.reverse, config.sign_lock)?;
    }
    if config.recompute_original {
        sequence.refit_reference_all()?;
    }
    if let Some(index) = config.detail {
        if sequence.select(index).is_none() {
            return Err(AppError::new(
                2,
                format!("No scan with index {index} (sequence has {}).", sequence.len()),
            ));
        }
    }

    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{demo_shapes, synthetic_sequence};
    use crate::domain::{DependenceMode, OffsetCorrection, Sign};
    use crate::math::LmConfig;

    fn config() -> FitConfig {
        FitConfig {
            files: Vec::new(),
            dependence: DependenceMode::Temperature,
            min_bounds: Default::default(),
            max_bounds: Default::default(),
            lm: LmConfig::default(),
            refit_centers: false,
            refit_all: false,
            reverse: false,
            sign_lock: None,
            recompute_original: false,
            corrections: Vec::new(),
            chi2_bound: 100.0,
            detail: None,
            export: None,
        }
    }

    #[test]
    fn bound_texts_reach_the_constraint_state() {
        let mut cfg = config();
        cfg.min_bounds[Param::Amplitude.index()] = Some("0".to_string());
        cfg.max_bounds[Param::Center.index()] = Some("oops".to_string());
        let state = constraint_state(&cfg);
        assert_eq!(state.bounds.min(Param::Amplitude), Some(0.0));
        assert_eq!(state.bounds.max(Param::Center), None);
    }

    #[test]
    fn several_inputs_export_to_one_file_each() {
        let export = Path::new("out/results.csv");
        assert_eq!(export_path(export, Path::new("data/a.rso.dat"), 1), export);
        assert_eq!(
            export_path(export, Path::new("data/a.rso.dat"), 2),
            Path::new("out/results_a.csv")
        );
        assert_eq!(
            export_path(Path::new("results"), Path::new("b.rso.dat"), 3),
            Path::new("results_b")
        );
    }

    #[test]
    fn files_are_fitted_as_separate_sequences() {
        let dir = std::env::temp_dir().join(format!("sqf-pipeline-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let write = |name: &str, base_time: f64, center: f64| {
            let shapes: Vec<_> = demo_shapes(2)
                .into_iter()
                .enumerate()
                .map(|(k, mut s)| {
                    s.time = base_time + k as f64;
                    s.truth = s.truth.with(Param::Center, center);
                    s
                })
                .collect();
            let scans = synthetic_sequence(&shapes, 20, 1e-9, 11).unwrap();
            let mut text = String::from("[Header]\nINFO,test\n[Data]\n");
            text.push_str(
                "Time,Start Temperature (K),End Temperature (K),Field (Oe),Position (cm),\
                 Long Scaled Response,Long Voltage,Long Demeaned Voltage,Long Demeaned Fit\n",
            );
            for scan in &scans {
                for i in 0..scan.position.len() {
                    text.push_str(&format!(
                        "{},{},{},{},{},{},{},{},{}\n",
                        scan.time,
                        scan.start_temperature,
                        scan.end_temperature,
                        scan.field,
                        scan.position[i],
                        scan.voltage[i],
                        scan.voltage[i],
                        scan.voltage[i],
                        scan.reference_voltage[i]
                    ));
                }
            }
            let path = dir.join(name);
            std::fs::write(&path, text).unwrap();
            path
        };
        let a = write("a.rso.dat", 1000.0, -1.5);
        let b = write("b.rso.dat", 10.0, -2.5);

        let cfg = config();
        for (path, center) in [(a, -1.5), (b, -2.5)] {
            let loaded = load_file(&path).unwrap();
            assert_eq!(loaded.scans.len(), 2);
            let sequence = run_fit(&cfg, loaded.scans).unwrap();
            assert_eq!(sequence.len(), 2);
            for scan in sequence.scans() {
                assert!((scan.best().unwrap().params.center() - center).abs() < 0.01);
            }
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_input_is_a_no_data_error() {
        let err = run_fit(&config(), Vec::new()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn actions_run_in_order() {
        let mut cfg = config();
        cfg.refit_centers = true;
        cfg.refit_all = true;
        cfg.sign_lock = Some(Sign::Positive);
        cfg.recompute_original = true;
        cfg.corrections = vec![OffsetCorrection {
            scan: 0,
            breakpoint: 10,
            slope: None,
        }];
        cfg.detail = Some(1);
        let scans = synthetic_sequence(&demo_shapes(3), 20, 1e-9, 4).unwrap();
        let sequence = run_fit(&cfg, scans).unwrap();
        assert_eq!(sequence.selected_index(), 1);
        assert_eq!(sequence.export_rows().len(), 3);

        cfg.detail = Some(9);
        let scans = synthetic_sequence(&demo_shapes(3), 20, 1e-9, 4).unwrap();
        assert_eq!(run_fit(&cfg, scans).unwrap_err().exit_code(), 2);
    }
}
