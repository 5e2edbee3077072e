//! Formatted terminal output for a fitted sequence.

use chrono::DateTime;

use crate::domain::{FitConfig, FitResult, FitSlot, Param};
use crate::fit::{Measurement, ScanSequence};

/// Per-scan table plus flagged scans.
pub fn format_run_summary(sequence: &ScanSequence, config: &FitConfig) -> String {
    let mut out = String::new();
    let dependence = sequence.dependence();

    out.push_str("=== sqf - SQUID RSO scan fit ===\n");
    out.push_str(&format!("Scans: {}\n", sequence.len()));
    out.push_str(&format!("Dependence: {}\n", dependence.axis_label()));
    let constraints = sequence.constraints();
    if !constraints.bounds.is_unbounded() {
        out.push_str("Limits:\n");
        for line in constraints.describe_bounds().lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }
    out.push('\n');

    out.push_str(
        format!(
            "{:>4} {:<19} {:>9} {:>10} {:>12} {:>12} {:>10} {:>10}\n",
            "scan", "acquired", "T (K)", "H (Oe)", "m fit (EMU)", "m ref (EMU)", "chi2 fit", "chi2 ref"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<4} {:-<19} {:-<9} {:-<10} {:-<12} {:-<12} {:-<10} {:-<10}\n",
            "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    let bad = sequence.bad_fits(config.chi2_bound);
    for (i, scan) in sequence.scans().iter().enumerate() {
        let cells = result_cells(scan);
        let flag = if bad.contains(&i) { " *" } else { "" };
        out.push_str(&format!(
            "{:>4} {:<19} {:>9.3} {:>10.1} {:>12} {:>12} {:>10} {:>10}{flag}\n",
            i,
            format_timestamp(scan.time()),
            scan.temperature(),
            scan.field(),
            cells[0],
            cells[1],
            cells[2],
            cells[3],
        ));
    }

    if bad.is_empty() {
        out.push_str(&format!("\nAll best fits have chi2 <= {:e}.\n", config.chi2_bound));
    } else {
        out.push_str(&format!(
            "\n* {} scan(s) with best chi2 above {:e}: {:?}\n",
            bad.len(),
            config.chi2_bound,
            bad
        ));
    }

    out
}

/// Parameters, uncertainties and slopes of the selected scan.
pub fn format_scan_detail(sequence: &ScanSequence) -> String {
    let mut out = String::new();
    let index = sequence.selected_index();
    let Some(scan) = sequence.selected() else {
        return out;
    };

    out.push_str(&format!(
        "Scan index {index}, {} = {:.3}\n",
        sequence.dependence().axis_label(),
        scan.dependent()
    ));
    out.push_str(&format!(
        "Acquired {} | T {:.3} K (dT {:.3} K) | H {:.1} Oe | {} samples | scaling {:.5}\n",
        format_timestamp(scan.time()),
        scan.temperature(),
        scan.delta_temperature(),
        scan.field(),
        scan.len(),
        scan.scaling_factor()
    ));

    out.push_str(&format_fit(FitSlot::Best, scan.best()));
    out.push_str(&format_fit(FitSlot::Reference, scan.reference().map(|r| &r.fit)));
    if let Some(reference) = scan.reference() {
        out.push_str(&format!("  chi2 vs observed: {:.3e}\n", reference.observed_chi2));
    }

    out.push_str(&format_slopes(scan));
    out
}

fn format_fit(slot: FitSlot, fit: Option<&FitResult>) -> String {
    let Some(fit) = fit else {
        return format!("{}: none\n", slot.display_name());
    };
    let mut out = format!(
        "{}: moment {:.4e} EMU, chi2 {:.3e}\n",
        slot.display_name(),
        fit.moment(),
        fit.chi2
    );
    let errors = fit.std_errors();
    for param in Param::ALL {
        let value = fit.params.get(param);
        match errors {
            Some(e) => out.push_str(&format!("  {}: {:.4e} +/- {:.1e}\n", param.label(), value, e[param.index()])),
            None => out.push_str(&format!("  {}: {:.4e}\n", param.label(), value)),
        }
    }
    out
}

fn format_slopes(scan: &Measurement) -> String {
    let slopes = scan.slopes();
    let mut out = String::from("dV/dx between samples:\n");
    for (k, s) in slopes.iter().enumerate() {
        out.push_str(&format!("  {k:>3} {s:>12.4e}\n"));
    }
    out
}

/// Fitted moment / reference moment / fitted chi2 / reference chi2 cells.
fn result_cells(scan: &Measurement) -> [String; 4] {
    let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4e}"));
    [
        cell(scan.best_moment()),
        cell(scan.reference_moment()),
        cell(scan.best().map(|f| f.chi2)),
        cell(scan.reference().map(|r| r.observed_chi2)),
    ]
}

/// Acquisition time (seconds since the epoch) as `YYYY-MM-DD HH:MM:SS` UTC.
pub fn format_timestamp(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "-".to_string();
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    match DateTime::from_timestamp(whole as i64, nanos) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{seconds:.1}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintState;
    use crate::data::{demo_shapes, synthetic_sequence};
    use crate::domain::DependenceMode;
    use crate::math::LmConfig;

    fn config(chi2_bound: f64) -> FitConfig {
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
            chi2_bound,
            detail: None,
            export: None,
        }
    }

    fn sequence() -> ScanSequence {
        let raws = synthetic_sequence(&demo_shapes(2), 20, 1e-9, 8).unwrap();
        ScanSequence::load(raws, ConstraintState::default(), LmConfig::default()).unwrap()
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0.0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000.5), "2023-11-14 22:13:20");
        assert_eq!(format_timestamp(f64::NAN), "-");
    }

    #[test]
    fn summary_lists_every_scan_and_flags_bad_fits() {
        let seq = sequence();
        let text = format_run_summary(&seq, &config(100.0));
        assert!(text.contains("Scans: 2"));
        assert!(text.contains("All best fits"));

        let text = format_run_summary(&seq, &config(0.0));
        assert!(text.contains("2 scan(s) with best chi2 above"));
    }

    #[test]
    fn detail_shows_both_fits_and_slopes() {
        let mut seq = sequence();
        seq.select(1);
        let text = format_scan_detail(&seq);
        assert!(text.starts_with("Scan index 1"));
        assert!(text.contains("best fit: moment"));
        assert!(text.contains("reference fit: moment"));
        assert!(text.contains("x4:"));
        let slope_lines = text.lines().skip_while(|l| !l.starts_with("dV/dx")).skip(1).count();
        assert_eq!(slope_lines, 19);
    }
}
