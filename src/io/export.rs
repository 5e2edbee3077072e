//! Export per-scan results to CSV.
//!
//! One header row (also for an empty sequence), then one row per scan in
//! sequence order. Scans without a fit leave the moment and chi2 cells empty.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::ExportRow;
use crate::error::AppError;

/// Write export rows to any writer.
pub fn write_export<W: Write>(writer: W, rows: &[ExportRow]) -> Result<(), AppError> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer
        .write_record(ExportRow::HEADER)
        .map_err(|e| AppError::new(4, format!("Failed to write export header: {e}")))?;
    for row in rows {
        csv_writer
            .serialize(row)
            .map_err(|e| AppError::new(4, format!("Failed to write export row {}: {e}", row.index)))?;
    }
    csv_writer
        .flush()
        .map_err(|e| AppError::new(4, format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

/// Write export rows to a CSV file.
pub fn write_export_csv(path: &Path, rows: &[ExportRow]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(4, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_export(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, fitted: Option<f64>) -> ExportRow {
        ExportRow {
            index,
            time: 100.0,
            field: 1000.0,
            temperature: 10.1,
            fitted_moment: fitted,
            reference_moment: Some(5e-6),
            delta_temperature: 0.2,
            fitted_chi2: fitted.map(|_| 1e-18),
            reference_chi2: Some(2e-18),
        }
    }

    #[test]
    fn header_and_one_row_per_scan() {
        let mut out = Vec::new();
        write_export(&mut out, &[row(0, Some(5.5e-6)), row(1, None)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Scan index,Time (s),Field (Oe),Temperature (K)"));
        assert!(lines[0].ends_with("Reduced chi2 original"));
        assert!(lines[1].starts_with("0,100"));
        // Unfitted scan: empty moment and chi2 cells.
        assert!(lines[2].contains(",,"));
    }

    #[test]
    fn empty_export_still_has_a_header() {
        let mut out = Vec::new();
        write_export(&mut out, &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec![ExportRow::HEADER.join(",")]);
    }
}
