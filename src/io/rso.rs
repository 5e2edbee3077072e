//! Reader for the data section of MPMS `.rso.dat` files.
//!
//! The file starts with a free-form instrument header, then a `[Data]` marker
//! followed by a CSV section with one row per position sample. Files without a
//! marker are assumed to carry a fixed-size header.
//!
//! Design goals:
//! - **Strict schema** for the columns the fitter needs (exit code 2 when missing)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **No fitting logic here**: rows come out flat, grouping happens in `fit`

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::RawSample;
use crate::error::AppError;

/// Header lines skipped when a file has no `[Data]` marker.
pub const DEFAULT_HEADER_LINES: usize = 30;

const DATA_MARKER: &str = "[Data]";

/// Normalised names of the columns the fitter reads.
pub mod columns {
    pub const TIME: &str = "time";
    pub const START_TEMPERATURE: &str = "start_temperature_k";
    pub const END_TEMPERATURE: &str = "end_temperature_k";
    pub const FIELD: &str = "field_oe";
    pub const POSITION: &str = "position_cm";
    pub const SCALED_RESPONSE: &str = "long_scaled_response";
    pub const RAW_VOLTAGE: &str = "long_voltage";
    pub const DEMEANED_VOLTAGE: &str = "long_demeaned_voltage";
    pub const DEMEANED_FIT: &str = "long_demeaned_fit";

    pub const REQUIRED: [&str; 9] = [
        TIME,
        START_TEMPERATURE,
        END_TEMPERATURE,
        FIELD,
        POSITION,
        SCALED_RESPONSE,
        RAW_VOLTAGE,
        DEMEANED_VOLTAGE,
        DEMEANED_FIT,
    ];
}

/// A row that could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based line number in the file.
    pub line: usize,
    pub message: String,
}

/// Parsed data section.
#[derive(Debug, Clone)]
pub struct RsoData {
    pub samples: Vec<RawSample>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Open and read a `.rso.dat` file.
pub fn load_rso(path: &Path) -> Result<RsoData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open data file '{}': {e}", path.display())))?;
    let data = read_rso(file).map_err(|e| AppError::new(e.exit_code(), format!("{}: {e}", path.display())))?;
    if data.samples.is_empty() {
        return Err(AppError::new(3, format!("No usable rows in '{}'.", path.display())));
    }
    Ok(data)
}

/// Read the data section from any reader.
pub fn read_rso<R: Read>(mut reader: R) -> Result<RsoData, AppError> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| AppError::new(2, format!("Failed to read data file: {e}")))?;

    let lines: Vec<&str> = text.lines().collect();
    let header_index = lines
        .iter()
        .position(|l| l.trim() == DATA_MARKER)
        .map_or(DEFAULT_HEADER_LINES, |i| i + 1);
    if header_index >= lines.len() {
        return Err(AppError::new(2, "Data section is missing (no column header row)."));
    }
    let body = lines[header_index..].join("\n");

    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = csv_reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read column headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let missing: Vec<&str> = columns::REQUIRED
        .iter()
        .copied()
        .filter(|c| !header_map.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::new(
            2,
            format!("Missing required columns: {}", missing.join(", ")),
        ));
    }

    let mut samples = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in csv_reader.records().enumerate() {
        // Header row sits on line `header_index + 1`; records follow it.
        let line = header_index + idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map) {
            Ok(sample) => samples.push(sample),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    Ok(RsoData {
        samples,
        row_errors,
        rows_read,
    })
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<RawSample, String> {
    let get = |name: &str| get_f64(record, header_map, name);
    Ok(RawSample {
        time: get(columns::TIME)?,
        start_temperature: get(columns::START_TEMPERATURE)?,
        end_temperature: get(columns::END_TEMPERATURE)?,
        field: get(columns::FIELD)?,
        position: get(columns::POSITION)?,
        scaled_response: get(columns::SCALED_RESPONSE)?,
        raw_voltage: get(columns::RAW_VOLTAGE)?,
        demeaned_voltage: get(columns::DEMEANED_VOLTAGE)?,
        demeaned_fit: get(columns::DEMEANED_FIT)?,
    })
}

fn get_f64(record: &StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Result<f64, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    let raw = record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("Invalid number for `{name}`: '{raw}'"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("Non-finite value for `{name}`"))
    }
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

/// `Start Temperature (K)` -> `start_temperature_k`.
///
/// Whitespace becomes `_`; punctuation is dropped.
pub fn normalize_header_name(name: &str) -> String {
    let name = name.trim().trim_start_matches('\u{feff}');
    name.chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_alphanumeric() || c == '_' {
                Some(c.to_ascii_lowercase())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Comment,Time,Start Temperature (K),End Temperature (K),Field (Oe),Position (cm),\
Long Scaled Response,Long Voltage,Long Demeaned Voltage,Long Demeaned Fit";

    fn file(rows: &[&str]) -> String {
        let mut text = String::from("[Header]\nTITLE,test\nINFO,some instrument\n[Data]\n");
        text.push_str(HEADER);
        text.push('\n');
        for r in rows {
            text.push_str(r);
            text.push('\n');
        }
        text
    }

    #[test]
    fn header_names_are_normalised() {
        assert_eq!(normalize_header_name("Start Temperature (K)"), "start_temperature_k");
        assert_eq!(normalize_header_name("\u{feff}Time"), "time");
        assert_eq!(normalize_header_name(" Field (Oe) "), "field_oe");
    }

    #[test]
    fn reads_rows_after_the_data_marker() {
        let text = file(&[
            ",100,10,10.2,1000,0.5,2e-6,1e-6,1e-6,9e-7",
            ",100,10,10.2,1000,1.0,4e-6,2e-6,2e-6,1.9e-6",
        ]);
        let data = read_rso(text.as_bytes()).unwrap();
        assert_eq!(data.rows_read, 2);
        assert!(data.row_errors.is_empty());
        assert_eq!(data.samples.len(), 2);
        assert_eq!(data.samples[1].position, 1.0);
        assert_eq!(data.samples[0].demeaned_fit, 9e-7);
    }

    #[test]
    fn bad_rows_are_skipped_with_line_numbers() {
        let text = file(&[
            ",100,10,10.2,1000,0.5,2e-6,1e-6,1e-6,9e-7",
            ",100,10,10.2,1000,,2e-6,1e-6,1e-6,9e-7",
            ",100,10,10.2,abc,1.0,2e-6,1e-6,1e-6,9e-7",
        ]);
        let data = read_rso(text.as_bytes()).unwrap();
        assert_eq!(data.samples.len(), 1);
        assert_eq!(data.row_errors.len(), 2);
        // 4 header lines + column header, so the second data row is line 7.
        assert_eq!(data.row_errors[0].line, 7);
        assert!(data.row_errors[1].message.contains("field_oe"));
    }

    #[test]
    fn missing_columns_are_an_input_error() {
        let text = "[Data]\nTime,Position (cm)\n1,2\n";
        let err = read_rso(text.as_bytes()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("long_demeaned_fit"));
    }

    #[test]
    fn files_without_marker_skip_a_fixed_header() {
        let mut text = String::new();
        for i in 0..DEFAULT_HEADER_LINES {
            text.push_str(&format!("header line {i}\n"));
        }
        text.push_str(HEADER);
        text.push('\n');
        text.push_str(",5,2,2,0,0.1,1,1,1,1\n");
        let data = read_rso(text.as_bytes()).unwrap();
        assert_eq!(data.samples.len(), 1);
        assert_eq!(data.samples[0].time, 5.0);
    }
}
