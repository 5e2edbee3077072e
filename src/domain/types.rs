//! Shared domain types.
//!
//! These are small value types passed between the forward model, the optimizer,
//! the per-scan fit logic and the output collaborators (reports, CSV export).

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::math::LmConfig;

/// Conversion from fitted amplitude (scaled voltage) to moment in EMU.
pub const SQUID_FACTOR: f64 = 1.09589;

/// Number of free model parameters.
pub const N_PARAMS: usize = 4;

/// Named slot of the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Param {
    /// `x1`: baseline offset.
    Offset,
    /// `x2`: linear drift across the scan.
    Drift,
    /// `x3`: signal amplitude (proportional to the moment).
    Amplitude,
    /// `x4`: sample position center offset (cm).
    Center,
}

impl Param {
    pub const ALL: [Param; N_PARAMS] = [Param::Offset, Param::Drift, Param::Amplitude, Param::Center];

    pub fn index(self) -> usize {
        match self {
            Param::Offset => 0,
            Param::Drift => 1,
            Param::Amplitude => 2,
            Param::Center => 3,
        }
    }

    /// Short label used in notices and reports (`x1`..`x4`).
    pub fn label(self) -> &'static str {
        match self {
            Param::Offset => "x1",
            Param::Drift => "x2",
            Param::Amplitude => "x3",
            Param::Center => "x4",
        }
    }
}

/// Ordered model parameters `(offset, drift, amplitude, center)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Params(pub [f64; N_PARAMS]);

impl Params {
    pub fn new(offset: f64, drift: f64, amplitude: f64, center: f64) -> Self {
        Params([offset, drift, amplitude, center])
    }

    pub fn offset(&self) -> f64 {
        self.0[0]
    }

    pub fn drift(&self) -> f64 {
        self.0[1]
    }

    pub fn amplitude(&self) -> f64 {
        self.0[2]
    }

    pub fn center(&self) -> f64 {
        self.0[3]
    }

    pub fn get(&self, param: Param) -> f64 {
        self.0[param.index()]
    }

    pub fn set(&mut self, param: Param, value: f64) {
        self.0[param.index()] = value;
    }

    /// Copy with one slot replaced.
    pub fn with(mut self, param: Param, value: f64) -> Self {
        self.set(param, value);
        self
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Moment in EMU implied by the amplitude.
    pub fn moment(&self) -> f64 {
        self.amplitude() * SQUID_FACTOR
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3e}, {:.3e}, {:.3e}, {:.3e}]",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Required polarity of the amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    /// `+n -> Positive`, `-n -> Negative`, `0 -> None` (no lock).
    pub fn from_i8(value: i8) -> Option<Sign> {
        match value {
            0 => None,
            v if v > 0 => Some(Sign::Positive),
            _ => Some(Sign::Negative),
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }

    /// Zero satisfies either sign.
    pub fn admits(self, value: f64) -> bool {
        self.factor() * value >= 0.0
    }
}

/// Which per-scan quantity is the independent variable of cross-scan summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DependenceMode {
    #[default]
    Temperature,
    Field,
}

impl DependenceMode {
    pub fn toggled(self) -> Self {
        match self {
            DependenceMode::Temperature => DependenceMode::Field,
            DependenceMode::Field => DependenceMode::Temperature,
        }
    }

    pub fn axis_label(self) -> &'static str {
        match self {
            DependenceMode::Temperature => "Temperature (K)",
            DependenceMode::Field => "Applied field (Oe)",
        }
    }
}

/// One accepted fit of the forward model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub params: Params,
    /// Parameter covariance scaled by the residual variance; `None` when the
    /// normal matrix was singular at the solution.
    pub covariance: Option<Matrix4<f64>>,
    /// Reduced chi-square: SSR / (n - 4).
    pub chi2: f64,
}

impl FitResult {
    /// One-sigma uncertainties from the covariance diagonal.
    pub fn std_errors(&self) -> Option<[f64; N_PARAMS]> {
        let cov = self.covariance?;
        let mut out = [0.0; N_PARAMS];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = cov[(i, i)].max(0.0).sqrt();
        }
        Some(out)
    }

    pub fn moment(&self) -> f64 {
        self.params.moment()
    }
}

/// Fit of the instrument's own fitted curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFit {
    /// Fit against the reference voltage (`chi2` is the reference-fit chi2).
    pub fit: FitResult,
    /// Chi2 of the same parameters evaluated against the observed voltage.
    pub observed_chi2: f64,
}

/// Which of the two fit results of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitSlot {
    /// The engine's own fit to the observed voltage.
    Best,
    /// The fit to the instrument's reference curve.
    Reference,
}

impl FitSlot {
    pub fn display_name(self) -> &'static str {
        match self {
            FitSlot::Best => "best fit",
            FitSlot::Reference => "reference fit",
        }
    }
}

/// Notice emitted when a stored fit result changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FitChange {
    pub slot: FitSlot,
    /// Mean temperature of the scan (K).
    pub temperature: f64,
    pub field: f64,
    pub old: Option<FitResult>,
    pub new: FitResult,
}

impl fmt::Display for FitChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} parameters changed for temperature {:.3} K, field {:.3} Oe:",
            self.slot.display_name(),
            self.temperature,
            self.field
        )?;
        for param in Param::ALL {
            match &self.old {
                Some(old) => writeln!(
                    f,
                    "{}: {:.3e} -> {:.3e}",
                    param.label(),
                    old.params.get(param),
                    self.new.params.get(param)
                )?,
                None => writeln!(f, "{}: - -> {:.3e}", param.label(), self.new.params.get(param))?,
            }
        }
        match &self.old {
            Some(old) => write!(f, "chi2: {:.3e} -> {:.3e}", old.chi2, self.new.chi2),
            None => write!(f, "chi2: - -> {:.3e}", self.new.chi2),
        }
    }
}

/// One row of the raw instrument data section (already parsed to numbers).
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Acquisition timestamp shared by every sample of one scan (s).
    pub time: f64,
    pub start_temperature: f64,
    pub end_temperature: f64,
    pub field: f64,
    pub position: f64,
    /// Instrument-scaled response channel (used only for the scaling factor).
    pub scaled_response: f64,
    /// Raw voltage channel (used only for the scaling factor).
    pub raw_voltage: f64,
    pub demeaned_voltage: f64,
    pub demeaned_fit: f64,
}

/// Input record for one scan, as supplied by a reader or generator.
///
/// Voltages are unscaled; the measurement multiplies them by `scaling_factor`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScan {
    pub time: f64,
    pub start_temperature: f64,
    pub end_temperature: f64,
    pub field: f64,
    pub position: Vec<f64>,
    pub voltage: Vec<f64>,
    pub reference_voltage: Vec<f64>,
    pub scaling_factor: f64,
}

/// One exported row per scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Scan index")]
    pub index: usize,
    #[serde(rename = "Time (s)")]
    pub time: f64,
    #[serde(rename = "Field (Oe)")]
    pub field: f64,
    #[serde(rename = "Temperature (K)")]
    pub temperature: f64,
    #[serde(rename = "Long Moment fitted (EMU)")]
    pub fitted_moment: Option<f64>,
    #[serde(rename = "Long Moment Original (EMU)")]
    pub reference_moment: Option<f64>,
    #[serde(rename = "Delta T (K)")]
    pub delta_temperature: f64,
    #[serde(rename = "Reduced chi2 fitted")]
    pub fitted_chi2: Option<f64>,
    #[serde(rename = "Reduced chi2 original")]
    pub reference_chi2: Option<f64>,
}

impl ExportRow {
    /// Column names, in field order.
    pub const HEADER: [&'static str; 9] = [
        "Scan index",
        "Time (s)",
        "Field (Oe)",
        "Temperature (K)",
        "Long Moment fitted (EMU)",
        "Long Moment Original (EMU)",
        "Delta T (K)",
        "Reduced chi2 fitted",
        "Reduced chi2 original",
    ];
}

/// A requested offset correction: `scan`, `breakpoint`, optional slope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetCorrection {
    pub scan: usize,
    pub breakpoint: usize,
    pub slope: Option<f64>,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub files: Vec<PathBuf>,
    pub dependence: DependenceMode,
    /// Bound texts in `Param::ALL` order; malformed entries become "unset".
    pub min_bounds: [Option<String>; N_PARAMS],
    pub max_bounds: [Option<String>; N_PARAMS],
    pub lm: LmConfig,

    pub refit_centers: bool,
    pub refit_all: bool,
    pub reverse: bool,
    pub sign_lock: Option<Sign>,
    pub recompute_original: bool,
    pub corrections: Vec<OffsetCorrection>,

    /// Scans with a best chi2 above this are flagged in reports.
    pub chi2_bound: f64,
    /// Scan index whose full fit detail is printed.
    pub detail: Option<usize>,
    pub export: Option<PathBuf>,
}
