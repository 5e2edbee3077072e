//! Error types.
//!
//! - `FitError`: failures of a single fit call (engine level)
//! - `ScanError`: a `FitError` tagged with the scan it happened on (bulk operations)
//! - `AppError`: what the binary reports, carrying the process exit code

use std::fmt;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Failure of a single fit call.
///
/// Constraint violations are never reported here: the forward model turns them
/// into a penalty value and the optimizer routes around it.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// Not enough samples to leave any degrees of freedom (`n - 4 <= 0`).
    Degenerate { samples: usize },
    /// The optimizer gave up or hit a numerical failure.
    NonConvergence { reason: String },
    /// Structurally invalid scan data (mismatched arrays, non-finite values, ...).
    InvalidInput { reason: String },
    /// Offset correction breakpoint that has no usable neighbouring slope.
    InvalidBreakpoint { index: usize, samples: usize },
}

impl FitError {
    pub fn non_convergence(reason: impl Into<String>) -> Self {
        FitError::NonConvergence {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        FitError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::Degenerate { .. } => 3,
            FitError::NonConvergence { .. } => 4,
            FitError::InvalidInput { .. } | FitError::InvalidBreakpoint { .. } => 2,
        }
    }
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitError::Degenerate { samples } => write!(
                f,
                "degenerate scan: {samples} samples leave no degrees of freedom for 4 parameters"
            ),
            FitError::NonConvergence { reason } => write!(f, "fit did not converge: {reason}"),
            FitError::InvalidInput { reason } => write!(f, "invalid scan data: {reason}"),
            FitError::InvalidBreakpoint { index, samples } => write!(
                f,
                "offset breakpoint {index} is not usable for a scan with {samples} samples"
            ),
        }
    }
}

impl std::error::Error for FitError {}

/// A fit failure inside a bulk operation, tagged with the failing scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanError {
    /// Position of the scan in the sequence at the time of failure.
    pub scan: usize,
    /// Acquisition time of the scan (seconds).
    pub time: f64,
    pub error: FitError,
}

impl ScanError {
    pub fn new(scan: usize, time: f64, error: FitError) -> Self {
        Self { scan, time, error }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan {} (time {:.1} s): {}", self.scan, self.time, self.error)
    }
}

impl std::error::Error for ScanError {}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        AppError::new(err.error.exit_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_error_maps_to_fit_exit_code() {
        let err = ScanError::new(3, 120.0, FitError::non_convergence("iteration limit"));
        let app: AppError = err.into();
        assert_eq!(app.exit_code(), 4);
        assert!(app.to_string().contains("scan 3"));

        let app: AppError = FitError::Degenerate { samples: 4 }.into();
        assert_eq!(app.exit_code(), 3);
    }
}
