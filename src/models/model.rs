//! RSO dipole response of the second-order gradiometer.
//!
//! The fitter relies on two primitive operations:
//! - evaluate the response for given parameters, honouring constraints
//!   (`rso_response`)
//! - evaluate it unconditionally (`predict`), for chi2 and fitted curves
//!
//! The scan drift term is linear in the sample index rather than in position,
//! because RSO scans start and end in the middle of the travel.

use crate::constraints::ModelConstraints;
use crate::domain::Params;

/// Coil radius (cm).
pub const COIL_RADIUS: f64 = 0.97;
/// Coil half-separation (cm).
pub const COIL_SEPARATION: f64 = 1.519;
/// Value returned in place of a curve for infeasible parameters.
pub const PENALTY: f64 = 10_000.0;

/// Output of a constrained evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Predicted voltage, one value per position sample.
    Samples(Vec<f64>),
    /// Parameters are infeasible; every sample should be treated as this value.
    Penalty(f64),
}

impl Response {
    /// Value at sample `i`; the penalty applies uniformly to every sample.
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Response::Samples(v) => v[i],
            Response::Penalty(p) => *p,
        }
    }

    pub fn is_penalty(&self) -> bool {
        matches!(self, Response::Penalty(_))
    }
}

/// Evaluate the response, or the penalty if the constraints reject `params`.
pub fn rso_response(position: &[f64], params: &Params, constraints: &ModelConstraints) -> Response {
    if !constraints.admits(params) {
        return Response::Penalty(PENALTY);
    }
    Response::Samples(predict(position, params))
}

/// Evaluate the response with no constraint checks.
pub fn predict(position: &[f64], params: &Params) -> Vec<f64> {
    let n = position.len();
    let r2 = COIL_RADIUS * COIL_RADIUS;
    let [x1, x2, x3, x4] = params.0;

    position
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let z = p + x4;
            let x = r2 + z * z;
            let y = r2 + (COIL_SEPARATION + z).powi(2);
            let w = r2 + (z - COIL_SEPARATION).powi(2);
            x1 + x2 * drift_index(i, n) + x3 * (2.0 * x.powf(-1.5) - y.powf(-1.5) - w.powf(-1.5))
        })
        .collect()
}

/// Position of sample `i` in `0..=1` across the scan.
fn drift_index(i: usize, n: usize) -> f64 {
    if n <= 1 { 0.0 } else { i as f64 / (n - 1) as f64 }
}
