//! Synthetic RSO scans with known ground truth.
//!
//! Used by the `demo` command and by tests. Each scan samples the forward model
//! on an evenly spaced position grid and adds Gaussian noise to the observed
//! channel; the reference channel is left noise-free, like the instrument's own
//! smoothed fit.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Params, RawScan};
use crate::error::AppError;
use crate::models::predict;

/// Default sampling used by the demo sequence.
pub const DEMO_POSITIONS: usize = 20;
/// Scan travel (cm).
pub const DEMO_TRAVEL: f64 = 4.0;
pub const DEMO_NOISE: f64 = 1e-9;
pub const DEMO_SEED: u64 = 42;

/// Shape of one synthetic scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScan {
    pub truth: Params,
    pub time: f64,
    pub start_temperature: f64,
    pub end_temperature: f64,
    pub field: f64,
}

/// `n` positions evenly spaced over `0..=travel`.
pub fn position_grid(n: usize, travel: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n).map(|i| travel * i as f64 / (n - 1) as f64).collect(),
    }
}

/// Sample one scan. The returned voltages are unscaled (`scaling_factor = 1`).
pub fn synthetic_scan(
    shape: &SyntheticScan,
    positions: usize,
    noise: f64,
    rng: &mut StdRng,
) -> Result<RawScan, AppError> {
    if !(noise.is_finite() && noise >= 0.0) {
        return Err(AppError::new(2, format!("Noise must be finite and >= 0, got {noise}.")));
    }
    let normal = Normal::new(0.0, noise)
        .map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?;

    let position = position_grid(positions, DEMO_TRAVEL);
    let clean = predict(&position, &shape.truth);
    let voltage = clean.iter().map(|v| v + normal.sample(rng)).collect();

    Ok(RawScan {
        time: shape.time,
        start_temperature: shape.start_temperature,
        end_temperature: shape.end_temperature,
        field: shape.field,
        position,
        voltage,
        reference_voltage: clean,
        scaling_factor: 1.0,
    })
}

/// A small temperature sweep: a Curie-like moment that shrinks with
/// temperature and a center that wanders slowly.
///
/// Acquisition times run opposite to temperature so chronological and
/// temperature order differ.
pub fn demo_shapes(count: usize) -> Vec<SyntheticScan> {
    (0..count)
        .map(|k| {
            let t = 5.0 + 5.0 * k as f64;
            SyntheticScan {
                truth: Params::new(2e-8, -1e-8, 5e-6 * 10.0 / (t + 5.0), -2.0 - 0.01 * k as f64),
                time: 60.0 * (count - k) as f64,
                start_temperature: t - 0.05,
                end_temperature: t + 0.05,
                field: 1000.0,
            }
        })
        .collect()
}

/// Scans for every shape, drawn from one seeded generator.
pub fn synthetic_sequence(
    shapes: &[SyntheticScan],
    positions: usize,
    noise: f64,
    seed: u64,
) -> Result<Vec<RawScan>, AppError> {
    let mut rng = StdRng::seed_from_u64(seed);
    shapes
        .iter()
        .map(|shape| synthetic_scan(shape, positions, noise, &mut rng))
        .collect()
}
