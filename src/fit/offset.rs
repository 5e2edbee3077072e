//! Step correction for voltage series with a discontinuity.
//!
//! A position-sensor glitch shows up as a jump between two consecutive samples.
//! The correction shifts everything from the breakpoint onwards so that the slope
//! across the jump matches the requested (or neighbouring) slope.

use crate::error::FitError;

/// Slopes between consecutive samples: `slopes[k]` spans samples `k` and `k + 1`.
pub fn slopes(position: &[f64], voltage: &[f64]) -> Vec<f64> {
    position
        .windows(2)
        .zip(voltage.windows(2))
        .map(|(p, v)| (v[1] - v[0]) / (p[1] - p[0]))
        .collect()
}

/// Slope used when no override is given: the mean of the slopes on either side
/// of the step ending at `breakpoint`, or the one that exists at a scan edge.
pub fn neighbour_slope(slopes: &[f64], breakpoint: usize) -> Option<f64> {
    let before = breakpoint.checked_sub(2).and_then(|k| slopes.get(k)).copied();
    let after = slopes.get(breakpoint).copied();
    match (before, after) {
        (Some(a), Some(b)) => Some(0.5 * (a + b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Return `voltage` with samples `breakpoint..` shifted to remove the step
/// between samples `breakpoint - 1` and `breakpoint`.
pub fn corrected_voltage(
    position: &[f64],
    voltage: &[f64],
    breakpoint: usize,
    slope: Option<f64>,
) -> Result<Vec<f64>, FitError> {
    let n = voltage.len();
    if position.len() != n {
        return Err(FitError::invalid_input("position and voltage lengths differ"));
    }
    if breakpoint == 0 || breakpoint >= n {
        return Err(FitError::InvalidBreakpoint {
            index: breakpoint,
            samples: n,
        });
    }

    let k = breakpoint - 1;
    let d_pos = position[k + 1] - position[k];
    if d_pos == 0.0 || !d_pos.is_finite() {
        return Err(FitError::invalid_input(format!(
            "samples {k} and {breakpoint} share the same position"
        )));
    }

    let slopes = slopes(position, voltage);
    let slope = match slope {
        Some(s) => s,
        None => neighbour_slope(&slopes, breakpoint).ok_or(FitError::InvalidBreakpoint {
            index: breakpoint,
            samples: n,
        })?,
    };

    let d_vol = voltage[k + 1] - voltage[k];
    let shift = d_vol - slope * d_pos;

    let mut out = voltage.to_vec();
    for v in out.iter_mut().skip(breakpoint) {
        *v -= shift;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_with_jump() -> (Vec<f64>, Vec<f64>) {
        let position: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let voltage: Vec<f64> = (0..10)
            .map(|i| 0.5 * i as f64 + if i >= 5 { 2.0 } else { 0.0 })
            .collect();
        (position, voltage)
    }

    #[test]
    fn jump_is_removed_with_neighbour_slope() {
        let (position, voltage) = ramp_with_jump();
        let corrected = corrected_voltage(&position, &voltage, 5, None).unwrap();
        let s = slopes(&position, &corrected);
        assert!((s[4] - 0.5).abs() < 1e-12);
        for (i, v) in corrected.iter().enumerate() {
            assert!((v - 0.5 * i as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn slope_override_is_honoured() {
        let (position, voltage) = ramp_with_jump();
        let corrected = corrected_voltage(&position, &voltage, 5, Some(1.5)).unwrap();
        let s = slopes(&position, &corrected);
        assert!((s[4] - 1.5).abs() < 1e-12);
        assert_eq!(&corrected[..5], &voltage[..5]);
    }

    #[test]
    fn edge_breakpoints_use_the_existing_neighbour() {
        let (position, voltage) = ramp_with_jump();
        let s = slopes(&position, &voltage);
        assert_eq!(neighbour_slope(&s, 1), Some(s[1]));
        assert_eq!(neighbour_slope(&s, 9), Some(s[7]));
        assert!(corrected_voltage(&position, &voltage, 0, None).is_err());
        assert!(corrected_voltage(&position, &voltage, 10, None).is_err());
    }
}
