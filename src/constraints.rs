//! Box constraints on the fit parameters and the per-call locks.
//!
//! - `Bounds`: optional min/max for each of the four parameters (a `Copy` value,
//!   so bulk operations snapshot it once and every fit in the batch sees the
//!   same limits)
//! - `ConstraintState`: the user-facing control surface (bounds + dependence
//!   mode + auto-accept flag)
//! - `Locks`: center/sign locks that only apply to a single fit call

use crate::domain::{DependenceMode, N_PARAMS, Param, Params, Sign};

/// Half-width of the window a center lock allows around its value (cm).
pub const CENTER_LOCK_TOLERANCE: f64 = 0.02;

/// Optional limits for a single parameter. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bound {
    pub fn contains(&self, value: f64) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }

    /// Nearest admissible value.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }

    pub fn is_unset(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Limits for all four parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds([Bound; N_PARAMS]);

impl Bounds {
    /// No limits on any parameter.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn get(&self, param: Param) -> Bound {
        self.0[param.index()]
    }

    pub fn min(&self, param: Param) -> Option<f64> {
        self.0[param.index()].min
    }

    pub fn max(&self, param: Param) -> Option<f64> {
        self.0[param.index()].max
    }

    pub fn set_min(&mut self, param: Param, value: Option<f64>) {
        self.0[param.index()].min = value;
    }

    pub fn set_max(&mut self, param: Param, value: Option<f64>) {
        self.0[param.index()].max = value;
    }

    /// Builder-style variant of `set_min` + `set_max`.
    pub fn with(mut self, param: Param, min: Option<f64>, max: Option<f64>) -> Self {
        self.set_min(param, min);
        self.set_max(param, max);
        self
    }

    pub fn contains(&self, params: &Params) -> bool {
        Param::ALL
            .iter()
            .all(|&p| self.0[p.index()].contains(params.get(p)))
    }

    /// Move every parameter to its nearest admissible value.
    pub fn project(&self, params: &Params) -> Params {
        let mut out = *params;
        for p in Param::ALL {
            out.set(p, self.0[p.index()].clamp(params.get(p)));
        }
        out
    }

    pub fn clear(&mut self) {
        *self = Bounds::default();
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.iter().all(Bound::is_unset)
    }
}

/// Per-call locks baked into the forward model for one fit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Locks {
    /// Keep the center within `CENTER_LOCK_TOLERANCE` of this value.
    pub center: Option<f64>,
    /// Keep the amplitude on this side of zero.
    pub sign: Option<Sign>,
}

impl Locks {
    pub fn admits(&self, params: &Params) -> bool {
        if let Some(center) = self.center {
            if (params.center() - center).abs() > CENTER_LOCK_TOLERANCE {
                return false;
            }
        }
        if let Some(sign) = self.sign {
            if !sign.admits(params.amplitude()) {
                return false;
            }
        }
        true
    }
}

/// Everything the forward model checks before evaluating the response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConstraints {
    pub bounds: Bounds,
    pub locks: Locks,
    /// When false the response is always evaluated (chi2, plotting).
    pub enforce: bool,
}

impl ModelConstraints {
    pub fn new(bounds: Bounds, locks: Locks) -> Self {
        Self {
            bounds,
            locks,
            enforce: true,
        }
    }

    /// No checks at all.
    pub fn ignored() -> Self {
        Self {
            bounds: Bounds::unbounded(),
            locks: Locks::default(),
            enforce: false,
        }
    }

    pub fn admits(&self, params: &Params) -> bool {
        !self.enforce || (self.bounds.contains(params) && self.locks.admits(params))
    }

    /// Move a starting point into the feasible region.
    ///
    /// The optimizer cannot leave an infeasible start (every evaluation there
    /// returns the penalty), so guesses are projected before fitting.
    pub fn project(&self, params: &Params) -> Params {
        if !self.enforce {
            return *params;
        }
        let mut out = *params;
        if let Some(sign) = self.locks.sign {
            if !sign.admits(out.amplitude()) {
                out.set(Param::Amplitude, -out.amplitude());
            }
        }
        if let Some(center) = self.locks.center {
            out.set(Param::Center, center);
        }
        self.bounds.project(&out)
    }
}

/// User-facing constraint control surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintState {
    pub bounds: Bounds,
    pub dependence: DependenceMode,
    /// Accept click-to-fit candidates that improve chi2 without confirmation.
    pub auto_accept_click: bool,
}

impl Default for ConstraintState {
    fn default() -> Self {
        Self {
            bounds: Bounds::unbounded(),
            dependence: DependenceMode::Temperature,
            auto_accept_click: true,
        }
    }
}

impl ConstraintState {
    pub fn new(dependence: DependenceMode) -> Self {
        Self {
            dependence,
            ..Self::default()
        }
    }

    /// Bounds as they are right now; later edits do not affect the copy.
    pub fn snapshot(&self) -> Bounds {
        self.bounds
    }

    pub fn set_min(&mut self, param: Param, value: Option<f64>) {
        self.bounds.set_min(param, value);
    }

    pub fn set_max(&mut self, param: Param, value: Option<f64>) {
        self.bounds.set_max(param, value);
    }

    /// Set a lower bound from user text. Returns the value actually applied.
    pub fn set_min_text(&mut self, param: Param, text: &str) -> Option<f64> {
        let value = parse_bound(param, "min", text);
        self.bounds.set_min(param, value);
        value
    }

    /// Set an upper bound from user text. Returns the value actually applied.
    pub fn set_max_text(&mut self, param: Param, text: &str) -> Option<f64> {
        let value = parse_bound(param, "max", text);
        self.bounds.set_max(param, value);
        value
    }

    pub fn clear_bounds(&mut self) {
        self.bounds.clear();
        log::info!("Fitting limits cleared");
    }

    /// One line per parameter, `x1: min, max`.
    pub fn describe_bounds(&self) -> String {
        let fmt = |v: Option<f64>| v.map(|v| format!("{v:e}")).unwrap_or_else(|| "None".to_string());
        Param::ALL
            .iter()
            .map(|&p| format!("{}: {}, {}", p.label(), fmt(self.bounds.min(p)), fmt(self.bounds.max(p))))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Blank or malformed text means "no limit".
fn parse_bound(param: Param, side: &str, text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            log::warn!(
                "Ignoring {} {} limit '{}': not a finite number",
                param.label(),
                side,
                trimmed
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        let bounds = Bounds::unbounded().with(Param::Center, Some(-3.0), Some(-1.0));
        assert!(bounds.contains(&Params::new(0.0, 0.0, 1.0, -3.0)));
        assert!(bounds.contains(&Params::new(0.0, 0.0, 1.0, -1.0)));
        assert!(!bounds.contains(&Params::new(0.0, 0.0, 1.0, -3.5)));
    }

    #[test]
    fn malformed_text_leaves_bound_unset() {
        let mut state = ConstraintState::default();
        state.set_min(Param::Amplitude, Some(1.0));
        assert_eq!(state.set_min_text(Param::Amplitude, "abc"), None);
        assert_eq!(state.bounds.min(Param::Amplitude), None);
        assert_eq!(state.set_max_text(Param::Center, " -1.5 "), Some(-1.5));
        assert_eq!(state.set_max_text(Param::Drift, "inf"), None);
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut state = ConstraintState::default();
        state.set_min(Param::Amplitude, Some(0.0));
        let snap = state.snapshot();
        state.set_min(Param::Amplitude, Some(5.0));
        assert_eq!(snap.min(Param::Amplitude), Some(0.0));
    }

    #[test]
    fn projection_satisfies_locks_and_bounds() {
        let bounds = Bounds::unbounded().with(Param::Center, Some(-3.0), Some(-1.0));
        let locks = Locks {
            center: None,
            sign: Some(Sign::Positive),
        };
        let c = ModelConstraints::new(bounds, locks);
        let p = c.project(&Params::new(0.0, 0.0, -2e-6, -4.1));
        assert!(c.admits(&p));
        assert_eq!(p.amplitude(), 2e-6);
        assert_eq!(p.center(), -3.0);

        let locked = ModelConstraints::new(
            Bounds::unbounded(),
            Locks {
                center: Some(-2.05),
                sign: None,
            },
        );
        let p = locked.project(&Params::new(0.0, 0.0, 1e-6, -0.1));
        assert_eq!(p.center(), -2.05);
        assert!(locked.admits(&p.with(Param::Center, -2.04)));
        assert!(!locked.admits(&p.with(Param::Center, -2.1)));
    }
}
