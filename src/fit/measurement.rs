//! One physical scan and its two fit slots.
//!
//! A `Measurement` owns the position/voltage series of a scan plus:
//!
//! - `best`: the engine's own fit to the observed voltage
//! - `reference`: the fit to the instrument's reference curve, together with the
//!   chi2 of those parameters against the observed voltage
//!
//! Both slots only move when the acceptance rule allows it (see `acceptance`).
//! Constraint violations never surface as errors here: the forward model turns
//! them into a penalty and the optimizer steers around it.

use crate::constraints::{Bounds, Locks, ModelConstraints};
use crate::domain::{
    DependenceMode, ExportRow, FitChange, FitResult, FitSlot, N_PARAMS, Param, Params, RawScan,
    ReferenceFit, Sign,
};
use crate::error::FitError;
use crate::fit::acceptance::accept;
use crate::fit::offset::{corrected_voltage, slopes};
use crate::math::{LmConfig, least_squares};
use crate::models::{predict, rso_response};

/// Number of starting centers tried by a multi-start fit.
pub const MULTI_START_COUNT: usize = 9;

/// Default amplitude guess is the voltage range divided by this.
const AMPLITUDE_GUESS_DIVISOR: f64 = 2.65;

/// Default center guess (cm).
const CENTER_GUESS: f64 = -2.0;

/// Center values tried by a multi-start fit: `-linspace(0.1, 4.1, 9)`.
pub fn start_centers() -> [f64; MULTI_START_COUNT] {
    let mut out = [0.0; MULTI_START_COUNT];
    let step = (4.1 - 0.1) / (MULTI_START_COUNT - 1) as f64;
    for (k, c) in out.iter_mut().enumerate() {
        *c = -(0.1 + step * k as f64);
    }
    out
}

/// How a single fit call should run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FitRequest {
    /// Starting point; `None` means the default guess derived from the data.
    pub guess: Option<Params>,
    /// Keep the center within the lock tolerance of this value.
    pub center_lock: Option<f64>,
    /// Keep the amplitude on this side of zero.
    pub sign_lock: Option<Sign>,
    /// Try every center from `start_centers` instead of a single start.
    pub multi_start: bool,
    /// Replace the stored result even if the candidate is worse.
    pub force_update: bool,
    /// Return a `FitChange` notice when the stored result changes.
    pub notify: bool,
}

impl FitRequest {
    pub fn multi_start() -> Self {
        Self {
            multi_start: true,
            ..Self::default()
        }
    }

    pub fn from_guess(guess: Params) -> Self {
        Self {
            guess: Some(guess),
            ..Self::default()
        }
    }

    pub fn with_center_lock(mut self, center: f64) -> Self {
        self.center_lock = Some(center);
        self
    }

    pub fn with_sign_lock(mut self, sign: Option<Sign>) -> Self {
        self.sign_lock = sign;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn notifying(mut self) -> Self {
        self.notify = true;
        self
    }
}

/// Result of a fit call as seen by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitOutcome {
    /// The stored result of the targeted slot changed.
    pub changed: bool,
    /// Present when `changed` and the request asked for notices.
    pub notice: Option<FitChange>,
}

#[derive(Debug, Clone)]
pub struct Measurement {
    time: f64,
    start_temperature: f64,
    end_temperature: f64,
    field: f64,
    scaling_factor: f64,

    position: Vec<f64>,
    voltage: Vec<f64>,
    /// Voltage as loaded, restored by `reset_offset`.
    loaded_voltage: Vec<f64>,
    reference_voltage: Vec<f64>,

    best: Option<FitResult>,
    reference: Option<ReferenceFit>,
    dependence: DependenceMode,
}

impl Measurement {
    /// Build an unfitted measurement from a raw scan.
    ///
    /// Voltages are multiplied by the scan's scaling factor.
    pub fn new(raw: RawScan, dependence: DependenceMode) -> Result<Self, FitError> {
        let n = raw.position.len();
        if raw.voltage.len() != n || raw.reference_voltage.len() != n {
            return Err(FitError::invalid_input(format!(
                "scan at time {} has {} positions, {} voltages and {} reference voltages",
                raw.time,
                n,
                raw.voltage.len(),
                raw.reference_voltage.len()
            )));
        }
        if !raw.scaling_factor.is_finite() || raw.scaling_factor == 0.0 {
            return Err(FitError::invalid_input(format!(
                "scan at time {} has an unusable scaling factor {}",
                raw.time, raw.scaling_factor
            )));
        }
        let finite = |v: &[f64]| v.iter().all(|x| x.is_finite());
        if !finite(&raw.position) || !finite(&raw.voltage) || !finite(&raw.reference_voltage) {
            return Err(FitError::invalid_input(format!(
                "scan at time {} contains non-finite samples",
                raw.time
            )));
        }

        let voltage: Vec<f64> = raw.voltage.iter().map(|v| v * raw.scaling_factor).collect();
        let reference_voltage = raw
            .reference_voltage
            .iter()
            .map(|v| v * raw.scaling_factor)
            .collect();

        Ok(Self {
            time: raw.time,
            start_temperature: raw.start_temperature,
            end_temperature: raw.end_temperature,
            field: raw.field,
            scaling_factor: raw.scaling_factor,
            position: raw.position,
            loaded_voltage: voltage.clone(),
            voltage,
            reference_voltage,
            best: None,
            reference: None,
            dependence,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn start_temperature(&self) -> f64 {
        self.start_temperature
    }

    pub fn end_temperature(&self) -> f64 {
        self.end_temperature
    }

    /// Midpoint of the start and end temperatures.
    pub fn temperature(&self) -> f64 {
        0.5 * (self.start_temperature + self.end_temperature)
    }

    pub fn delta_temperature(&self) -> f64 {
        (self.start_temperature - self.end_temperature).abs()
    }

    pub fn field(&self) -> f64 {
        self.field
    }

    pub fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    pub fn dependence(&self) -> DependenceMode {
        self.dependence
    }

    pub fn set_dependence(&mut self, dependence: DependenceMode) {
        self.dependence = dependence;
    }

    /// Temperature or field, depending on the dependence mode.
    pub fn dependent(&self) -> f64 {
        match self.dependence {
            DependenceMode::Temperature => self.temperature(),
            DependenceMode::Field => self.field,
        }
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn reference_voltage(&self) -> &[f64] {
        &self.reference_voltage
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    pub fn best(&self) -> Option<&FitResult> {
        self.best.as_ref()
    }

    pub fn reference(&self) -> Option<&ReferenceFit> {
        self.reference.as_ref()
    }

    pub fn best_moment(&self) -> Option<f64> {
        self.best.map(|f| f.moment())
    }

    pub fn reference_moment(&self) -> Option<f64> {
        self.reference.map(|r| r.fit.moment())
    }

    /// Fit the observed voltage into the best slot.
    pub fn fit(&mut self, request: &FitRequest, bounds: &Bounds, lm: &LmConfig) -> Result<FitOutcome, FitError> {
        self.run_fit(FitSlot::Best, request, bounds, lm)
    }

    /// Fit the reference voltage into the reference slot.
    pub fn original_fit(
        &mut self,
        request: &FitRequest,
        bounds: &Bounds,
        lm: &LmConfig,
    ) -> Result<FitOutcome, FitError> {
        self.run_fit(FitSlot::Reference, request, bounds, lm)
    }

    fn run_fit(
        &mut self,
        slot: FitSlot,
        request: &FitRequest,
        bounds: &Bounds,
        lm: &LmConfig,
    ) -> Result<FitOutcome, FitError> {
        let n = self.len();
        if n <= N_PARAMS {
            return Err(FitError::Degenerate { samples: n });
        }

        let old = self.stored(slot);
        let target = self.target(slot);

        // Stored parameters outside the current bounds must not survive.
        let stale = old.is_some_and(|f| !bounds.contains(&f.params));
        let mut force_pending = request.force_update || stale;

        let constraints = ModelConstraints::new(
            *bounds,
            Locks {
                center: request.center_lock,
                sign: request.sign_lock,
            },
        );

        let mut guess = request.guess.unwrap_or_else(|| default_guess(target));
        if guess.amplitude() == 0.0 {
            guess.set(Param::Amplitude, amplitude_guess(target));
        }

        let starts: Vec<Params> = if request.multi_start && request.center_lock.is_none() {
            start_centers()
                .iter()
                .map(|&c| guess.with(Param::Center, c))
                .collect()
        } else {
            vec![guess]
        };

        let mut current = old;
        let mut changed = false;
        let mut last_error = None;
        let mut any_succeeded = false;

        for start in starts {
            let candidate = match single_start(&self.position, target, start, &constraints, lm) {
                Ok(candidate) => candidate,
                Err(err) => {
                    log::warn!(
                        "Fit from start {} failed for scan at time {:.1} s: {}",
                        start,
                        self.time,
                        err
                    );
                    last_error = Some(err);
                    continue;
                }
            };
            any_succeeded = true;
            let (next, replaced) = accept(current, candidate, force_pending);
            force_pending = false;
            current = Some(next);
            changed |= replaced;
        }

        if !any_succeeded {
            return Err(last_error.unwrap_or_else(|| FitError::non_convergence("no starting point was tried")));
        }

        let Some(new) = current else {
            return Ok(FitOutcome::default());
        };
        if changed {
            self.store(slot, new);
        }

        let notice = (changed && request.notify).then(|| FitChange {
            slot,
            temperature: self.temperature(),
            field: self.field,
            old,
            new,
        });
        Ok(FitOutcome { changed, notice })
    }

    /// Run a single fit from `guess` and return the candidate without storing it.
    pub fn probe(&self, guess: Params, bounds: &Bounds, lm: &LmConfig) -> Result<FitResult, FitError> {
        let n = self.len();
        if n <= N_PARAMS {
            return Err(FitError::Degenerate { samples: n });
        }
        let constraints = ModelConstraints::new(*bounds, Locks::default());
        single_start(&self.position, &self.voltage, guess, &constraints, lm)
    }

    /// Store a probed candidate in the best slot if it improves chi2.
    pub fn offer(&mut self, candidate: FitResult) -> bool {
        let (next, changed) = accept(self.best, candidate, false);
        if changed {
            self.best = Some(next);
        }
        changed
    }

    /// Default starting point for the observed voltage.
    pub fn default_guess(&self) -> Params {
        default_guess(&self.voltage)
    }

    /// Slopes between consecutive samples of the observed voltage.
    pub fn slopes(&self) -> Vec<f64> {
        slopes(&self.position, &self.voltage)
    }

    /// Remove a step in the voltage series and refit with multi-start.
    ///
    /// Samples `breakpoint..` are shifted. Stored chi2 values are re-scored
    /// against the corrected series before the refit so the acceptance rule
    /// compares like with like.
    pub fn correct_offset(
        &mut self,
        breakpoint: usize,
        slope: Option<f64>,
        bounds: &Bounds,
        lm: &LmConfig,
    ) -> Result<FitOutcome, FitError> {
        let corrected = corrected_voltage(&self.position, &self.voltage, breakpoint, slope)?;
        self.voltage = corrected;
        self.rescore();
        self.fit(&FitRequest::multi_start().notifying(), bounds, lm)
    }

    /// Restore the voltage series as it was loaded and refit with multi-start.
    pub fn reset_offset(&mut self, bounds: &Bounds, lm: &LmConfig) -> Result<FitOutcome, FitError> {
        self.voltage = self.loaded_voltage.clone();
        self.rescore();
        self.fit(&FitRequest::multi_start().notifying(), bounds, lm)
    }

    /// Model curve of a fit slot over the scan positions.
    pub fn fitted_curve(&self, slot: FitSlot) -> Option<Vec<f64>> {
        self.stored(slot).map(|f| predict(&self.position, &f.params))
    }

    /// Fitted minus observed voltage for a fit slot.
    pub fn residuals(&self, slot: FitSlot) -> Option<Vec<f64>> {
        let curve = self.fitted_curve(slot)?;
        Some(curve.iter().zip(&self.voltage).map(|(f, v)| f - v).collect())
    }

    pub fn export_row(&self, index: usize) -> ExportRow {
        ExportRow {
            index,
            time: self.time,
            field: self.field,
            temperature: self.temperature(),
            fitted_moment: self.best_moment(),
            reference_moment: self.reference_moment(),
            delta_temperature: self.delta_temperature(),
            fitted_chi2: self.best.map(|f| f.chi2),
            reference_chi2: self.reference.map(|r| r.observed_chi2),
        }
    }

    fn target(&self, slot: FitSlot) -> &[f64] {
        match slot {
            FitSlot::Best => &self.voltage,
            FitSlot::Reference => &self.reference_voltage,
        }
    }

    fn stored(&self, slot: FitSlot) -> Option<FitResult> {
        match slot {
            FitSlot::Best => self.best,
            FitSlot::Reference => self.reference.map(|r| r.fit),
        }
    }

    fn store(&mut self, slot: FitSlot, fit: FitResult) {
        match slot {
            FitSlot::Best => self.best = Some(fit),
            FitSlot::Reference => {
                let observed_chi2 = reduced_chi2(&self.position, &self.voltage, &fit.params);
                self.reference = Some(ReferenceFit { fit, observed_chi2 });
            }
        }
    }

    fn rescore(&mut self) {
        if let Some(best) = self.best.as_mut() {
            best.chi2 = reduced_chi2(&self.position, &self.voltage, &best.params);
        }
        if let Some(reference) = self.reference.as_mut() {
            reference.observed_chi2 = reduced_chi2(&self.position, &self.voltage, &reference.fit.params);
        }
    }
}

/// `(0, 0, range / 2.65, -2)` for a voltage series.
fn default_guess(voltage: &[f64]) -> Params {
    Params::new(0.0, 0.0, amplitude_guess(voltage), CENTER_GUESS)
}

fn amplitude_guess(voltage: &[f64]) -> f64 {
    let max = voltage.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = voltage.iter().copied().fold(f64::INFINITY, f64::min);
    if max.is_finite() && min.is_finite() {
        (max - min) / AMPLITUDE_GUESS_DIVISOR
    } else {
        0.0
    }
}

/// SSR of the unconstrained model against `y`, divided by `n - 4`.
pub fn reduced_chi2(position: &[f64], y: &[f64], params: &Params) -> f64 {
    let model = predict(position, params);
    let ssr: f64 = model.iter().zip(y).map(|(m, v)| (v - m).powi(2)).sum();
    ssr / (y.len() as f64 - N_PARAMS as f64)
}

fn single_start(
    position: &[f64],
    y: &[f64],
    guess: Params,
    constraints: &ModelConstraints,
    lm: &LmConfig,
) -> Result<FitResult, FitError> {
    let start = constraints.project(&guess);
    let solution = least_squares(|p| rso_response(position, p, constraints), y, start, lm)?;
    Ok(FitResult {
        params: solution.params,
        covariance: solution.covariance,
        chi2: reduced_chi2(position, y, &solution.params),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::offset::neighbour_slope;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn positions(n: usize) -> Vec<f64> {
        (0..n).map(|i| 4.0 * i as f64 / (n - 1) as f64).collect()
    }

    fn scan(truth: Params, n: usize, noise: f64, seed: u64) -> RawScan {
        let position = positions(n);
        let clean = predict(&position, &truth);
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise).unwrap();
        let voltage = clean.iter().map(|v| v + normal.sample(&mut rng)).collect();
        RawScan {
            time: 100.0,
            start_temperature: 9.0,
            end_temperature: 11.0,
            field: 1000.0,
            position,
            voltage,
            reference_voltage: clean,
            scaling_factor: 1.0,
        }
    }

    #[test]
    fn start_centers_span_the_travel() {
        let c = start_centers();
        assert!((c[0] + 0.1).abs() < 1e-12);
        assert!((c[8] + 4.1).abs() < 1e-12);
        assert!((c[1] + 0.6).abs() < 1e-12);
    }

    #[test]
    fn derived_identity_values() {
        let m = Measurement::new(scan(Params::new(0.0, 0.0, 5e-6, -2.0), 20, 1e-9, 1), DependenceMode::Temperature)
            .unwrap();
        assert_eq!(m.temperature(), 10.0);
        assert_eq!(m.delta_temperature(), 2.0);
        assert_eq!(m.dependent(), 10.0);
        let mut m = m;
        m.set_dependence(DependenceMode::Field);
        assert_eq!(m.dependent(), 1000.0);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let mut raw = scan(Params::new(0.0, 0.0, 5e-6, -2.0), 20, 1e-9, 1);
        raw.voltage.pop();
        assert!(matches!(
            Measurement::new(raw, DependenceMode::Temperature),
            Err(FitError::InvalidInput { .. })
        ));
    }

    #[test]
    fn multi_start_recovers_the_truth() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut m = Measurement::new(scan(truth, 20, 1e-9, 7), DependenceMode::Temperature).unwrap();
        let outcome = m
            .fit(&FitRequest::multi_start(), &Bounds::unbounded(), &LmConfig::default())
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.notice.is_none());
        let best = m.best().unwrap();
        assert!((best.params.amplitude() - 5e-6).abs() / 5e-6 < 0.01);
        assert!((best.params.center() + 2.0).abs() < 0.01);
        assert!((m.best_moment().unwrap() - best.params.amplitude() * 1.09589).abs() < 1e-18);
    }

    #[test]
    fn multi_start_is_no_worse_than_a_single_start() {
        let truth = Params::new(0.0, 0.0, 4.5e-6, -3.2);
        let raw = scan(truth, 20, 1e-9, 3);
        let bounds = Bounds::unbounded();
        let lm = LmConfig::default();

        let mut multi = Measurement::new(raw.clone(), DependenceMode::Temperature).unwrap();
        multi.fit(&FitRequest::multi_start(), &bounds, &lm).unwrap();
        let multi = multi.best().unwrap().chi2;

        for &center in start_centers().iter() {
            let mut single = Measurement::new(raw.clone(), DependenceMode::Temperature).unwrap();
            let guess = single.default_guess().with(Param::Center, center);
            // A start that fails is skipped by the multi-start too.
            if single.fit(&FitRequest::from_guess(guess), &bounds, &lm).is_err() {
                continue;
            }
            let single = single.best().unwrap().chi2;
            assert!(multi <= single, "center {center}: multi {multi:e} vs single {single:e}");
        }
    }

    #[test]
    fn stored_chi2_never_increases_without_force() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut m = Measurement::new(scan(truth, 20, 1e-9, 11), DependenceMode::Temperature).unwrap();
        let bounds = Bounds::unbounded();
        let lm = LmConfig::default();
        m.fit(&FitRequest::multi_start(), &bounds, &lm).unwrap();
        let before = m.best().unwrap().chi2;

        let far = Params::new(0.0, 0.0, 1e-6, -0.5);
        let outcome = m.fit(&FitRequest::from_guess(far).with_center_lock(-0.5), &bounds, &lm).unwrap();
        assert!(!outcome.changed);
        assert_eq!(m.best().unwrap().chi2, before);

        let outcome = m
            .fit(&FitRequest::from_guess(far).with_center_lock(-0.5).forced().notifying(), &bounds, &lm)
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.notice.is_some());
        assert!(m.best().unwrap().chi2 > before);
        assert!((m.best().unwrap().params.center() + 0.5).abs() <= 0.02);
    }

    #[test]
    fn bounded_fit_stays_inside_bounds() {
        let truth = Params::new(0.0, 0.0, 5e-6, -3.5);
        let mut m = Measurement::new(scan(truth, 20, 1e-9, 5), DependenceMode::Temperature).unwrap();
        let bounds = Bounds::unbounded()
            .with(Param::Amplitude, Some(0.0), None)
            .with(Param::Center, Some(-3.0), Some(-1.0));
        m.fit(&FitRequest::multi_start(), &bounds, &LmConfig::default()).unwrap();
        let best = m.best().unwrap();
        assert!(bounds.contains(&best.params), "{}", best.params);
    }

    #[test]
    fn stale_result_is_replaced_after_bounds_tighten() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut m = Measurement::new(scan(truth, 20, 1e-9, 13), DependenceMode::Temperature).unwrap();
        let lm = LmConfig::default();
        m.fit(&FitRequest::multi_start(), &Bounds::unbounded(), &lm).unwrap();

        let bounds = Bounds::unbounded().with(Param::Center, Some(-1.8), Some(-1.0));
        let outcome = m.fit(&FitRequest::multi_start(), &bounds, &lm).unwrap();
        assert!(outcome.changed);
        assert!(bounds.contains(&m.best().unwrap().params));
    }

    #[test]
    fn reference_fit_tracks_observed_chi2() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut m = Measurement::new(scan(truth, 20, 1e-8, 17), DependenceMode::Temperature).unwrap();
        m.original_fit(&FitRequest::default(), &Bounds::unbounded(), &LmConfig::default())
            .unwrap();
        let reference = m.reference().unwrap();
        assert!(reference.fit.chi2 < 1e-20);
        assert!(reference.observed_chi2 > reference.fit.chi2);
        assert!((m.reference_moment().unwrap() / 1.09589 - 5e-6).abs() < 5e-9);
    }

    #[test]
    fn degenerate_scan_is_an_error() {
        let raw = RawScan {
            time: 1.0,
            start_temperature: 2.0,
            end_temperature: 2.0,
            field: 0.0,
            position: vec![0.0, 1.0, 2.0, 3.0],
            voltage: vec![0.0, 1.0, 0.0, 1.0],
            reference_voltage: vec![0.0; 4],
            scaling_factor: 1.0,
        };
        let mut m = Measurement::new(raw, DependenceMode::Temperature).unwrap();
        let err = m
            .fit(&FitRequest::multi_start(), &Bounds::unbounded(), &LmConfig::default())
            .unwrap_err();
        assert_eq!(err, FitError::Degenerate { samples: 4 });
        assert!(m.best().is_none());
    }

    #[test]
    fn offset_correction_improves_the_fit_and_reset_restores_the_data() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut raw = scan(truth, 10, 1e-9, 19);
        for v in raw.voltage.iter_mut().skip(5) {
            *v += 2e-6;
        }
        let loaded = raw.voltage.clone();
        let bounds = Bounds::unbounded();
        let lm = LmConfig::default();
        let mut m = Measurement::new(raw, DependenceMode::Temperature).unwrap();
        m.fit(&FitRequest::multi_start(), &bounds, &lm).unwrap();
        let before = m.best().unwrap().chi2;
        let expected_slope = neighbour_slope(&m.slopes(), 5).unwrap();

        let outcome = m.correct_offset(5, None, &bounds, &lm).unwrap();
        assert!(outcome.changed);
        assert!((m.slopes()[4] - expected_slope).abs() < 1e-12);
        assert!(m.best().unwrap().chi2 < before);

        m.reset_offset(&bounds, &lm).unwrap();
        assert_eq!(m.voltage(), loaded.as_slice());
    }

    #[test]
    fn residuals_match_the_fitted_curve() {
        let truth = Params::new(0.0, 0.0, 5e-6, -2.0);
        let mut m = Measurement::new(scan(truth, 20, 1e-9, 23), DependenceMode::Temperature).unwrap();
        assert!(m.fitted_curve(FitSlot::Best).is_none());
        m.fit(&FitRequest::multi_start(), &Bounds::unbounded(), &LmConfig::default())
            .unwrap();
        let curve = m.fitted_curve(FitSlot::Best).unwrap();
        let residuals = m.residuals(FitSlot::Best).unwrap();
        for i in 0..m.len() {
            assert!((curve[i] - m.voltage()[i] - residuals[i]).abs() < 1e-20);
        }
        let row = m.export_row(0);
        assert_eq!(row.fitted_chi2, Some(m.best().unwrap().chi2));
        assert_eq!(row.reference_moment, None);
    }
}
