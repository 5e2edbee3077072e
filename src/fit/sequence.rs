//! An ordered sequence of scans fitted as a chain.
//!
//! Neighbouring scans of a temperature or field sweep have similar parameters,
//! so every scan after the first starts from the previous accepted fit instead
//! of repeating the full multi-start search.
//!
//! Bulk operations copy the bounds once at their start. Passes without a chain
//! dependency (center refit, reference refits) run per scan in parallel.

use std::fmt;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::constraints::{Bounds, ConstraintState};
use crate::domain::{DependenceMode, ExportRow, FitResult, Param, Params, RawSample, RawScan, Sign};
use crate::error::{FitError, ScanError};
use crate::fit::measurement::{FitOutcome, FitRequest, Measurement};
use crate::math::LmConfig;

/// Split flat sample rows into scans sharing one acquisition time.
///
/// Scans come out in chronological order. The scaling factor of each scan is
/// the mean of `scaled / raw` over samples with a nonzero scaled response
/// (1 when there are none).
pub fn group_by_time(mut samples: Vec<RawSample>) -> Vec<RawScan> {
    samples.sort_by(|a, b| a.time.total_cmp(&b.time));
    samples
        .chunk_by(|a, b| a.time == b.time)
        .map(|group| {
            let first = &group[0];
            RawScan {
                time: first.time,
                start_temperature: first.start_temperature,
                end_temperature: first.end_temperature,
                field: first.field,
                position: group.iter().map(|s| s.position).collect(),
                voltage: group.iter().map(|s| s.demeaned_voltage).collect(),
                reference_voltage: group.iter().map(|s| s.demeaned_fit).collect(),
                scaling_factor: scaling_factor(group),
            }
        })
        .collect()
}

fn scaling_factor(group: &[RawSample]) -> f64 {
    let ratios: Vec<f64> = group
        .iter()
        .filter(|s| s.scaled_response != 0.0 && s.raw_voltage != 0.0)
        .map(|s| s.scaled_response / s.raw_voltage)
        .collect();
    if ratios.is_empty() {
        1.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

/// Outcome of `refit_centers` / `refit_reference_all`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefitSummary {
    pub refitted: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RefitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Refit {}/{} scans in {:.2} s",
            self.refitted,
            self.total,
            self.elapsed.as_secs_f64()
        )
    }
}

/// A manual fit candidate and whether it was stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub candidate: FitResult,
    /// Candidate chi2 is strictly lower than the stored one (or nothing is stored).
    pub improved: bool,
    pub accepted: bool,
}

/// One point of the moment-vs-dependent-variable series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DependencePoint {
    pub index: usize,
    pub dependent: f64,
    pub best_moment: f64,
    pub reference_moment: Option<f64>,
    /// Field over moment.
    pub best_inverse_susceptibility: f64,
    pub reference_inverse_susceptibility: Option<f64>,
    pub best_chi2: f64,
    pub reference_chi2: Option<f64>,
}

/// Fitted parameters of one scan against the dependent variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterPoint {
    pub index: usize,
    pub dependent: f64,
    pub best: Params,
    pub reference: Option<Params>,
}

#[derive(Debug, Clone)]
pub struct ScanSequence {
    scans: Vec<Measurement>,
    selected: usize,
    constraints: ConstraintState,
    lm: LmConfig,
}

impl ScanSequence {
    /// Build and fit a sequence.
    ///
    /// In temperature mode the chain runs from the coldest scan upwards; the
    /// sequence itself is in chronological order. Errors carry the index in
    /// that final order.
    pub fn load(mut raws: Vec<RawScan>, constraints: ConstraintState, lm: LmConfig) -> Result<Self, ScanError> {
        let dependence = constraints.dependence;
        let bounds = constraints.snapshot();
        let started = Instant::now();

        let mut order: Vec<usize> = (0..raws.len()).collect();
        if dependence == DependenceMode::Temperature {
            raws.sort_by(|a, b| a.time.total_cmp(&b.time));
            order.sort_by(|&a, &b| raws[a].start_temperature.total_cmp(&raws[b].start_temperature));
        }

        let mut scans: Vec<Measurement> = raws
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let time = raw.time;
                Measurement::new(raw, dependence).map_err(|e| ScanError::new(i, time, e))
            })
            .collect::<Result<_, _>>()?;

        let mut previous: Option<Params> = None;
        for &i in &order {
            let scan = &mut scans[i];
            let time = scan.time();
            let request = match previous {
                Some(p) => FitRequest::from_guess(p),
                None => FitRequest::multi_start(),
            };
            scan.fit(&request, &bounds, &lm).map_err(|e| ScanError::new(i, time, e))?;
            previous = scan.best().map(|f| f.params);
        }

        scans
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, scan)| {
                let time = scan.time();
                scan.original_fit(&FitRequest::default(), &bounds, &lm)
                    .map(|_| ())
                    .map_err(|e| ScanError::new(i, time, e))
            })?;

        log::info!(
            "Loaded {} scans in {:.3} s",
            scans.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(Self {
            scans,
            selected: 0,
            constraints,
            lm,
        })
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn scans(&self) -> &[Measurement] {
        &self.scans
    }

    pub fn get(&self, index: usize) -> Option<&Measurement> {
        self.scans.get(index)
    }

    pub fn constraints(&self) -> &ConstraintState {
        &self.constraints
    }

    /// Mutable access to bounds and flags. Edits apply to the next operation.
    pub fn constraints_mut(&mut self) -> &mut ConstraintState {
        &mut self.constraints
    }

    pub fn lm_config(&self) -> &LmConfig {
        &self.lm
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> Option<&Measurement> {
        self.scans.get(self.selected)
    }

    /// Select a scan by index; out-of-range indices leave the selection alone.
    pub fn select(&mut self, index: usize) -> Option<&Measurement> {
        if index < self.scans.len() {
            self.selected = index;
        }
        self.scans.get(index)
    }

    /// Move the selection one scan forward, stopping at the last scan.
    pub fn select_next(&mut self) -> Option<&Measurement> {
        let next = (self.selected + 1).min(self.scans.len().saturating_sub(1));
        self.select(next)
    }

    /// Move the selection one scan back, stopping at the first scan.
    pub fn select_previous(&mut self) -> Option<&Measurement> {
        self.select(self.selected.saturating_sub(1))
    }

    pub fn dependence(&self) -> DependenceMode {
        self.constraints.dependence
    }

    pub fn set_dependence(&mut self, dependence: DependenceMode) {
        self.constraints.dependence = dependence;
        for scan in &mut self.scans {
            scan.set_dependence(dependence);
        }
    }

    pub fn toggle_dependence(&mut self) -> DependenceMode {
        let next = self.constraints.dependence.toggled();
        self.set_dependence(next);
        next
    }

    pub fn toggle_auto_accept(&mut self) -> bool {
        self.constraints.auto_accept_click = !self.constraints.auto_accept_click;
        self.constraints.auto_accept_click
    }

    /// Chained refit over `order` (scan indices).
    ///
    /// The first scan gets a multi-start fit. Each later scan is force-fit from
    /// the previous scan's parameters with its center locked to the previous
    /// center; from the third scan on, a non-forced pass from the scan two back
    /// follows.
    pub fn refit(&mut self, order: &[usize], reverse: bool, sign: Option<Sign>) -> Result<(), ScanError> {
        let bounds = self.constraints.snapshot();
        let mut order = order.to_vec();
        if reverse {
            order.reverse();
        }
        if let Some(&bad) = order.iter().find(|&&i| i >= self.scans.len()) {
            return Err(ScanError::new(
                bad,
                f64::NAN,
                FitError::invalid_input(format!("no scan with index {bad} (sequence has {})", self.scans.len())),
            ));
        }

        for (k, &index) in order.iter().enumerate() {
            if k == 0 {
                let request = FitRequest::multi_start().with_sign_lock(sign).notifying();
                self.fit_scan(index, &request, &bounds)?;
                continue;
            }

            let previous = self.scans[order[k - 1]].best().map(|f| f.params);
            let request = match previous {
                Some(p) => FitRequest::from_guess(p)
                    .with_center_lock(p.center())
                    .with_sign_lock(sign)
                    .forced()
                    .notifying(),
                None => FitRequest::multi_start().with_sign_lock(sign).notifying(),
            };
            self.fit_scan(index, &request, &bounds)?;

            if k >= 2 {
                if let Some(p) = self.scans[order[k - 2]].best().map(|f| f.params) {
                    let request = FitRequest::from_guess(p)
                        .with_center_lock(p.center())
                        .with_sign_lock(sign)
                        .notifying();
                    self.fit_scan(index, &request, &bounds)?;
                }
            }
        }
        Ok(())
    }

    /// `refit` over the whole sequence.
    pub fn refit_all(&mut self, reverse: bool, sign: Option<Sign>) -> Result<(), ScanError> {
        let order: Vec<usize> = (0..self.scans.len()).collect();
        self.refit(&order, reverse, sign)
    }

    /// Independent multi-start refit of every scan.
    pub fn refit_centers(&mut self, sign: Option<Sign>) -> Result<RefitSummary, ScanError> {
        let bounds = self.constraints.snapshot();
        let lm = &self.lm;
        let started = Instant::now();
        let request = FitRequest::multi_start().with_sign_lock(sign);

        let changed: Vec<bool> = self
            .scans
            .par_iter_mut()
            .enumerate()
            .map(|(i, scan)| {
                let time = scan.time();
                scan.fit(&request, &bounds, lm)
                    .map(|outcome| outcome.changed)
                    .map_err(|e| ScanError::new(i, time, e))
            })
            .collect::<Result<_, _>>()?;

        let summary = RefitSummary {
            refitted: changed.iter().filter(|&&c| c).count(),
            total: self.scans.len(),
            elapsed: started.elapsed(),
        };
        log::info!("{summary}");
        Ok(summary)
    }

    /// Multi-start refit of every reference slot.
    pub fn refit_reference_all(&mut self) -> Result<RefitSummary, ScanError> {
        let bounds = self.constraints.snapshot();
        let lm = &self.lm;
        let started = Instant::now();
        let request = FitRequest::multi_start();

        let changed: Vec<bool> = self
            .scans
            .par_iter_mut()
            .enumerate()
            .map(|(i, scan)| {
                let time = scan.time();
                scan.original_fit(&request, &bounds, lm)
                    .map(|outcome| outcome.changed)
                    .map_err(|e| ScanError::new(i, time, e))
            })
            .collect::<Result<_, _>>()?;

        let summary = RefitSummary {
            refitted: changed.iter().filter(|&&c| c).count(),
            total: self.scans.len(),
            elapsed: started.elapsed(),
        };
        log::info!("Reference fits: {summary}");
        Ok(summary)
    }

    /// Refit the reference slot of one scan.
    pub fn refit_reference(&mut self, index: usize) -> Result<FitOutcome, ScanError> {
        let bounds = self.constraints.snapshot();
        let scan = scan_at(&mut self.scans, index)?;
        let time = scan.time();
        let outcome = scan
            .original_fit(&FitRequest::multi_start().notifying(), &bounds, &self.lm)
            .map_err(|e| ScanError::new(index, time, e))?;
        log_notice(&outcome);
        Ok(outcome)
    }

    /// Remove a voltage step from one scan and refit it.
    pub fn correct_offset(
        &mut self,
        index: usize,
        breakpoint: usize,
        slope: Option<f64>,
    ) -> Result<FitOutcome, ScanError> {
        let bounds = self.constraints.snapshot();
        let scan = scan_at(&mut self.scans, index)?;
        let time = scan.time();
        let outcome = scan
            .correct_offset(breakpoint, slope, &bounds, &self.lm)
            .map_err(|e| ScanError::new(index, time, e))?;
        log_notice(&outcome);
        Ok(outcome)
    }

    /// Undo offset corrections of one scan and refit it.
    pub fn reset_offset(&mut self, index: usize) -> Result<FitOutcome, ScanError> {
        let bounds = self.constraints.snapshot();
        let scan = scan_at(&mut self.scans, index)?;
        let time = scan.time();
        let outcome = scan
            .reset_offset(&bounds, &self.lm)
            .map_err(|e| ScanError::new(index, time, e))?;
        log_notice(&outcome);
        Ok(outcome)
    }

    /// Single fit of the selected scan starting from its current best
    /// parameters; stored only if chi2 improves.
    pub fn optimise_selected(&mut self) -> Result<ProbeOutcome, ScanError> {
        let index = self.selected;
        let bounds = self.constraints.snapshot();
        let scan = scan_at(&mut self.scans, index)?;
        let guess = scan.best().map_or_else(|| scan.default_guess(), |f| f.params);
        Self::probe_and_offer(scan, index, guess, &bounds, &self.lm, true)
    }

    /// Fit the selected scan with the center guess taken from a picked position.
    ///
    /// An improving candidate is stored only when auto-accept is on.
    pub fn click_fit(&mut self, position: f64) -> Result<ProbeOutcome, ScanError> {
        let index = self.selected;
        let bounds = self.constraints.snapshot();
        let auto_accept = self.constraints.auto_accept_click;
        let scan = scan_at(&mut self.scans, index)?;
        let guess = scan.default_guess().with(Param::Center, -position);
        let outcome = Self::probe_and_offer(scan, index, guess, &bounds, &self.lm, auto_accept)?;
        if outcome.improved && !auto_accept {
            log::info!("Better fit found for scan {index}; not updated (auto-accept is off)");
        }
        Ok(outcome)
    }

    fn probe_and_offer(
        scan: &mut Measurement,
        index: usize,
        guess: Params,
        bounds: &Bounds,
        lm: &LmConfig,
        store: bool,
    ) -> Result<ProbeOutcome, ScanError> {
        let candidate = scan
            .probe(guess, bounds, lm)
            .map_err(|e| ScanError::new(index, scan.time(), e))?;
        let improved = scan.best().is_none_or(|f| candidate.chi2 < f.chi2);
        let accepted = store && scan.offer(candidate);
        if accepted {
            log::info!("Better fit found for scan {index}: chi2 {:.3e}", candidate.chi2);
        }
        Ok(ProbeOutcome {
            candidate,
            improved,
            accepted,
        })
    }

    /// Indices of scans whose best chi2 exceeds `chi2_bound` (or that have no fit).
    pub fn bad_fits(&self, chi2_bound: f64) -> Vec<usize> {
        self.scans
            .iter()
            .enumerate()
            .filter(|(_, s)| s.best().is_none_or(|f| f.chi2 > chi2_bound))
            .map(|(i, _)| i)
            .collect()
    }

    /// Moment, inverse susceptibility and chi2 against the dependent variable,
    /// for scans with a best chi2 below `chi2_bound`.
    pub fn dependence_series(&self, chi2_bound: f64) -> Vec<DependencePoint> {
        self.scans
            .iter()
            .enumerate()
            .filter_map(|(index, scan)| {
                let best = scan.best().filter(|f| f.chi2 < chi2_bound)?;
                let reference = scan.reference();
                let best_moment = best.moment();
                let reference_moment = reference.map(|r| r.fit.moment());
                Some(DependencePoint {
                    index,
                    dependent: scan.dependent(),
                    best_moment,
                    reference_moment,
                    best_inverse_susceptibility: scan.field() / best_moment,
                    reference_inverse_susceptibility: reference_moment.map(|m| scan.field() / m),
                    best_chi2: best.chi2,
                    reference_chi2: reference.map(|r| r.observed_chi2),
                })
            })
            .collect()
    }

    /// Fitted parameters against the dependent variable, filtered like
    /// `dependence_series`.
    pub fn parameter_series(&self, chi2_bound: f64) -> Vec<ParameterPoint> {
        self.scans
            .iter()
            .enumerate()
            .filter_map(|(index, scan)| {
                let best = scan.best().filter(|f| f.chi2 < chi2_bound)?;
                Some(ParameterPoint {
                    index,
                    dependent: scan.dependent(),
                    best: best.params,
                    reference: scan.reference().map(|r| r.fit.params),
                })
            })
            .collect()
    }

    /// One export row per scan, in sequence order.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.scans
            .iter()
            .enumerate()
            .map(|(i, scan)| scan.export_row(i))
            .collect()
    }

    fn fit_scan(&mut self, index: usize, request: &FitRequest, bounds: &Bounds) -> Result<FitOutcome, ScanError> {
        let scan = &mut self.scans[index];
        let time = scan.time();
        let outcome = scan
            .fit(request, bounds, &self.lm)
            .map_err(|e| ScanError::new(index, time, e))?;
        log_notice(&outcome);
        Ok(outcome)
    }
}

fn scan_at(scans: &mut [Measurement], index: usize) -> Result<&mut Measurement, ScanError> {
    let len = scans.len();
    scans.get_mut(index).ok_or_else(|| {
        ScanError::new(
            index,
            f64::NAN,
            FitError::invalid_input(format!("no scan with index {index} (sequence has {len})")),
        )
    })
}

fn log_notice(outcome: &FitOutcome) {
    if let Some(notice) = &outcome.notice {
        log::info!("{notice}");
    }
}
