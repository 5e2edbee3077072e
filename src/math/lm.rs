//! Levenberg-Marquardt least squares for the four-parameter response model.
//!
//! The model is treated as a black box `Params -> Response`:
//!
//! - the Jacobian is built from forward differences
//! - a `Response::Penalty` counts as a uniformly bad curve, so infeasible trial
//!   steps are simply rejected and the damping grows until the step stays
//!   inside the feasible region
//! - near a constraint edge, a difference column whose forward probe is
//!   infeasible falls back to a backward probe (zero if both are infeasible)
//!
//! The damped normal equations are solved in Jacobi-scaled form. Parameter
//! magnitudes differ by many orders (amplitudes around `1e-6`, centers around
//! `1`), and scaling keeps the 4x4 system well conditioned.

use std::cell::Cell;

use nalgebra::{Matrix4, Vector4};

use crate::domain::{N_PARAMS, Params};
use crate::error::FitError;
use crate::models::Response;

/// Relative step for forward differences (`sqrt(f64::EPSILON)`).
const DIFF_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LmConfig {
    /// Maximum number of accepted steps before giving up.
    pub max_iterations: usize,
    /// Stop when an accepted step reduces the SSR by less than this fraction.
    pub ftol: f64,
    /// Stop when the scaled step is this small relative to the scaled parameters.
    pub xtol: f64,
    /// Stop when the residual is this orthogonal to every Jacobian column.
    pub gtol: f64,
    /// Initial damping.
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step.
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step.
    pub lambda_down: f64,
    /// Damping beyond which no further progress is possible.
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Residual is (numerically) zero.
    ExactFit,
    /// Gradient test passed.
    Gradient,
    /// Relative SSR reduction below `ftol`.
    Reduction,
    /// Scaled step below `xtol`.
    Step,
    /// No downhill step exists at any damping.
    Stationary,
}

/// Fitted parameters plus what a caller needs to score them.
#[derive(Debug, Clone, PartialEq)]
pub struct LmSolution {
    pub params: Params,
    /// `(J^T J)^-1 * SSR / (n - 4)`; `None` when singular.
    pub covariance: Option<Matrix4<f64>>,
    /// Sum of squared residuals of the constrained model.
    pub ssr: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

/// Minimise `sum (y_i - model(p)_i)^2` starting from `guess`.
///
/// The starting point must be feasible (the model must not return a penalty
/// there); callers project their guesses first.
pub fn least_squares<F>(model: F, y: &[f64], guess: Params, config: &LmConfig) -> Result<LmSolution, FitError>
where
    F: Fn(&Params) -> Response,
{
    let n = y.len();
    if n <= N_PARAMS {
        return Err(FitError::Degenerate { samples: n });
    }
    if !guess.is_finite() {
        return Err(FitError::non_convergence(format!("non-finite starting point {guess}")));
    }

    let evaluations = Cell::new(0usize);
    let eval = |p: &Params| {
        evaluations.set(evaluations.get() + 1);
        model(p)
    };

    let mut p = guess;
    let mut f = eval(&p);
    if f.is_penalty() {
        return Err(FitError::non_convergence(format!(
            "starting point {guess} violates the fit constraints"
        )));
    }
    let mut cost = ssr(y, &f);
    if !cost.is_finite() {
        return Err(FitError::non_convergence("non-finite residuals at the starting point"));
    }

    let mut lambda = config.initial_lambda;
    let mut termination = None;
    let mut iterations = 0usize;

    'outer: while iterations < config.max_iterations {
        if cost <= f64::MIN_POSITIVE {
            termination = Some(Termination::ExactFit);
            break;
        }

        let jac = jacobian(&eval, &p, &f, n);
        let (a, g) = normal_equations(&jac, y, &f);
        let scale = column_scale(&a);

        let gnorm = (0..N_PARAMS)
            .map(|j| (g[j] / (scale[j] * cost.sqrt())).abs())
            .fold(0.0_f64, f64::max);
        if gnorm <= config.gtol {
            termination = Some(Termination::Gradient);
            break;
        }

        loop {
            let Some(delta) = solve_damped(&a, &g, &scale, lambda) else {
                lambda *= config.lambda_up;
                if lambda > config.max_lambda {
                    termination = Some(Termination::Stationary);
                    break 'outer;
                }
                continue;
            };

            let mut trial = p;
            for j in 0..N_PARAMS {
                trial.0[j] += delta[j];
            }
            let f_trial = if trial.is_finite() { Some(eval(&trial)) } else { None };
            let cost_trial = f_trial.as_ref().map_or(f64::INFINITY, |r| ssr(y, r));

            if cost_trial < cost {
                let reduction = (cost - cost_trial) / cost;
                let step_norm = scaled_norm(&delta, &scale);
                let param_norm = scaled_norm(&p.0, &scale);

                p = trial;
                if let Some(f_trial) = f_trial {
                    f = f_trial;
                }
                cost = cost_trial;
                lambda = (lambda * config.lambda_down).max(1e-15);
                iterations += 1;

                if reduction <= config.ftol {
                    termination = Some(Termination::Reduction);
                    break 'outer;
                }
                if step_norm <= config.xtol * (param_norm + config.xtol) {
                    termination = Some(Termination::Step);
                    break 'outer;
                }
                break;
            }

            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                termination = Some(Termination::Stationary);
                break 'outer;
            }
        }
    }

    let Some(termination) = termination else {
        return Err(FitError::non_convergence(format!(
            "no convergence after {} iterations ({} model evaluations)",
            config.max_iterations,
            evaluations.get()
        )));
    };

    let jac = jacobian(&eval, &p, &f, n);
    let (a, _) = normal_equations(&jac, y, &f);
    let covariance = covariance(&a, cost, n);

    log::debug!(
        "LM finished: {:?} after {} steps, {} evaluations, ssr={:.3e}, params={}",
        termination,
        iterations,
        evaluations.get(),
        cost,
        p
    );

    Ok(LmSolution {
        params: p,
        covariance,
        ssr: cost,
        iterations,
        evaluations: evaluations.get(),
        termination,
    })
}

/// Sum of squared residuals against a (possibly penalised) response.
pub fn ssr(y: &[f64], response: &Response) -> f64 {
    y.iter()
        .enumerate()
        .map(|(i, &yi)| {
            let r = yi - response.at(i);
            r * r
        })
        .sum()
}

/// Forward-difference Jacobian of the model (rows = samples).
fn jacobian<F>(eval: &F, p: &Params, f0: &Response, n: usize) -> Vec<[f64; N_PARAMS]>
where
    F: Fn(&Params) -> Response,
{
    let mut jac = vec![[0.0; N_PARAMS]; n];

    for j in 0..N_PARAMS {
        let h = difference_step(p.0[j]);

        let mut forward = *p;
        forward.0[j] += h;
        let probe = eval(&forward);
        if !probe.is_penalty() {
            for (i, row) in jac.iter_mut().enumerate() {
                row[j] = (probe.at(i) - f0.at(i)) / h;
            }
            continue;
        }

        let mut backward = *p;
        backward.0[j] -= h;
        let probe = eval(&backward);
        if !probe.is_penalty() {
            for (i, row) in jac.iter_mut().enumerate() {
                row[j] = (f0.at(i) - probe.at(i)) / h;
            }
        }
    }

    jac
}

fn difference_step(value: f64) -> f64 {
    let h = DIFF_STEP * value.abs();
    if h == 0.0 { DIFF_STEP } else { h }
}

/// `J^T J` and `J^T r` with `r = y - f`.
fn normal_equations(jac: &[[f64; N_PARAMS]], y: &[f64], f: &Response) -> (Matrix4<f64>, Vector4<f64>) {
    let mut a = Matrix4::<f64>::zeros();
    let mut g = Vector4::<f64>::zeros();

    for (i, row) in jac.iter().enumerate() {
        let r = y[i] - f.at(i);
        for k in 0..N_PARAMS {
            g[k] += row[k] * r;
            for l in k..N_PARAMS {
                a[(k, l)] += row[k] * row[l];
            }
        }
    }
    for k in 1..N_PARAMS {
        for l in 0..k {
            a[(k, l)] = a[(l, k)];
        }
    }

    (a, g)
}

/// Column norms of the Jacobian; 1 for columns that carry no information.
fn column_scale(a: &Matrix4<f64>) -> [f64; N_PARAMS] {
    let mut scale = [1.0; N_PARAMS];
    for (j, s) in scale.iter_mut().enumerate() {
        let d = a[(j, j)].sqrt();
        if d.is_finite() && d > 0.0 {
            *s = d;
        }
    }
    scale
}

/// Solve `(S A S + lambda I) z = S g`, `delta = S z`, with `S = diag(1/scale)`.
fn solve_damped(
    a: &Matrix4<f64>,
    g: &Vector4<f64>,
    scale: &[f64; N_PARAMS],
    lambda: f64,
) -> Option<[f64; N_PARAMS]> {
    let mut m = Matrix4::<f64>::zeros();
    let mut b = Vector4::<f64>::zeros();
    for k in 0..N_PARAMS {
        b[k] = g[k] / scale[k];
        for l in 0..N_PARAMS {
            m[(k, l)] = a[(k, l)] / (scale[k] * scale[l]);
        }
        m[(k, k)] += lambda;
    }

    let z = m.cholesky()?.solve(&b);
    let mut delta = [0.0; N_PARAMS];
    for k in 0..N_PARAMS {
        delta[k] = z[k] / scale[k];
    }
    delta.iter().all(|d| d.is_finite()).then_some(delta)
}

fn scaled_norm(v: &[f64; N_PARAMS], scale: &[f64; N_PARAMS]) -> f64 {
    v.iter()
        .zip(scale.iter())
        .map(|(x, s)| (x * s).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn covariance(a: &Matrix4<f64>, cost: f64, n: usize) -> Option<Matrix4<f64>> {
    let inv = a.try_inverse()?;
    let cov = inv * (cost / (n - N_PARAMS) as f64);
    cov.iter().all(|v| v.is_finite()).then_some(cov)
}
