//! Box-constrained Levenberg-Marquardt least squares.
//!
//! Residuals are `y − f(t; p)`. Every trial point is projected onto the
//! parameter box, and the Jacobian is taken by central differences, so
//! models only need to provide evaluation.

use serde::{Deserialize, Serialize};

use crate::linalg;

/// Damping above this gives up on the current start.
const LAMBDA_CEILING: f64 = 1e10;

/// Solver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    pub max_iterations: usize,
    pub initial_lambda: f64,
    /// Factor applied to lambda after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to lambda after an accepted step.
    pub lambda_down: f64,
    /// Relative parameter change below which the fit counts as converged.
    pub tolerance: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            tolerance: 1e-10,
        }
    }
}

/// A curve `f(t; p)` that can be fitted.
pub trait CurveModel: Sync {
    fn evaluate(&self, t: f64, params: &[f64]) -> f64;
}

/// Result of one solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub rss: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize the residual sum of squares from `start` within `[lower, upper]`.
///
/// Returns `None` when the starting point already evaluates to a non-finite
/// RSS.
pub fn minimize<M: CurveModel + ?Sized>(
    model: &M,
    t: &[f64],
    y: &[f64],
    start: &[f64],
    lower: &[f64],
    upper: &[f64],
    config: &LmConfig,
) -> Option<LmOutcome> {
    let n_params = start.len();
    let mut params = start.to_vec();
    project(&mut params, lower, upper);

    let mut rss = residual_sum(model, t, y, &params);
    if !rss.is_finite() {
        return None;
    }

    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;
    let mut jacobian = Vec::with_capacity(t.len());
    let mut residuals = Vec::with_capacity(t.len());

    while iterations < config.max_iterations {
        iterations += 1;
        if rss <= f64::EPSILON * f64::EPSILON {
            converged = true;
            break;
        }

        fill_jacobian_residuals(model, t, y, &params, lower, upper, &mut jacobian, &mut residuals);
        let (hessian, gradient) = hessian_gradient(&jacobian, &residuals, n_params);
        let max_diag = (0..n_params).map(|i| hessian[i][i]).fold(0.0f64, f64::max);
        if !max_diag.is_finite() {
            break;
        }

        // Retry with growing damping until a step lowers the RSS.
        let mut accepted = false;
        while lambda <= LAMBDA_CEILING {
            let mut damped = hessian.clone();
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += lambda * row[i].max(1e-9 * max_diag).max(f64::MIN_POSITIVE);
            }
            let Some(delta) = linalg::solve(&damped, &gradient) else {
                lambda *= config.lambda_up;
                continue;
            };

            let mut trial: Vec<f64> = params.iter().zip(&delta).map(|(p, d)| p + d).collect();
            project(&mut trial, lower, upper);
            let trial_rss = residual_sum(model, t, y, &trial);

            if trial_rss.is_finite() && trial_rss < rss {
                let step = params
                    .iter()
                    .zip(&trial)
                    .map(|(p, q)| (q - p).abs() / p.abs().max(1e-12))
                    .fold(0.0f64, f64::max);
                let improvement = (rss - trial_rss) / rss.max(f64::MIN_POSITIVE);
                params = trial;
                rss = trial_rss;
                lambda = (lambda * config.lambda_down).max(1e-12);
                accepted = true;
                if step < config.tolerance || improvement < config.tolerance {
                    converged = true;
                }
                break;
            }
            lambda *= config.lambda_up;
        }

        if !accepted || converged {
            break;
        }
    }

    Some(LmOutcome {
        params,
        rss,
        iterations,
        converged,
    })
}

/// Clamp each parameter into its bounds.
pub fn project(params: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((p, &lo), &hi) in params.iter_mut().zip(lower).zip(upper) {
        *p = p.clamp(lo, hi);
    }
}

pub fn residual_sum<M: CurveModel + ?Sized>(model: &M, t: &[f64], y: &[f64], params: &[f64]) -> f64 {
    t.iter()
        .zip(y)
        .map(|(&ti, &yi)| {
            let r = yi - model.evaluate(ti, params);
            r * r
        })
        .sum()
}

#[allow(clippy::too_many_arguments)]
fn fill_jacobian_residuals<M: CurveModel + ?Sized>(
    model: &M,
    t: &[f64],
    y: &[f64],
    params: &[f64],
    lower: &[f64],
    upper: &[f64],
    jacobian: &mut Vec<Vec<f64>>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    let n_params = params.len();
    let mut plus = params.to_vec();
    let mut minus = params.to_vec();
    // Per-parameter steps, shrunk to stay inside the box.
    let steps: Vec<(f64, f64)> = (0..n_params)
        .map(|i| {
            let h = 1e-6 * params[i].abs().max(1e-2);
            let up = (params[i] + h).min(upper[i]);
            let down = (params[i] - h).max(lower[i]);
            (up, down)
        })
        .collect();

    for (&ti, &yi) in t.iter().zip(y) {
        let mut row = Vec::with_capacity(n_params);
        for (i, &(up, down)) in steps.iter().enumerate() {
            plus[i] = up;
            minus[i] = down;
            let width = up - down;
            let d = if width > 0.0 {
                (model.evaluate(ti, &plus) - model.evaluate(ti, &minus)) / width
            } else {
                0.0
            };
            row.push(if d.is_finite() { d } else { 0.0 });
            plus[i] = params[i];
            minus[i] = params[i];
        }
        jacobian.push(row);
        residuals.push(yi - model.evaluate(ti, params));
    }
}

/// `JᵀJ` and `Jᵀr`.
#[allow(clippy::needless_range_loop)]
fn hessian_gradient(jacobian: &[Vec<f64>], residuals: &[f64], n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut hessian = vec![vec![0.0; n]; n];
    let mut gradient = vec![0.0; n];

    for (row, &r) in jacobian.iter().zip(residuals) {
        for i in 0..n {
            gradient[i] += row[i] * r;
            for j in i..n {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 1..n {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }
    (hessian, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line;

    impl CurveModel for Line {
        fn evaluate(&self, t: f64, p: &[f64]) -> f64 {
            p[0] + p[1] * t
        }
    }

    struct Decay;

    impl CurveModel for Decay {
        fn evaluate(&self, t: f64, p: &[f64]) -> f64 {
            p[0] * (-p[1] * t).exp()
        }
    }

    fn axis(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_line_fit() {
        let t = axis(20, 0.5);
        let y: Vec<f64> = t.iter().map(|x| 2.0 - 0.5 * x).collect();
        let inf = f64::INFINITY;
        let outcome = minimize(&Line, &t, &y, &[0.0, 0.0], &[-inf, -inf], &[inf, inf], &LmConfig::default())
            .unwrap();
        assert!((outcome.params[0] - 2.0).abs() < 1e-6);
        assert!((outcome.params[1] + 0.5).abs() < 1e-6);
        assert!(outcome.rss < 1e-10);
    }

    #[test]
    fn test_exponential_fit() {
        let t = axis(40, 0.1);
        let y: Vec<f64> = t.iter().map(|x| 7.0 * (-1.3 * x).exp()).collect();
        let outcome = minimize(
            &Decay,
            &t,
            &y,
            &[3.0, 0.5],
            &[0.0, 0.0],
            &[100.0, 10.0],
            &LmConfig::default(),
        )
        .unwrap();
        assert!((outcome.params[0] - 7.0).abs() < 1e-4);
        assert!((outcome.params[1] - 1.3).abs() < 1e-4);
    }

    #[test]
    fn test_bounds_are_respected() {
        let t = axis(20, 0.5);
        let y: Vec<f64> = t.iter().map(|x| 2.0 - 0.5 * x).collect();
        let outcome = minimize(&Line, &t, &y, &[0.0, 0.0], &[0.0, 0.0], &[10.0, 10.0], &LmConfig::default())
            .unwrap();
        assert!(outcome.params[1] >= 0.0);
        assert!(outcome.params.iter().all(|p| (0.0..=10.0).contains(p)));
    }

    #[test]
    fn test_start_is_projected() {
        let mut p = vec![-5.0, 50.0];
        project(&mut p, &[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(p, vec![0.0, 1.0]);
    }

    #[test]
    fn test_non_finite_start_rejected() {
        struct Broken;
        impl CurveModel for Broken {
            fn evaluate(&self, _t: f64, _p: &[f64]) -> f64 {
                f64::NAN
            }
        }
        let t = axis(5, 1.0);
        assert!(minimize(&Broken, &t, &t, &[1.0], &[0.0], &[2.0], &LmConfig::default()).is_none());
    }
}
