//! Kinetic perfusion models and their seeds, bounds and derived parameters.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use super::lm::CurveModel;
use crate::filters;
use crate::metrics;

/// Floor on `t − t0` inside the bolus models.
const TAU_FLOOR: f64 = 1e-9;

/// Curve families fitted to a TIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KineticModel {
    /// Lognormal bolus `AUC, μ, σ, t0, C`.
    LogNormal,
    /// Gamma variate `AUC, α, β, t0, C`.
    GammaVariate,
    /// Local density random walk `AUC, μ, λ, t0, C`.
    Ldrw,
    /// First passage time `AUC, μ, λ, t0, C`.
    Fpt,
    /// Mono-exponential wash-in `A (1 − e^(−Bt))`.
    WashIn,
}

/// Parameter box for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Caller-supplied starting values for the bolus offset parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedHints {
    pub t0: Option<f64>,
    pub baseline: Option<f64>,
}

/// Quantities derived from fitted parameters.
///
/// `mtt` is relative to the onset `t0`; `ttp` is absolute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedParams {
    pub mtt: f64,
    pub ttp: f64,
    /// `A·B`, wash-in only.
    pub initial_slope: Option<f64>,
}

/// Length of the early segment used for the wash-in slope fallback.
const EARLY_SECS: f64 = 2.0;

impl KineticModel {
    pub const ALL: [KineticModel; 5] = [
        KineticModel::LogNormal,
        KineticModel::GammaVariate,
        KineticModel::Ldrw,
        KineticModel::Fpt,
        KineticModel::WashIn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LogNormal => "lognormal",
            Self::GammaVariate => "gamma",
            Self::Ldrw => "ldrw",
            Self::Fpt => "fpt",
            Self::WashIn => "washin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            Self::LogNormal => &["AUC", "mu", "sigma", "t0", "C"],
            Self::GammaVariate => &["AUC", "alpha", "beta", "t0", "C"],
            Self::Ldrw | Self::Fpt => &["AUC", "mu", "lambda", "t0", "C"],
            Self::WashIn => &["A", "B"],
        }
    }

    /// Position in [`KineticModel::ALL`], independent of any request.
    pub fn ordinal(&self) -> u64 {
        match self {
            Self::LogNormal => 0,
            Self::GammaVariate => 1,
            Self::Ldrw => 2,
            Self::Fpt => 3,
            Self::WashIn => 4,
        }
    }

    pub fn param_count(&self) -> usize {
        self.param_names().len()
    }

    /// Smallest number of samples a fit is attempted on.
    pub fn min_points(&self) -> usize {
        match self {
            Self::WashIn => 3,
            _ => 5,
        }
    }

    pub fn is_bolus(&self) -> bool {
        !matches!(self, Self::WashIn)
    }

    /// Model value at `t`. Outside the support (`t ≤ t0`) bolus models
    /// return the baseline `C`.
    pub fn value(&self, t: f64, p: &[f64]) -> f64 {
        if let Self::WashIn = self {
            return p[0] * (1.0 - (-p[1] * t).exp());
        }
        let (auc, a, b, t0, c) = (p[0], p[1], p[2], p[3], p[4]);
        if t <= t0 {
            return c;
        }
        if auc <= 0.0 {
            return c;
        }
        let tau = (t - t0).max(TAU_FLOOR);
        let ln_tau = tau.ln();
        // Shapes are evaluated in the log domain.
        let log_shape = match self {
            Self::LogNormal => {
                let (mu, sigma) = (a, b);
                if sigma <= 0.0 {
                    return f64::NAN;
                }
                -(2.0 * std::f64::consts::PI).sqrt().ln() - sigma.ln() - ln_tau
                    - (ln_tau - mu).powi(2) / (2.0 * sigma * sigma)
            }
            Self::GammaVariate => {
                let (alpha, beta) = (a, b);
                if beta <= 0.0 || alpha <= -1.0 {
                    return f64::NAN;
                }
                alpha * ln_tau - tau / beta - (alpha + 1.0) * beta.ln() - ln_gamma(alpha + 1.0)
            }
            Self::Ldrw => {
                let (mu, lambda) = (a, b);
                if mu <= 0.0 || lambda <= 0.0 {
                    return f64::NAN;
                }
                lambda - mu.ln() + 0.5 * ((mu * lambda).ln() - (2.0 * std::f64::consts::PI * tau).ln())
                    - 0.5 * lambda * (mu / tau + tau / mu)
            }
            Self::Fpt => {
                let (mu, lambda) = (a, b);
                if mu <= 0.0 || lambda <= 0.0 {
                    return f64::NAN;
                }
                lambda - mu.ln() + 0.5 * (lambda / (2.0 * std::f64::consts::PI)).ln()
                    + 1.5 * (mu.ln() - ln_tau)
                    - 0.5 * lambda * (mu / tau + tau / mu)
            }
            Self::WashIn => unreachable!("handled above"),
        };
        (auc.ln() + log_shape).exp() + c
    }

    /// Default parameter box for data `(t, y)`.
    pub fn default_bounds(&self, t: &[f64], y: &[f64]) -> Bounds {
        let t_max = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let t_max = if t_max.is_finite() { t_max } else { 1.0 };
        let c_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(1.0);
        let inf = f64::INFINITY;
        let (lower, upper) = match self {
            Self::LogNormal => (vec![0.0, 0.0, 1e-2, 0.0, 0.0], vec![inf, 10.0, 2.0, t_max, c_max]),
            Self::GammaVariate => (vec![0.0, 1e-3, 1e-3, 0.0, 0.0], vec![inf, 20.0, 20.0, t_max, c_max]),
            Self::Ldrw | Self::Fpt => {
                (vec![0.0, 1e-3, 1e-3, 0.0, 0.0], vec![inf, 100.0, 20.0, t_max, c_max])
            }
            Self::WashIn => (vec![0.0, 1e-3], vec![1e4, 5.0]),
        };
        Bounds { lower, upper }
    }

    /// Data-driven starting point.
    pub fn seed(&self, t: &[f64], y: &[f64], hints: &SeedHints) -> Vec<f64> {
        if let Self::WashIn = self {
            return washin_seed(t, y);
        }

        let t0 = hints.t0.or_else(|| t.first().copied()).unwrap_or(0.0);
        let c = hints
            .baseline
            .unwrap_or_else(|| filters::percentile(&mut y.to_vec(), 10.0));
        let c = if c.is_finite() { c } else { 0.0 };
        let excess: Vec<f64> = y.iter().map(|v| (v - c).max(0.0)).collect();
        let auc = trapezoid(t, &excess).max(TAU_FLOOR);
        let offsets: Vec<f64> = t.iter().map(|v| v - t0).collect();

        match self {
            Self::LogNormal => {
                let mu = filters::median(&mut offsets.clone()).max(TAU_FLOOR).ln().max(0.0);
                vec![auc, mu, 0.5, t0, c]
            }
            Self::GammaVariate => vec![auc, 2.0, std_dev(&offsets).max(0.5), t0, c],
            _ => {
                let mu = filters::median(&mut offsets.clone()).max(0.5);
                vec![auc, mu, 2.0, t0, c]
            }
        }
    }

    /// MTT, TTP and, for wash-in, the initial slope.
    pub fn derived(&self, p: &[f64]) -> DerivedParams {
        let (mtt, ttp) = match self {
            Self::LogNormal => {
                let (mu, sigma, t0) = (p[1], p[2], p[3]);
                ((mu + sigma * sigma / 2.0).exp(), t0 + (mu - sigma * sigma).exp())
            }
            Self::GammaVariate => {
                let (alpha, beta, t0) = (p[1], p[2], p[3]);
                ((alpha + 1.0) * beta, t0 + alpha * beta)
            }
            Self::Ldrw => {
                let (mu, lambda, t0) = (p[1], p[2], p[3]);
                let mode = mu * ((1.0 + 4.0 * lambda * lambda).sqrt() - 1.0) / (2.0 * lambda);
                (mu * (1.0 + 1.0 / lambda), t0 + mode)
            }
            Self::Fpt => {
                let (mu, lambda, t0) = (p[1], p[2], p[3]);
                let mode = mu * ((1.0 + 9.0 / (4.0 * lambda * lambda)).sqrt() - 3.0 / (2.0 * lambda));
                (mu, t0 + mode)
            }
            Self::WashIn => {
                return DerivedParams {
                    mtt: f64::NAN,
                    ttp: f64::NAN,
                    initial_slope: Some(p[0] * p[1]),
                }
            }
        };
        DerivedParams {
            mtt,
            ttp,
            initial_slope: None,
        }
    }
}

impl std::fmt::Display for KineticModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl CurveModel for KineticModel {
    fn evaluate(&self, t: f64, params: &[f64]) -> f64 {
        self.value(t, params)
    }
}

/// `A0` from the plateau, `B0` from the half-rise time, falling back to the
/// early slope.
fn washin_seed(t: &[f64], y: &[f64]) -> Vec<f64> {
    let a0 = y.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(1e-6);
    let t0 = t.first().copied().unwrap_or(0.0);

    let half = 0.5 * a0;
    let t_half = t
        .iter()
        .zip(y)
        .find(|(_, v)| **v >= half)
        .map(|(&ti, _)| ti - t0)
        .filter(|dt| *dt > 0.0);

    let b0 = match t_half {
        Some(dt) => std::f64::consts::LN_2 / dt,
        None => early_slope(t, y, t0) / a0,
    };
    let b0 = if b0.is_finite() { b0.clamp(1e-5, 5.0) } else { 0.5 };
    vec![a0, b0]
}

/// Least-squares slope over the first [`EARLY_SECS`] after `t0`, or over the
/// first five samples when that segment has fewer than two.
fn early_slope(t: &[f64], y: &[f64], t0: f64) -> f64 {
    let (mut te, mut ye): (Vec<f64>, Vec<f64>) = t
        .iter()
        .zip(y)
        .filter(|(ti, _)| **ti - t0 <= EARLY_SECS)
        .map(|(&ti, &yi)| (ti - t0, yi))
        .unzip();
    if te.len() < 2 {
        let m = t.len().min(5);
        te = t[..m].iter().map(|ti| ti - t0).collect();
        ye = y[..m].to_vec();
    }
    let slope = metrics::linear_slope(&te, &ye);
    if slope.is_finite() {
        slope.max(1e-6)
    } else {
        1e-3
    }
}

pub(crate) fn trapezoid(t: &[f64], y: &[f64]) -> f64 {
    t.windows(2)
        .zip(y.windows(2))
        .map(|(tw, yw)| 0.5 * (yw[0] + yw[1]) * (tw[1] - tw[0]))
        .sum()
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
