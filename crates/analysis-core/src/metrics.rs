//! Curve-shape metrics of a time-intensity curve.
//!
//! Metrics never fail: degenerate curves produce NaN entries, which callers
//! can turn into errors with [`MetricSet::require_finite`].

use ceuslab_common::{CeusError, CeusResult};
use serde::{Deserialize, Serialize};

use crate::fitting::models::trapezoid;

/// Zero time steps are replaced by this when differentiating.
const MIN_DT: f64 = 1e-9;

/// Metrics of one curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Trapezoidal area of `max(y, 0)`.
    pub auc: f64,
    /// First moment of `max(y, 0)` over its area.
    pub mtt: f64,
    /// Signed sample of largest magnitude.
    pub peak: f64,
    /// Time of [`Self::peak`].
    pub ttp: f64,
    /// Least-squares slope over samples between 10% and 90% of the peak.
    pub slope_10_90: f64,
    /// Largest `|Δy/Δt|`.
    pub max_abs_derivative: f64,
    pub mean: f64,
    /// Goodness of fit, when computed against a model curve.
    pub r_squared: Option<f64>,
}

impl MetricSet {
    fn nan() -> Self {
        Self {
            auc: f64::NAN,
            mtt: f64::NAN,
            peak: f64::NAN,
            ttp: f64::NAN,
            slope_10_90: f64::NAN,
            max_abs_derivative: f64::NAN,
            mean: f64::NAN,
            r_squared: None,
        }
    }

    /// `(name, value)` pairs in a stable order.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let mut entries = vec![
            ("AUC", self.auc),
            ("MTT", self.mtt),
            ("Peak", self.peak),
            ("TTP", self.ttp),
            ("Slope10-90", self.slope_10_90),
            ("MaxAbsDerivative", self.max_abs_derivative),
            ("Mean", self.mean),
        ];
        if let Some(r2) = self.r_squared {
            entries.push(("R-squared", r2));
        }
        entries
    }

    /// Fail on the first NaN or infinite metric.
    pub fn require_finite(&self) -> CeusResult<()> {
        match self.entries().into_iter().find(|(_, v)| !v.is_finite()) {
            Some((name, _)) => Err(CeusError::not_a_number(name)),
            None => Ok(()),
        }
    }
}

/// Metrics of `y(t)`. Non-finite samples are skipped.
pub fn compute_metrics(t: &[f64], y: &[f64]) -> MetricSet {
    let (t, y): (Vec<f64>, Vec<f64>) = t
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();

    let mut metrics = MetricSet::nan();
    if let Some((ttp, peak)) = signed_peak(&t, &y) {
        metrics.peak = peak;
        metrics.ttp = ttp;
    }
    if t.len() < 2 {
        return metrics;
    }

    let positive: Vec<f64> = y.iter().map(|v| v.max(0.0)).collect();
    let auc = trapezoid(&t, &positive);
    metrics.auc = auc;
    if auc > 0.0 {
        let moment: Vec<f64> = t.iter().zip(&positive).map(|(ti, yi)| ti * yi).collect();
        metrics.mtt = trapezoid(&t, &moment) / auc;
    }

    if metrics.peak > 0.0 {
        let (lo, hi) = (0.1 * metrics.peak, 0.9 * metrics.peak);
        let (st, sy): (Vec<f64>, Vec<f64>) = t
            .iter()
            .zip(&y)
            .filter(|(_, v)| (lo..=hi).contains(*v))
            .map(|(&a, &b)| (a, b))
            .unzip();
        metrics.slope_10_90 = linear_slope(&st, &sy);
    }

    metrics.max_abs_derivative = max_abs_derivative(&t, &y);
    metrics.mean = y.iter().sum::<f64>() / y.len() as f64;
    metrics
}

/// [`compute_metrics`] with `r_squared` of `yhat` against `y`.
pub fn compute_metrics_with_fit(t: &[f64], y: &[f64], yhat: &[f64]) -> MetricSet {
    let mut metrics = compute_metrics(t, y);
    metrics.r_squared = Some(r_squared(y, yhat));
    metrics
}

/// `1 − SS_res / (SS_tot + 1e-12)` over pairs where both values are finite.
pub fn r_squared(y: &[f64], yhat: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = y
        .iter()
        .zip(yhat)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    let mean = pairs.iter().map(|p| p.0).sum::<f64>() / pairs.len() as f64;
    let ss_res: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = pairs.iter().map(|(a, _)| (a - mean).powi(2)).sum();
    1.0 - ss_res / (ss_tot + 1e-12)
}

/// Largest `|Δy/Δt|`, NaN for fewer than two samples.
pub fn max_abs_derivative(t: &[f64], y: &[f64]) -> f64 {
    t.windows(2)
        .zip(y.windows(2))
        .map(|(tw, yw)| {
            let dt = tw[1] - tw[0];
            let dt = if dt == 0.0 { MIN_DT } else { dt };
            ((yw[1] - yw[0]) / dt).abs()
        })
        .filter(|d| !d.is_nan())
        .fold(f64::NAN, f64::max)
}

/// `(time, value)` of the largest-magnitude sample; positive wins ties.
fn signed_peak(t: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let (i_max, max) = y
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })?;
    let (i_min, min) = y
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })?;
    if max.abs() >= min.abs() {
        Some((t[i_max], max))
    } else {
        Some((t[i_min], min))
    }
}

pub(crate) fn linear_slope(t: &[f64], y: &[f64]) -> f64 {
    if t.len() < 2 {
        return f64::NAN;
    }
    let n = t.len() as f64;
    let mean_t = t.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxy: f64 = t.iter().zip(y).map(|(a, b)| (a - mean_t) * (b - mean_y)).sum();
    let sxx: f64 = t.iter().map(|a| (a - mean_t).powi(2)).sum();
    if sxx > 0.0 {
        sxy / sxx
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_metrics() {
        let t: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let y: Vec<f64> = t.iter().map(|x| 2.0 * x).collect();
        let m = compute_metrics(&t, &y);
        assert!((m.auc - 100.0).abs() < 1e-9);
        // ∫ 2t² / ∫ 2t on [0, 10] is 20/3; the trapezoid rule gives 6.7.
        assert!((m.mtt - 6.7).abs() < 1e-9);
        assert_eq!(m.peak, 20.0);
        assert_eq!(m.ttp, 10.0);
        assert!((m.slope_10_90 - 2.0).abs() < 1e-12);
        assert!((m.max_abs_derivative - 2.0).abs() < 1e-12);
        assert!((m.mean - 10.0).abs() < 1e-12);
        assert!(m.r_squared.is_none());
        assert!(m.require_finite().is_ok());
    }

    #[test]
    fn test_negative_peak_by_magnitude() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let m = compute_metrics(&t, &[0.0, 2.0, -5.0, 1.0]);
        assert_eq!(m.peak, -5.0);
        assert_eq!(m.ttp, 2.0);
        assert!(m.slope_10_90.is_nan());

        // Ties go to the positive value.
        let m = compute_metrics(&t, &[0.0, -3.0, 3.0, 1.0]);
        assert_eq!(m.peak, 3.0);
        assert_eq!(m.ttp, 2.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let m = compute_metrics(&[], &[]);
        assert!(m.peak.is_nan() && m.auc.is_nan());

        let m = compute_metrics(&[1.5], &[4.0]);
        assert_eq!(m.peak, 4.0);
        assert_eq!(m.ttp, 1.5);
        assert!(m.auc.is_nan() && m.mtt.is_nan() && m.max_abs_derivative.is_nan());

        let m = compute_metrics(&[0.0, 1.0, 2.0], &[0.0, 0.0, 0.0]);
        assert_eq!(m.auc, 0.0);
        assert!(m.mtt.is_nan());
        assert!(matches!(m.require_finite(), Err(CeusError::NotANumber { metric }) if metric == "MTT"));
    }

    #[test]
    fn test_zero_time_step() {
        let d = max_abs_derivative(&[0.0, 0.0, 1.0], &[0.0, 1e-9, 1e-9]);
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_r_squared() {
        let y = [1.0, 2.0, 3.0, 4.0];
        assert!((r_squared(&y, &y) - 1.0).abs() < 1e-12);
        let flat = [2.5; 4];
        assert!(r_squared(&y, &flat).abs() < 1e-9);
        let m = compute_metrics_with_fit(&[0.0, 1.0, 2.0, 3.0], &y, &y);
        assert!((m.r_squared.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_samples_skipped() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let m = compute_metrics(&t, &[0.0, f64::NAN, 4.0, 0.0]);
        assert_eq!(m.peak, 4.0);
        assert!((m.auc - 6.0).abs() < 1e-12);
    }
}
