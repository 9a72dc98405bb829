//! LOESS smoothing of time-intensity curves.
//!
//! Local polynomial regression with tricube weights. The neighborhood size
//! follows R's `loess` convention of `⌊span · n⌋` points, and the scale of
//! each neighborhood is the k-th smallest non-zero distance, so duplicate
//! abscissae never collapse it to zero.

use ceuslab_common::{CeusError, CeusResult};
use serde::{Deserialize, Serialize};

use crate::linalg;

/// LOESS parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoessConfig {
    /// Fraction of points in each neighborhood, in `(0, 1]`.
    pub span: f64,
    /// Local polynomial degree, 1 or 2.
    pub degree: usize,
}

impl Default for LoessConfig {
    fn default() -> Self {
        Self {
            span: 0.8,
            degree: 2,
        }
    }
}

/// Smooth `y(t)`, returning one value per input position in input order.
pub fn loess_smooth(t: &[f64], y: &[f64], config: &LoessConfig) -> CeusResult<Vec<f64>> {
    if t.len() != y.len() {
        return Err(CeusError::input_shape(format!(
            "LOESS got {} abscissae for {} values",
            t.len(),
            y.len()
        )));
    }

    let mut points: Vec<(f64, f64)> = t
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if points.len() < 3 {
        return Err(CeusError::insufficient_data("LOESS", 3, points.len()));
    }

    // Stable sort keeps the first occurrence of duplicated abscissae.
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|later, earlier| later.0 == earlier.0);
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let n = xs.len();

    let degree = config.degree.clamp(1, 2);
    let k = neighborhood_size(config.span, degree, n);

    let fitted: Vec<f64> = (0..n).map(|i| local_fit(&xs, &ys, i, k, degree)).collect();

    Ok(t.iter().map(|&ti| interp(ti, &xs, &fitted)).collect())
}

/// Points per neighborhood: at least `degree + 2`, then clipped to
/// `[2, n − 1]` so the scale distance excludes the point itself.
fn neighborhood_size(span: f64, degree: usize, n: usize) -> usize {
    let k = (span.clamp(0.0, 1.0) * n as f64).floor() as usize;
    let k = k.max(degree + 2);
    k.max(2).min(n.saturating_sub(1).max(1))
}

fn local_fit(xs: &[f64], ys: &[f64], i: usize, k: usize, degree: usize) -> f64 {
    let xi = xs[i];
    let distances: Vec<f64> = xs.iter().map(|x| (x - xi).abs()).collect();

    let mut nonzero: Vec<f64> = distances.iter().copied().filter(|&d| d > 0.0).collect();
    let dk = if nonzero.is_empty() {
        1.0
    } else {
        let kk = k.min(nonzero.len());
        let (_, kth, _) = nonzero.select_nth_unstable_by(kk - 1, |a, b| a.total_cmp(b));
        *kth
    };

    let p = degree + 1;
    let mut xtwx = vec![vec![0.0; p]; p];
    let mut xtwy = vec![0.0; p];
    let mut weight_sum = 0.0;
    let mut weighted_y = 0.0;

    for ((&x, &y), &d) in xs.iter().zip(ys).zip(&distances) {
        let w = tricube(d / dk);
        if w <= 0.0 {
            continue;
        }
        let z = (x - xi) / dk;
        let basis = [1.0, z, z * z];
        for r in 0..p {
            xtwy[r] += w * basis[r] * y;
            for c in 0..p {
                xtwx[r][c] += w * basis[r] * basis[c];
            }
        }
        weight_sum += w;
        weighted_y += w * y;
    }

    match linalg::solve(&xtwx, &xtwy) {
        Some(beta) => beta[0],
        None if weight_sum > 0.0 => weighted_y / weight_sum,
        None => ys[i],
    }
}

fn tricube(u: f64) -> f64 {
    let a = 1.0 - u.abs().min(1.0).powi(3);
    a * a * a
}

/// Piecewise-linear interpolation over sorted `xs`, constant beyond the ends.
fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }
    let hi = xs.partition_point(|&v| v <= x);
    let lo = hi - 1;
    if xs[lo] == x {
        return ys[lo];
    }
    let frac = (x - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + frac * (ys[hi] - ys[lo])
}

/// Shift a curve so it starts at zero, clamping negatives.
pub fn anchor_to_zero(curve: &[f64]) -> Vec<f64> {
    let Some(&first) = curve.first() else {
        return Vec::new();
    };
    curve.iter().map(|v| (v - first).max(0.0)).collect()
}
