//! Contrast-stack preprocessing.
//!
//! Fixed order: luminance, global percentile normalization, optional log
//! compression, optional per-frame spatial filter, baseline subtraction,
//! optional temporal filter. Output is a `(T, H, W)` stack in `[0, 1]`.

use std::str::FromStr;

use ceuslab_common::{CeusError, CeusResult};
use ceuslab_volume_model::PixelVolume;
use ndarray::{s, Array3, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::filters::{self, Edge};

/// Log-compression gain.
const LOG_ALPHA: f32 = 20.0;

/// Spatial smoothing sigma for [`SpatialFilter::Gaussian`].
const SPATIAL_SIGMA: f64 = 0.6;

/// Per-frame spatial filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialFilter {
    /// 3×3 median.
    Median,
    /// Gaussian, σ = 0.6 px.
    Gaussian,
    None,
}

/// Per-pixel temporal filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalFilter {
    /// Gaussian, σ = max(0.5, (w − 1) / 2) frames.
    Gaussian,
    /// Centered moving mean of odd width.
    Mean,
    None,
}

impl FromStr for SpatialFilter {
    type Err = CeusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(Self::Median),
            "gaussian" => Ok(Self::Gaussian),
            "none" | "" => Ok(Self::None),
            other => Err(CeusError::config(format!("unknown spatial filter '{other}'"))),
        }
    }
}

impl FromStr for TemporalFilter {
    type Err = CeusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Self::Gaussian),
            "mean" => Ok(Self::Mean),
            "none" | "" => Ok(Self::None),
            other => Err(CeusError::config(format!("unknown temporal filter '{other}'"))),
        }
    }
}

/// Preprocessing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Lower normalization percentile (percent).
    pub percentile_low: f64,
    /// Upper normalization percentile (percent).
    pub percentile_high: f64,
    pub log_compress: bool,
    pub spatial: SpatialFilter,
    pub temporal: TemporalFilter,
    /// Temporal window in frames.
    pub temporal_window: usize,
    /// Frames median-combined into the background. 0 disables subtraction.
    pub baseline_frames: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            percentile_low: 1.0,
            percentile_high: 99.0,
            log_compress: true,
            spatial: SpatialFilter::Median,
            temporal: TemporalFilter::Gaussian,
            temporal_window: 3,
            baseline_frames: 5,
        }
    }
}

/// Run the preprocessing chain on a contrast stack.
pub fn preprocess_ceus(stack: &PixelVolume, config: &PreprocessConfig) -> CeusResult<Array3<f32>> {
    if !(config.percentile_low >= 0.0
        && config.percentile_high <= 100.0
        && config.percentile_low < config.percentile_high)
    {
        return Err(CeusError::config(format!(
            "percentiles must satisfy 0 <= low < high <= 100, got {}..{}",
            config.percentile_low, config.percentile_high
        )));
    }

    let mut x = stack.luminance();
    let (lo, hi) = normalization_bounds(&x, config.percentile_low, config.percentile_high);
    let span = (hi - lo) as f32;
    let lo = lo as f32;
    x.par_mapv_inplace(|v| ((v - lo) / span).clamp(0.0, 1.0));

    if config.log_compress {
        let denom = LOG_ALPHA.ln_1p();
        x.par_mapv_inplace(|v| (LOG_ALPHA * v).ln_1p() / denom);
    }

    spatial_filter(&mut x, config.spatial);

    let baseline = subtract_baseline(&mut x, config.baseline_frames);

    temporal_filter(&mut x, config.temporal, config.temporal_window);

    tracing::info!(
        frames = x.len_of(Axis(0)),
        lo,
        hi = lo + span,
        baseline_frames = baseline,
        spatial = ?config.spatial,
        temporal = ?config.temporal,
        "Preprocessing complete"
    );
    Ok(x)
}

/// Global percentiles; a collapsed range widens to `lo + 1e-3`.
fn normalization_bounds(x: &Array3<f32>, p_lo: f64, p_hi: f64) -> (f64, f64) {
    let mut values: Vec<f32> = x.iter().copied().collect();
    let lo = filters::percentile(&mut values, p_lo);
    let hi = filters::percentile(&mut values, p_hi);
    if hi > lo {
        (lo, hi)
    } else {
        (lo, lo + 1e-3)
    }
}

fn spatial_filter(x: &mut Array3<f32>, filter: SpatialFilter) {
    if filter == SpatialFilter::None {
        return;
    }
    x.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut frame| {
        let filtered = match filter {
            SpatialFilter::Median => filters::median_3x3(frame.view()),
            _ => filters::gaussian_2d(frame.view(), SPATIAL_SIGMA),
        };
        frame.assign(&filtered);
    });
}

/// Subtract the per-pixel median of the first `N = min(requested, max(1, T/10))`
/// frames and clamp at zero. Returns `N`.
fn subtract_baseline(x: &mut Array3<f32>, requested: usize) -> usize {
    if requested == 0 {
        return 0;
    }
    let frames = x.len_of(Axis(0));
    let n = requested.min((frames / 10).max(1));
    let baseline = x.slice(s![..n, .., ..]).map_axis(Axis(0), |lane| {
        let mut values: Vec<f64> = lane.iter().map(|&v| v as f64).collect();
        filters::median(&mut values) as f32
    });
    x.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut frame| {
        Zip::from(&mut frame)
            .and(&baseline)
            .for_each(|v, &b| *v = (*v - b).max(0.0));
    });
    n
}

fn temporal_filter(x: &mut Array3<f32>, filter: TemporalFilter, window: usize) {
    if filter == TemporalFilter::None || x.len_of(Axis(0)) < 2 {
        return;
    }
    let sigma = ((window.max(1) - 1) as f64 / 2.0).max(0.5);
    Zip::from(x.lanes_mut(Axis(0))).par_for_each(|mut lane| {
        let values: Vec<f64> = lane.iter().map(|&v| v as f64).collect();
        let smoothed = match filter {
            TemporalFilter::Gaussian => filters::gaussian_1d(&values, sigma, Edge::Nearest),
            _ => filters::moving_mean(&values, window),
        };
        for (dst, src) in lane.iter_mut().zip(smoothed) {
            *dst = src as f32;
        }
    });
}
