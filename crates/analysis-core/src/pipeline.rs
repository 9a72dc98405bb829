//! End-to-end analysis of one clip.
//!
//! classify → flash → window crop → motion compensation → preprocessing →
//! per-ROI TIC → LOESS → model fits → metrics.
//!
//! Only structural problems (no frames, bad shapes, bad config) abort the
//! request. ROI and model failures are collected into the report next to
//! the results that succeeded.

use std::collections::BTreeMap;
use std::ops::Range;

use ceuslab_common::{AnalysisDefaults, CeusError, CeusResult, FrameClock};
use ceuslab_volume_model::{
    ClassifiedStacks, PixelVolume, RegionDescriptor, RegionLayout, RoiSession, Tic, VendorHint,
};
use ndarray::Array3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classify::classify_regions;
use crate::events::{self, FlashConfig, FlashDetection};
use crate::fitting::{self, FitRequest, KineticModel, ModelFits};
use crate::loess::{self, LoessConfig};
use crate::metrics::{self, MetricSet};
use crate::preprocess::{preprocess_ceus, PreprocessConfig};
use crate::registration::{self, RegistrationConfig, ShiftSource, ShiftTable};
use crate::tic;

/// Wash-in predictions are tabulated on `0..=8 s`.
pub const PREDICTION_END_SECS: f64 = 8.0;
pub const PREDICTION_STEP_SECS: f64 = 0.1;

/// Window of the running-median curve.
const MEDIAN_WINDOW_SECS: f64 = 0.5;

/// Optional pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stages {
    /// Keep only the frames of the analysis window after washout.
    pub crop_to_window: bool,
    pub motion: bool,
    pub preprocess: bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            crop_to_window: true,
            motion: true,
            preprocess: true,
        }
    }
}

/// Inputs and parameters of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub volume: &'a PixelVolume,
    pub regions: &'a [RegionDescriptor],
    pub vendor: VendorHint,
    pub clock: FrameClock,
    /// Caller-chosen flash frame, replacing detection.
    pub flash_override: Option<usize>,
    /// Frames excluded per ROI label, as indices into the analysed stack.
    pub exclusions: BTreeMap<String, Vec<usize>>,
    pub stages: Stages,
    pub flash: FlashConfig,
    /// Seconds analysed after washout.
    pub window_secs: f64,
    pub registration: RegistrationConfig,
    pub preprocess: PreprocessConfig,
    pub loess: LoessConfig,
    pub fit: FitRequest,
}

impl<'a> AnalysisRequest<'a> {
    pub fn new(volume: &'a PixelVolume, regions: &'a [RegionDescriptor], clock: FrameClock) -> Self {
        Self {
            volume,
            regions,
            vendor: VendorHint::default(),
            clock,
            flash_override: None,
            exclusions: BTreeMap::new(),
            stages: Stages::default(),
            flash: FlashConfig::default(),
            window_secs: 15.0,
            registration: RegistrationConfig::default(),
            preprocess: PreprocessConfig::default(),
            loess: LoessConfig::default(),
            fit: FitRequest::default(),
        }
    }

    /// Take every stage parameter from `defaults`.
    pub fn with_defaults(mut self, defaults: &AnalysisDefaults) -> CeusResult<Self> {
        defaults.validate()?;
        self.flash = defaults.into();
        self.window_secs = defaults.analysis_window_secs;
        self.registration = defaults.into();
        self.preprocess = PreprocessConfig::try_from(defaults)?;
        self.loess = defaults.into();
        self.fit.starts = defaults.fit_starts;
        self.fit.seed = defaults.fit_seed;
        self.fit.washin_t_max = defaults.washin_t_max_secs;
        Ok(self)
    }
}

impl From<&AnalysisDefaults> for FlashConfig {
    fn from(d: &AnalysisDefaults) -> Self {
        Self {
            exclude_leading: d.flash_exclude_leading,
            search_window: d.flash_search_window,
        }
    }
}

impl From<&AnalysisDefaults> for RegistrationConfig {
    fn from(d: &AnalysisDefaults) -> Self {
        Self {
            skip_first: d.registration_skip_first,
            reference_window: d.registration_reference_window,
            upsample: d.registration_upsample,
        }
    }
}

impl From<&AnalysisDefaults> for LoessConfig {
    fn from(d: &AnalysisDefaults) -> Self {
        Self {
            span: d.loess_span,
            degree: d.loess_degree,
        }
    }
}

impl TryFrom<&AnalysisDefaults> for PreprocessConfig {
    type Error = CeusError;

    fn try_from(d: &AnalysisDefaults) -> CeusResult<Self> {
        Ok(Self {
            percentile_low: d.percentile_low,
            percentile_high: d.percentile_high,
            log_compress: d.log_compress,
            spatial: d.spatial_filter.parse()?,
            temporal: d.temporal_filter.parse()?,
            temporal_window: d.temporal_window,
            baseline_frames: d.baseline_frames,
        })
    }
}

/// Shifts applied to the analysed stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSummary {
    pub shifts: ShiftTable,
    pub source: ShiftSource,
}

/// Wash-in model evaluated for tabulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashInPrediction {
    pub a: f64,
    pub b: f64,
    /// Prediction at every included time.
    pub at_samples: Vec<f64>,
    /// `(time, prediction)` on the fixed grid.
    pub grid: Vec<(f64, f64)>,
    /// Metrics of the grid curve.
    pub grid_metrics: MetricSet,
}

/// Metrics of every curve variant of one ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveMetrics {
    /// Included TIC values; `r_squared` is the wash-in fit's when it exists.
    pub raw: MetricSet,
    pub smoothed: Option<MetricSet>,
    /// Anchored model curves, with `r_squared` against the included values.
    pub models: BTreeMap<KineticModel, MetricSet>,
}

/// Results for one ROI.
#[derive(Debug)]
pub struct RoiAnalysis {
    pub label: String,
    pub tic: Tic,
    /// Included times and values the curve fits were run on.
    pub time: Vec<f64>,
    pub value: Vec<f64>,
    /// Anchored LOESS curve at `time`.
    pub smoothed: CeusResult<Vec<f64>>,
    /// Running median of `value`.
    pub median_filtered: Vec<f64>,
    pub fits: ModelFits,
    pub washin: Option<WashInPrediction>,
    pub metrics: CurveMetrics,
}

/// A ROI that produced no curve.
#[derive(Debug)]
pub struct RoiFailure {
    pub label: String,
    pub error: CeusError,
}

/// Everything one run produced.
#[derive(Debug)]
pub struct AnalysisReport {
    pub layout: RegionLayout,
    pub fps: f64,
    /// Detection on the full contrast stack.
    pub flash: FlashDetection,
    /// Frames of the full clip that were analysed.
    pub window: Range<usize>,
    pub motion: Option<MotionSummary>,
    /// Stacks after cropping and motion compensation.
    pub stacks: ClassifiedStacks,
    /// Seed the fits were drawn with.
    pub fit_seed: u64,
    pub rois: Vec<RoiAnalysis>,
    pub failures: Vec<RoiFailure>,
}

impl AnalysisReport {
    pub fn roi(&self, label: &str) -> Option<&RoiAnalysis> {
        self.rois.iter().find(|r| r.label == label)
    }
}

/// Run the whole pipeline for every ROI of `session`.
pub fn analyze(request: &AnalysisRequest<'_>, session: &RoiSession) -> CeusResult<AnalysisReport> {
    let fps = request.clock.fps();
    let stacks = classify_regions(request.volume, request.regions, &request.vendor)?;

    let flash = match request.flash_override {
        Some(index) => {
            let intensity = events::frame_intensity(&stacks.ceus);
            events::washout_from_flash(&intensity, index, request.flash.search_window)
        }
        None => events::detect_flash(&stacks.ceus, &request.flash),
    };

    let (stacks, window) = if request.stages.crop_to_window {
        crop_to_window(stacks, &flash, fps, request.window_secs)?
    } else {
        let frames = stacks.ceus.frames();
        (stacks, 0..frames)
    };

    let (stacks, motion) = if request.stages.motion {
        let (stacks, summary) = stabilize(stacks, &request.registration)?;
        (stacks, Some(summary))
    } else {
        (stacks, None)
    };

    let intensity: Array3<f32> = if request.stages.preprocess {
        preprocess_ceus(&stacks.ceus, &request.preprocess)?
    } else {
        stacks.ceus.luminance()
    };

    let fit_seed = request.fit.seed.unwrap_or_else(|| {
        let seed: u64 = rand::rng().random();
        tracing::info!(seed, "No fit seed given, drew one");
        seed
    });
    let fit = FitRequest {
        seed: Some(fit_seed),
        ..request.fit.clone()
    };

    let mut rois = Vec::new();
    let mut failures = Vec::new();
    for (label, result) in tic::extract_all(intensity.view(), session, fps) {
        match result {
            Ok(mut curve) => {
                for &index in request.exclusions.get(&label).into_iter().flatten() {
                    curve.set_included(index, false);
                }
                rois.push(analyze_tic(curve, fps, &request.loess, &fit));
            }
            Err(error) => failures.push(RoiFailure { label, error }),
        }
    }

    tracing::info!(
        rois = rois.len(),
        failed = failures.len(),
        frames = window.len(),
        fps,
        "Analysis complete"
    );

    Ok(AnalysisReport {
        layout: stacks.layout,
        fps,
        flash,
        window,
        motion,
        stacks,
        fit_seed,
        rois,
        failures,
    })
}

/// Smooth, fit and measure one curve, honoring its include mask.
pub fn analyze_tic(curve: Tic, fps: f64, loess_config: &LoessConfig, fit: &FitRequest) -> RoiAnalysis {
    let (time, value) = curve.included_points();

    let smoothed = loess::loess_smooth(&time, &value, loess_config).map(|s| loess::anchor_to_zero(&s));
    if let Err(e) = &smoothed {
        tracing::warn!(label = %curve.label, error = %e, "LOESS failed");
    }
    let median_filtered = tic::median_filter_trace(&value, fps, MEDIAN_WINDOW_SECS);

    let fits = fitting::fit_models(&time, &value, fit);
    let washin = fits
        .get(&KineticModel::WashIn)
        .and_then(|r| r.as_ref().ok())
        .map(|fit| washin_prediction(fit.params[0], fit.params[1], &time));

    let mut raw = metrics::compute_metrics(&time, &value);
    if let Some(prediction) = &washin {
        raw.r_squared = Some(metrics::r_squared(&value, &prediction.at_samples));
    }
    let smoothed_metrics = smoothed
        .as_ref()
        .ok()
        .map(|s| metrics::compute_metrics(&time, s));
    let models = fits
        .iter()
        .filter_map(|(model, result)| {
            let fit = result.as_ref().ok()?;
            let mut m = metrics::compute_metrics(&time, &fit.fitted);
            m.r_squared = Some(metrics::r_squared(&value, &fit.fitted));
            Some((*model, m))
        })
        .collect();

    RoiAnalysis {
        label: curve.label.clone(),
        tic: curve,
        time,
        value,
        smoothed,
        median_filtered,
        fits,
        washin,
        metrics: CurveMetrics {
            raw,
            smoothed: smoothed_metrics,
            models,
        },
    }
}

/// Keep the analysis window of both stacks. Windows shorter than two frames
/// leave the stacks untouched.
fn crop_to_window(
    stacks: ClassifiedStacks,
    flash: &FlashDetection,
    fps: f64,
    window_secs: f64,
) -> CeusResult<(ClassifiedStacks, Range<usize>)> {
    let frames = stacks.ceus.frames();
    let window = events::analysis_window(flash.washout_index, fps, window_secs, frames);
    if window.len() < 2 {
        tracing::warn!(
            washout = flash.washout_index,
            frames,
            "Analysis window shorter than two frames, keeping the whole clip"
        );
        return Ok((stacks, 0..frames));
    }

    let ceus = stacks.ceus.slice_frames(window.start, window.end)?;
    let bmode = match stacks.bmode {
        Some(b) if b.frames() >= window.start + 2 => Some(b.slice_frames(window.start, window.end)?),
        Some(_) => {
            tracing::warn!("B-mode stack ends before the analysis window, dropping it");
            None
        }
        None => None,
    };
    tracing::debug!(start = window.start, end = window.end, "Cropped to analysis window");
    Ok((
        ClassifiedStacks {
            ceus,
            bmode,
            layout: stacks.layout,
        },
        window,
    ))
}

/// Estimate motion on B-mode when possible and apply the same shifts to
/// both stacks.
pub fn stabilize(
    stacks: ClassifiedStacks,
    config: &RegistrationConfig,
) -> CeusResult<(ClassifiedStacks, MotionSummary)> {
    let result = registration::motion_compensate(&stacks.ceus, stacks.bmode.as_ref(), config)?;
    let frames = result.corrected.frames();

    let bmode = match (stacks.bmode, result.source) {
        (Some(b), ShiftSource::Secondary) => {
            Some(registration::apply_shifts(&b.slice_frames(0, frames)?, &result.shifts)?)
        }
        (other, _) => other,
    };

    Ok((
        ClassifiedStacks {
            ceus: result.corrected,
            bmode,
            layout: stacks.layout,
        },
        MotionSummary {
            shifts: result.shifts,
            source: result.source,
        },
    ))
}

fn washin_prediction(a: f64, b: f64, time: &[f64]) -> WashInPrediction {
    let params = [a, b];
    let at_samples = time
        .iter()
        .map(|&t| KineticModel::WashIn.value(t, &params))
        .collect();
    let steps = (PREDICTION_END_SECS / PREDICTION_STEP_SECS).round() as usize;
    let grid: Vec<(f64, f64)> = (0..=steps)
        .map(|i| {
            let t = i as f64 * PREDICTION_STEP_SECS;
            (t, KineticModel::WashIn.value(t, &params))
        })
        .collect();
    let (gt, gy): (Vec<f64>, Vec<f64>) = grid.iter().copied().unzip();
    WashInPrediction {
        a,
        b,
        at_samples,
        grid_metrics: metrics::compute_metrics(&gt, &gy),
        grid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ceuslab_volume_model::RoiShape;

    fn washin_clip(frames: usize, size: usize) -> PixelVolume {
        let data = Array3::from_shape_fn((frames, size, size), |(t, _, _)| {
            let secs = t as f32 / 10.0;
            50.0 + 150.0 * (1.0 - (-0.1 * secs).exp())
        });
        PixelVolume::from_gray(data).unwrap()
    }

    fn plain_request<'a>(volume: &'a PixelVolume) -> AnalysisRequest<'a> {
        let mut request = AnalysisRequest::new(volume, &[], FrameClock::new(10.0));
        request.stages = Stages {
            crop_to_window: false,
            motion: false,
            preprocess: false,
        };
        request.fit.seed = Some(1);
        request.fit.models = vec![KineticModel::WashIn];
        request
    }

    fn session(shapes: Vec<RoiShape>) -> RoiSession {
        let mut session = RoiSession::new();
        for shape in shapes {
            session.add(shape, None).unwrap();
        }
        session
    }

    #[test]
    fn test_failed_roi_is_reported_not_dropped() {
        let volume = washin_clip(20, 16);
        let request = plain_request(&volume);
        let rois = session(vec![
            RoiShape::rectangle(2.0, 2.0, 12.0, 12.0),
            RoiShape::rectangle(0.0, 0.0, 2.0, 2.0),
        ]);
        let report = analyze(&request, &rois).unwrap();
        assert_eq!(report.rois.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].label, "ROI_2");
        assert!(matches!(report.failures[0].error, CeusError::InvalidRoi { .. }));
    }

    #[test]
    fn test_exclusions_are_honored() {
        let volume = washin_clip(20, 16);
        let mut request = plain_request(&volume);
        request.exclusions.insert("ROI_1".into(), vec![0, 5, 6]);
        let rois = session(vec![RoiShape::rectangle(2.0, 2.0, 12.0, 12.0)]);
        let report = analyze(&request, &rois).unwrap();
        let roi = report.roi("ROI_1").unwrap();
        assert_eq!(roi.time.len(), 17);
        assert_eq!(roi.value[0], 0.0);
        assert!((roi.time[0] - 0.1).abs() < 1e-12);
        assert_eq!(roi.smoothed.as_ref().unwrap().len(), 17);
    }

    #[test]
    fn test_washin_prediction_grid() {
        let prediction = washin_prediction(10.0, 1.0, &[0.0, 1.0]);
        assert_eq!(prediction.grid.len(), 81);
        assert!((prediction.grid[80].0 - 8.0).abs() < 1e-9);
        assert!((prediction.at_samples[1] - 10.0 * (1.0 - (-1.0f64).exp())).abs() < 1e-12);
        assert!(prediction.grid_metrics.auc > 0.0);
    }

    #[test]
    fn test_window_crop() {
        let mut trace = vec![100.0f32; 60];
        for v in trace.iter_mut().skip(20) {
            *v = 10.0;
        }
        let data = Array3::from_shape_fn((60, 8, 8), |(t, _, _)| trace[t]);
        let volume = PixelVolume::from_gray(data).unwrap();
        let mut request = plain_request(&volume);
        request.stages.crop_to_window = true;
        request.window_secs = 2.0;
        let report = analyze(&request, &RoiSession::new()).unwrap();
        assert_eq!(report.flash.flash_index, 19);
        assert_eq!(report.window, 20..40);
        assert_eq!(report.stacks.ceus.frames(), 20);
    }

    #[test]
    fn test_defaults_conversion() {
        let volume = washin_clip(10, 8);
        let defaults = AnalysisDefaults {
            spatial_filter: "gaussian".into(),
            fit_starts: 30,
            loess_span: 0.5,
            ..Default::default()
        };
        let request = AnalysisRequest::new(&volume, &[], FrameClock::new(10.0))
            .with_defaults(&defaults)
            .unwrap();
        assert_eq!(request.preprocess.spatial, crate::preprocess::SpatialFilter::Gaussian);
        assert_eq!(request.fit.starts, 30);
        assert_eq!(request.loess.span, 0.5);

        let bad = AnalysisDefaults {
            temporal_filter: "box".into(),
            ..Default::default()
        };
        assert!(AnalysisRequest::new(&volume, &[], FrameClock::new(10.0))
            .with_defaults(&bad)
            .is_err());
    }
}
