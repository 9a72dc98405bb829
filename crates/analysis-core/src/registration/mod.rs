//! Rigid-translation motion compensation.
//!
//! Shifts are estimated frame by frame against a median reference, on the
//! B-mode stack when one is available and compatible, and then applied to
//! the contrast stack. Frames are processed in parallel.

pub mod phase_correlation;

use ceuslab_common::{CeusError, CeusResult};
use ceuslab_volume_model::PixelVolume;
use ndarray::{Array2, Array3, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use phase_correlation::PhaseCorrelator;

use crate::filters::median;

/// Per-frame `(dy, dx)` relative to one reference.
pub type ShiftTable = Vec<(f64, f64)>;

/// Registration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Frames skipped before the reference window.
    pub skip_first: usize,
    /// Frames median-combined into the reference.
    pub reference_window: usize,
    /// Sub-pixel upsampling factor.
    pub upsample: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            skip_first: 3,
            reference_window: 10,
            upsample: 20,
        }
    }
}

/// Which stack the shifts were estimated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftSource {
    /// The secondary (B-mode) stack.
    Secondary,
    /// The target (CEUS) stack itself.
    Target,
}

impl ShiftSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Secondary => "B-mode",
            Self::Target => "CEUS",
        }
    }
}

/// Motion-compensated stack and the shifts that produced it.
#[derive(Debug, Clone)]
pub struct Registration {
    pub corrected: PixelVolume,
    pub shifts: ShiftTable,
    pub source: ShiftSource,
}

/// Stabilize `target`, estimating shifts on `estimation` when it matches
/// the target's frame size.
///
/// With a compatible estimation stack both stacks are truncated to their
/// common frame count first.
pub fn motion_compensate(
    target: &PixelVolume,
    estimation: Option<&PixelVolume>,
    config: &RegistrationConfig,
) -> CeusResult<Registration> {
    let compatible = estimation.filter(|e| {
        let ok = e.height() == target.height() && e.width() == target.width();
        if !ok {
            tracing::warn!(
                estimation = ?(e.height(), e.width()),
                target = ?(target.height(), target.width()),
                "Estimation stack size differs from target, registering on target"
            );
        }
        ok
    });

    let (target, shifts, source) = match compatible {
        Some(estimation) => {
            let frames = estimation.frames().min(target.frames());
            let estimation = estimation.slice_frames(0, frames)?;
            let target = target.slice_frames(0, frames)?;
            let shifts = estimate_shifts(&estimation, config);
            (target, shifts, ShiftSource::Secondary)
        }
        None => {
            let shifts = estimate_shifts(target, config);
            (target.clone(), shifts, ShiftSource::Target)
        }
    };

    let corrected = apply_shifts(&target, &shifts)?;

    let max_shift = shifts
        .iter()
        .map(|(dy, dx)| dy.hypot(*dx))
        .fold(0.0, f64::max);
    tracing::info!(
        frames = shifts.len(),
        source = source.label(),
        max_shift_px = max_shift,
        "Motion compensation complete"
    );

    Ok(Registration {
        corrected,
        shifts,
        source,
    })
}

/// Phase-correlation shifts of every frame against the median reference.
pub fn estimate_shifts(stack: &PixelVolume, config: &RegistrationConfig) -> ShiftTable {
    let luminance = stack.luminance().mapv(f64::from);
    let reference = median_reference(&luminance, config.skip_first, config.reference_window);

    let correlator = PhaseCorrelator::new(stack.height(), stack.width(), config.upsample);
    let reference = correlator.spectrum(reference.view());

    (0..stack.frames())
        .into_par_iter()
        .map(|t| correlator.estimate_shift(&reference, luminance.index_axis(Axis(0), t)))
        .collect()
}

/// Per-pixel median over frames `[start, min(T, start + window))` with
/// `start = min(skip, T − 1)`.
pub fn median_reference(luminance: &Array3<f64>, skip: usize, window: usize) -> Array2<f64> {
    let frames = luminance.len_of(Axis(0));
    let start = skip.min(frames.saturating_sub(1));
    let end = frames.min(start + window.max(1));
    let window = luminance.slice(ndarray::s![start..end, .., ..]);
    window.map_axis(Axis(0), |lane| {
        let mut values = lane.to_vec();
        median(&mut values)
    })
}

/// Translate every frame of `stack` by its `(dy, dx)`.
///
/// Bilinear interpolation with edge extension; every channel gets the same
/// offset.
pub fn apply_shifts(stack: &PixelVolume, shifts: &[(f64, f64)]) -> CeusResult<PixelVolume> {
    if shifts.len() != stack.frames() {
        return Err(CeusError::input_shape(format!(
            "{} shifts for {} frames",
            shifts.len(),
            stack.frames()
        )));
    }

    let frames: Vec<Array3<f32>> = (0..stack.frames())
        .into_par_iter()
        .map(|t| shift_frame(stack.frame(t), shifts[t]))
        .collect();
    let views: Vec<ArrayView3<'_, f32>> = frames.iter().map(|f| f.view()).collect();
    let data = ndarray::stack(Axis(0), &views)
        .map_err(|e| CeusError::input_shape(format!("cannot restack frames: {e}")))?;

    PixelVolume::new(data, stack.photometric())
}

/// `out[y, x] = in[y − dy, x − dx]`, sampling clamped to the frame.
fn shift_frame(frame: ArrayView3<'_, f32>, (dy, dx): (f64, f64)) -> Array3<f32> {
    let (h, w, channels) = frame.dim();
    if dy == 0.0 && dx == 0.0 {
        return frame.to_owned();
    }
    let max_y = (h - 1) as f64;
    let max_x = (w - 1) as f64;

    Array3::from_shape_fn((h, w, channels), |(y, x, c)| {
        let sy = (y as f64 - dy).clamp(0.0, max_y);
        let sx = (x as f64 - dx).clamp(0.0, max_x);
        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let fy = sy - y0 as f64;
        let fx = sx - x0 as f64;

        let top = frame[[y0, x0, c]] as f64 * (1.0 - fx) + frame[[y0, x1, c]] as f64 * fx;
        let bottom = frame[[y1, x0, c]] as f64 * (1.0 - fx) + frame[[y1, x1, c]] as f64 * fx;
        (top * (1.0 - fy) + bottom * fy) as f32
    })
}
