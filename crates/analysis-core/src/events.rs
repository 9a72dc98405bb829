//! Flash and washout detection.
//!
//! The flash (microbubble destruction) is the steepest drop in mean frame
//! intensity; the washout is the darkest frame shortly after it, where
//! reperfusion starts.

use std::ops::Range;

use ceuslab_volume_model::PixelVolume;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Flash detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Leading frames skipped, capped at a tenth of the clip.
    pub exclude_leading: usize,
    /// Frames searched from the flash for the washout minimum.
    pub search_window: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            exclude_leading: 5,
            search_window: 20,
        }
    }
}

/// Detected events and the intensity trace they were found on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashDetection {
    pub flash_index: usize,
    pub washout_index: usize,
    /// Mean over all pixels and channels, one value per frame.
    pub intensity: Vec<f64>,
}

/// Mean intensity of every frame.
pub fn frame_intensity(volume: &PixelVolume) -> Vec<f64> {
    (0..volume.frames())
        .into_par_iter()
        .map(|t| volume.frame_mean(t))
        .collect()
}

/// Locate the flash and washout frames of a CEUS stack.
pub fn detect_flash(ceus: &PixelVolume, config: &FlashConfig) -> FlashDetection {
    let intensity = frame_intensity(ceus);
    let frames = intensity.len();
    let start = config.exclude_leading.min(frames / 10);

    let flash_index = intensity
        .windows(2)
        .map(|w| w[1] - w[0])
        .enumerate()
        .skip(start)
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
        .unwrap_or(start);

    let washout_index = washout_after(&intensity, flash_index, config.search_window);

    tracing::info!(
        flash_index,
        washout_index,
        frames,
        "Flash detected"
    );

    FlashDetection {
        flash_index,
        washout_index,
        intensity,
    }
}

/// Re-derive the washout from a caller-chosen flash frame.
///
/// The flash index is clamped to the last frame.
pub fn washout_from_flash(
    intensity: &[f64],
    flash_index: usize,
    search_window: usize,
) -> FlashDetection {
    let flash_index = flash_index.min(intensity.len().saturating_sub(1));
    let washout_index = washout_after(intensity, flash_index, search_window);
    tracing::debug!(flash_index, washout_index, "Flash overridden");
    FlashDetection {
        flash_index,
        washout_index,
        intensity: intensity.to_vec(),
    }
}

/// Frames analysed after washout: `washout .. min(T, washout + ⌊secs·fps⌋)`.
pub fn analysis_window(
    washout_index: usize,
    fps: f64,
    duration_secs: f64,
    frames: usize,
) -> Range<usize> {
    let span = if fps > 0.0 && duration_secs > 0.0 && (duration_secs * fps).is_finite() {
        (duration_secs * fps).floor() as usize
    } else {
        0
    };
    let start = washout_index.min(frames);
    start..frames.min(start.saturating_add(span))
}

/// First minimum of `intensity[flash .. min(T, flash + window)]`.
fn washout_after(intensity: &[f64], flash_index: usize, search_window: usize) -> usize {
    let end = intensity.len().min(flash_index + search_window.max(1));
    intensity[flash_index..end]
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, bv)) if bv <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| flash_index + i)
        .unwrap_or(flash_index)
}
