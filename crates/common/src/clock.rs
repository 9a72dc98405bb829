//! Frame clock utilities.
//!
//! All CEUSLab time axes are derived from a single frame rate taken from
//! container metadata. This module provides utilities for:
//! - Resolving the frame rate from the timing tags that may be present
//! - Converting between frame indices and seconds
//! - Sizing analysis windows in frames

use serde::{Deserialize, Serialize};

/// Frame rate used when the container carries no usable timing tag.
pub const DEFAULT_FPS: f64 = 10.0;

/// Timing tags copied from the container layer.
///
/// Any subset may be present. The pixel content is never consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTimingMetadata {
    /// Nominal time between frames in milliseconds.
    #[serde(default)]
    pub frame_time_ms: Option<f64>,

    /// Cine playback rate in frames per second.
    #[serde(default)]
    pub cine_rate: Option<f64>,

    /// Recommended display frame rate in frames per second.
    #[serde(default)]
    pub recommended_display_rate: Option<f64>,
}

/// Where the resolved frame rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FpsSource {
    FrameTime,
    CineRate,
    RecommendedDisplayRate,
    Explicit,
    Fallback,
}

/// A clock mapping frame indices to seconds at a fixed frame rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: f64,
    source: FpsSource,
}

impl FrameClock {
    /// Create a clock from an explicit frame rate.
    ///
    /// Non-positive or non-finite rates fall back to [`DEFAULT_FPS`].
    pub fn new(fps: f64) -> Self {
        if usable(fps) {
            Self {
                fps,
                source: FpsSource::Explicit,
            }
        } else {
            Self::fallback()
        }
    }

    /// Clock at [`DEFAULT_FPS`].
    pub fn fallback() -> Self {
        Self {
            fps: DEFAULT_FPS,
            source: FpsSource::Fallback,
        }
    }

    /// Resolve the frame rate from container timing tags.
    ///
    /// Precedence: frame time, cine rate, recommended display rate, then
    /// [`DEFAULT_FPS`]. Tags that are non-positive or non-finite are skipped.
    pub fn from_metadata(meta: &FrameTimingMetadata) -> Self {
        if let Some(ms) = meta.frame_time_ms.filter(|ms| usable(*ms)) {
            let fps = 1000.0 / ms;
            if usable(fps) {
                return Self {
                    fps,
                    source: FpsSource::FrameTime,
                };
            }
        }
        if let Some(fps) = meta.cine_rate.filter(|f| usable(*f)) {
            return Self {
                fps,
                source: FpsSource::CineRate,
            };
        }
        if let Some(fps) = meta.recommended_display_rate.filter(|f| usable(*f)) {
            return Self {
                fps,
                source: FpsSource::RecommendedDisplayRate,
            };
        }
        tracing::debug!(fallback_fps = DEFAULT_FPS, "No usable frame timing tag");
        Self::fallback()
    }

    /// Frames per second.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Which tag the frame rate was resolved from.
    pub fn source(&self) -> FpsSource {
        self.source
    }

    /// Seconds between consecutive frames.
    pub fn frame_interval_secs(&self) -> f64 {
        1.0 / self.fps
    }

    /// Time of frame `index` in seconds.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.fps
    }

    /// Time axis for `frames` frames, starting at 0.
    pub fn time_axis(&self, frames: usize) -> Vec<f64> {
        (0..frames).map(|i| self.time_of(i)).collect()
    }

    /// Whole number of frames covering `secs` seconds (floored).
    pub fn frames_for(&self, secs: f64) -> usize {
        if secs <= 0.0 || !secs.is_finite() {
            return 0;
        }
        (secs * self.fps).floor() as usize
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::fallback()
    }
}

fn usable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
