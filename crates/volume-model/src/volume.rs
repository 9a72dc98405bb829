//! Decoded multi-frame pixel data.
//!
//! A [`PixelVolume`] is the decoded clip as handed over by the container
//! layer: `T` frames of `H × W` pixels with one (grayscale) or three
//! (RGB / YCbCr) channels. Sample values keep their source range.

use ceuslab_common::{CeusError, CeusResult};
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Photometric interpretation of the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Photometric {
    Monochrome,
    Rgb,
    /// Full-range YCbCr, converted to RGB after cropping.
    YbrFull,
}

/// Immutable `(T, H, W, C)` pixel volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PixelVolumeRepr", into = "PixelVolumeRepr")]
pub struct PixelVolume {
    data: Array4<f32>,
    photometric: Photometric,
    sample_range: (f32, f32),
}

/// Serialized form. Deserialization goes through [`PixelVolume::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PixelVolumeRepr {
    photometric: Photometric,
    data: Array4<f32>,
}

impl TryFrom<PixelVolumeRepr> for PixelVolume {
    type Error = CeusError;

    fn try_from(repr: PixelVolumeRepr) -> Result<Self, Self::Error> {
        Self::new(repr.data, repr.photometric)
    }
}

impl From<PixelVolume> for PixelVolumeRepr {
    fn from(volume: PixelVolume) -> Self {
        Self {
            photometric: volume.photometric,
            data: volume.data,
        }
    }
}

impl PixelVolume {
    /// Validate and wrap a `(T, H, W, C)` array.
    pub fn new(data: Array4<f32>, photometric: Photometric) -> CeusResult<Self> {
        let (t, h, w, c) = data.dim();
        if t < 2 {
            return Err(CeusError::input_shape(format!(
                "need at least 2 frames, got {t}"
            )));
        }
        if h == 0 || w == 0 {
            return Err(CeusError::input_shape(format!(
                "frames must be non-empty, got {h}x{w}"
            )));
        }
        match (c, photometric) {
            (1, Photometric::Monochrome) | (3, Photometric::Rgb | Photometric::YbrFull) => {}
            _ => {
                return Err(CeusError::input_shape(format!(
                    "{c} channel(s) do not match photometric {photometric:?}"
                )))
            }
        }

        let sample_range = data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |acc, &v| {
            (acc.0.min(v), acc.1.max(v))
        });

        Ok(Self {
            data,
            photometric,
            sample_range,
        })
    }

    /// Wrap a `(T, H, W)` grayscale stack.
    pub fn from_gray(frames: Array3<f32>) -> CeusResult<Self> {
        Self::new(frames.insert_axis(Axis(3)), Photometric::Monochrome)
    }

    /// Wrap a `(T, H, W, 3)` RGB stack.
    pub fn from_rgb(frames: Array4<f32>) -> CeusResult<Self> {
        Self::new(frames, Photometric::Rgb)
    }

    pub fn frames(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn channels(&self) -> usize {
        self.data.dim().3
    }

    /// `(T, H, W, C)`.
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn photometric(&self) -> Photometric {
        self.photometric
    }

    /// Smallest and largest sample in the volume.
    pub fn sample_range(&self) -> (f32, f32) {
        self.sample_range
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    /// One frame as `(H, W, C)`.
    ///
    /// # Panics
    /// Panics if `t >= frames()`.
    pub fn frame(&self, t: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), t)
    }

    /// BT.601 luma of one frame. Identity for single-channel volumes.
    pub fn luminance_frame(&self, t: usize) -> Array2<f32> {
        let frame = self.frame(t);
        if self.channels() == 1 {
            return frame.index_axis(Axis(2), 0).to_owned();
        }
        Zip::from(frame.index_axis(Axis(2), 0))
            .and(frame.index_axis(Axis(2), 1))
            .and(frame.index_axis(Axis(2), 2))
            .map_collect(|&r, &g, &b| luma(r, g, b))
    }

    /// BT.601 luma of every frame as `(T, H, W)`.
    pub fn luminance(&self) -> Array3<f32> {
        if self.channels() == 1 {
            return self.data.index_axis(Axis(3), 0).to_owned();
        }
        Zip::from(self.data.index_axis(Axis(3), 0))
            .and(self.data.index_axis(Axis(3), 1))
            .and(self.data.index_axis(Axis(3), 2))
            .map_collect(|&r, &g, &b| luma(r, g, b))
    }

    /// Mean over all pixels and channels of frame `t`.
    pub fn frame_mean(&self, t: usize) -> f64 {
        let frame = self.frame(t);
        frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len() as f64
    }

    /// Crop to the inclusive pixel box `x0..=x1`, `y0..=y1`.
    pub fn crop(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> CeusResult<Self> {
        if x0 > x1 || y0 > y1 || x1 >= self.width() || y1 >= self.height() {
            return Err(CeusError::input_shape(format!(
                "crop box ({x0},{y0})-({x1},{y1}) outside {}x{} frame",
                self.width(),
                self.height()
            )));
        }
        let data = self.data.slice(s![.., y0..=y1, x0..=x1, ..]).to_owned();
        Self::new(data, self.photometric)
    }

    /// Keep frames `start..end`.
    pub fn slice_frames(&self, start: usize, end: usize) -> CeusResult<Self> {
        let end = end.min(self.frames());
        if start >= end {
            return Err(CeusError::input_shape(format!(
                "empty frame range {start}..{end}"
            )));
        }
        let data = self.data.slice(s![start..end, .., .., ..]).to_owned();
        Self::new(data, self.photometric)
    }
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}
