//! ROI rasterization and time-intensity curve extraction.
//!
//! Works on `(T, H, W)` intensity stacks: either the preprocessed stack or
//! the luminance of a raw one.

use ceuslab_common::{CeusError, CeusResult, FrameClock};
use ceuslab_volume_model::{Roi, RoiSession, RoiShape, Tic};
use ndarray::{Array2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::filters::{self, Edge};

/// Smallest accepted ROI bounding box, in pixels per side.
pub const MIN_ROI_SIDE: usize = 5;

/// Pixels covered by a ROI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pixels: Array2<bool>,
    count: usize,
}

impl Mask {
    pub fn pixels(&self) -> &Array2<bool> {
        &self.pixels
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// `(row, col)` of every covered pixel, row-major.
    pub fn indices(&self) -> Vec<(usize, usize)> {
        self.pixels
            .indexed_iter()
            .filter(|(_, inside)| **inside)
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Rasterize a shape onto a `(height, width)` grid.
///
/// A pixel `(r, c)` is covered when its centre `(c, r)` is inside the shape
/// by the even-odd rule. Rectangles cover their inclusive pixel box.
pub fn rasterize(shape: &RoiShape, dims: (usize, usize)) -> CeusResult<Mask> {
    fill(shape, dims).map_err(|message| CeusError::invalid_roi(shape_name(shape), message))
}

fn shape_name(shape: &RoiShape) -> &'static str {
    match shape {
        RoiShape::Polygon { .. } => "polygon",
        RoiShape::Rectangle { .. } => "rectangle",
    }
}

fn fill(shape: &RoiShape, (height, width): (usize, usize)) -> Result<Mask, String> {
    if height == 0 || width == 0 {
        return Err("image has no pixels".to_string());
    }
    if let RoiShape::Polygon { vertices } = shape {
        if vertices.len() < 3 {
            return Err(format!("polygon needs at least 3 vertices, got {}", vertices.len()));
        }
    }
    if shape.area() <= 1e-9 {
        return Err("zero area".to_string());
    }
    let Some((min_x, min_y, max_x, max_y)) = shape.bounds() else {
        return Err("no vertices".to_string());
    };

    let clip = |lo: f64, hi: f64, n: usize| -> (i64, i64) {
        let max = n as i64 - 1;
        (
            (lo.round() as i64).clamp(0, max),
            (hi.round() as i64).clamp(0, max),
        )
    };
    let (bx0, bx1) = clip(min_x, max_x, width);
    let (by0, by1) = clip(min_y, max_y, height);
    let box_w = (bx1 - bx0 + 1) as usize;
    let box_h = (by1 - by0 + 1) as usize;
    if box_w < MIN_ROI_SIDE || box_h < MIN_ROI_SIDE {
        return Err(format!(
            "clipped bounding box {box_w}x{box_h} is smaller than {MIN_ROI_SIDE}x{MIN_ROI_SIDE}"
        ));
    }

    let mut pixels = Array2::from_elem((height, width), false);
    match shape {
        RoiShape::Rectangle { .. } => {
            for r in by0..=by1 {
                for c in bx0..=bx1 {
                    pixels[[r as usize, c as usize]] = true;
                }
            }
        }
        RoiShape::Polygon { vertices } => scanline_fill(vertices, &mut pixels),
    }

    let count = pixels.iter().filter(|&&p| p).count();
    if count == 0 {
        return Err("mask covers no pixel centres".to_string());
    }
    Ok(Mask { pixels, count })
}

/// Even-odd scan-line fill at integer pixel centres.
///
/// Edges use half-open crossing (`ya <= y < yb` or `yb <= y < ya`), and each
/// span covers `[x_left, x_right)`.
fn scanline_fill(vertices: &[(f64, f64)], pixels: &mut Array2<bool>) {
    let (height, width) = pixels.dim();
    let mut crossings = Vec::new();
    for r in 0..height {
        let y = r as f64;
        crossings.clear();
        for i in 0..vertices.len() {
            let (xa, ya) = vertices[i];
            let (xb, yb) = vertices[(i + 1) % vertices.len()];
            if (ya <= y) != (yb <= y) {
                crossings.push(xa + (y - ya) * (xb - xa) / (yb - ya));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0) as usize;
            let end = (span[1].ceil().max(0.0) as usize).min(width);
            for c in start..end {
                pixels[[r, c]] = true;
            }
        }
    }
}

/// Mean intensity inside `mask` for every frame.
pub fn roi_trace(stack: ArrayView3<'_, f32>, mask: &Mask) -> CeusResult<Vec<f64>> {
    let (_, h, w) = stack.dim();
    if mask.dim() != (h, w) {
        return Err(CeusError::input_shape(format!(
            "mask is {:?}, frames are {:?}",
            mask.dim(),
            (h, w)
        )));
    }
    let indices = mask.indices();
    let n = indices.len() as f64;
    Ok(stack
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|frame| indices.iter().map(|&(r, c)| frame[[r, c]] as f64).sum::<f64>() / n)
        .collect())
}

/// Extract one ROI's curve. Frame `i` is at `i / fps` seconds.
pub fn extract_tic(stack: ArrayView3<'_, f32>, roi: &Roi, fps: f64) -> CeusResult<Tic> {
    let (frames, h, w) = stack.dim();
    let mask = fill(&roi.shape, (h, w))
        .map_err(|message| CeusError::invalid_roi(&roi.label, message))?;
    let raw = roi_trace(stack, &mask)?;
    let time = FrameClock::new(fps).time_axis(frames);
    tracing::debug!(label = %roi.label, pixels = mask.count(), frames, "TIC extracted");
    Tic::new(roi.label.clone(), time, raw)
}

/// Extract every ROI of a session. One ROI failing never affects another.
pub fn extract_all(
    stack: ArrayView3<'_, f32>,
    session: &RoiSession,
    fps: f64,
) -> Vec<(String, CeusResult<Tic>)> {
    session
        .iter()
        .map(|roi| {
            let result = extract_tic(stack, roi, fps);
            if let Err(e) = &result {
                tracing::warn!(label = %roi.label, error = %e, "TIC extraction failed");
            }
            (roi.label.clone(), result)
        })
        .collect()
}

/// Running median over `max(3, ⌊window_secs·fps⌋)` frames (forced odd),
/// edges extended.
pub fn median_filter_trace(values: &[f64], fps: f64, window_secs: f64) -> Vec<f64> {
    let frames = (window_secs * fps).floor();
    let width = if frames.is_finite() && frames > 3.0 {
        frames as usize
    } else {
        3
    };
    filters::running_median(values, width, Edge::Nearest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn square(x0: f64, y0: f64, side: f64) -> RoiShape {
        RoiShape::polygon(vec![
            (x0, y0),
            (x0 + side, y0),
            (x0 + side, y0 + side),
            (x0, y0 + side),
        ])
    }

    #[test]
    fn test_square_covers_area() {
        let mask = rasterize(&square(2.0, 3.0, 10.0), (20, 20)).unwrap();
        assert_eq!(mask.count(), 100);
        assert!(mask.pixels()[[3, 2]]);
        assert!(!mask.pixels()[[13, 2]]);
        assert!(!mask.pixels()[[3, 12]]);
    }

    #[test]
    fn test_triangle_even_odd() {
        let triangle = RoiShape::polygon(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let mask = rasterize(&triangle, (12, 12)).unwrap();
        assert!(mask.pixels()[[0, 0]]);
        assert!(mask.pixels()[[4, 5]]);
        assert!(!mask.pixels()[[6, 5]]);
        // 10 + 9 + ... + 1 pixel centres.
        assert_eq!(mask.count(), 55);
    }

    #[test]
    fn test_rectangle_inclusive() {
        let mask = rasterize(&RoiShape::rectangle(1.0, 1.0, 5.0, 6.0), (10, 10)).unwrap();
        assert_eq!(mask.count(), 5 * 6);
    }

    #[test]
    fn test_invalid_shapes() {
        let line = RoiShape::polygon(vec![(0.0, 0.0), (5.0, 5.0)]);
        assert!(matches!(
            rasterize(&line, (10, 10)),
            Err(CeusError::InvalidRoi { .. })
        ));

        let flat = RoiShape::polygon(vec![(0.0, 0.0), (5.0, 0.0), (9.0, 0.0)]);
        assert!(rasterize(&flat, (10, 10)).is_err());

        let tiny = square(1.0, 1.0, 3.0);
        assert!(rasterize(&tiny, (10, 10)).is_err());

        let outside = square(50.0, 50.0, 10.0);
        assert!(rasterize(&outside, (10, 10)).is_err());
    }

    #[test]
    fn test_trace_and_extract() {
        let stack = Array3::from_shape_fn((4, 10, 10), |(t, y, _)| {
            if y < 5 {
                10.0 * t as f32
            } else {
                1000.0
            }
        });
        let roi = Roi {
            label: "top".into(),
            shape: RoiShape::rectangle(0.0, 0.0, 9.0, 4.0),
            color: [255, 0, 0],
        };
        let tic = extract_tic(stack.view(), &roi, 10.0).unwrap();
        assert_eq!(tic.raw(), &[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(tic.time(), &[0.0, 0.1, 0.2, 0.3]);
        assert_eq!(tic.value()[3], 30.0);
    }

    #[test]
    fn test_extract_all_isolates_failures() {
        let stack = Array3::<f32>::ones((3, 10, 10));
        let mut session = RoiSession::new();
        session.add(square(0.0, 0.0, 8.0), None).unwrap();
        session.add(square(0.0, 0.0, 2.0), None).unwrap();
        let results = extract_all(stack.view(), &session, 10.0);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        match &results[1].1 {
            Err(CeusError::InvalidRoi { label, .. }) => assert_eq!(label, "ROI_2"),
            other => panic!("expected InvalidRoi, got {other:?}"),
        }
    }

    #[test]
    fn test_mask_shape_checked() {
        let mask = rasterize(&square(0.0, 0.0, 8.0), (10, 10)).unwrap();
        let stack = Array3::<f32>::zeros((2, 12, 10));
        assert!(roi_trace(stack.view(), &mask).is_err());
    }

    #[test]
    fn test_median_filter_trace() {
        let values = [0.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0];
        // 0.5 s at 10 fps -> 5 frames.
        let filtered = median_filter_trace(&values, 10.0, 0.5);
        assert!(filtered.iter().all(|&v| v == 0.0));
        // Short windows still use 3 frames.
        let filtered = median_filter_trace(&[1.0, 5.0, 1.0], 2.0, 0.5);
        assert_eq!(filtered, vec![1.0, 1.0, 1.0]);
    }
}
