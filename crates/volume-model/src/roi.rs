//! Regions of interest.
//!
//! ROIs are drawn in CEUS-stack pixel coordinates (`x` = column,
//! `y` = row). A [`RoiSession`] owns the ROIs of one analysis; callers
//! create and pass it explicitly.

use ceuslab_common::{CeusError, CeusResult};
use serde::{Deserialize, Serialize};

/// Display colors assigned to ROIs in insertion order.
pub const ROI_PALETTE: [[u8; 3]; 8] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
];

/// ROI geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoiShape {
    /// Closed polygon, vertices as `(x, y)`.
    Polygon { vertices: Vec<(f64, f64)> },
    /// Axis-aligned box with inclusive pixel bounds.
    Rectangle { x0: f64, y0: f64, x1: f64, y1: f64 },
}

impl RoiShape {
    pub fn polygon(vertices: Vec<(f64, f64)>) -> Self {
        Self::Polygon { vertices }
    }

    pub fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::Rectangle {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Outline vertices. Rectangles yield their four corners clockwise.
    pub fn vertices(&self) -> Vec<(f64, f64)> {
        match self {
            Self::Polygon { vertices } => vertices.clone(),
            Self::Rectangle { x0, y0, x1, y1 } => {
                vec![(*x0, *y0), (*x1, *y0), (*x1, *y1), (*x0, *y1)]
            }
        }
    }

    /// Enclosed area (shoelace formula).
    pub fn area(&self) -> f64 {
        match self {
            Self::Rectangle { x0, y0, x1, y1 } => (x1 - x0).abs() * (y1 - y0).abs(),
            Self::Polygon { vertices } => shoelace(vertices).abs(),
        }
    }

    /// Area centroid. Falls back to the vertex mean for zero-area outlines.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let pts = self.vertices();
        if pts.is_empty() {
            return None;
        }
        let signed = shoelace(&pts);
        if signed.abs() < 1e-12 {
            let n = pts.len() as f64;
            let (sx, sy) = pts
                .iter()
                .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            return Some((sx / n, sy / n));
        }
        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 0..pts.len() {
            let (xa, ya) = pts[i];
            let (xb, yb) = pts[(i + 1) % pts.len()];
            let cross = xa * yb - xb * ya;
            cx += (xa + xb) * cross;
            cy += (ya + yb) * cross;
        }
        Some((cx / (6.0 * signed), cy / (6.0 * signed)))
    }

    /// Bounding box `(x0, y0, x1, y1)`.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let pts = self.vertices();
        if pts.is_empty() {
            return None;
        }
        Some(pts.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |b, &(x, y)| (b.0.min(x), b.1.min(y), b.2.max(x), b.3.max(y)),
        ))
    }
}

fn shoelace(pts: &[(f64, f64)]) -> f64 {
    if pts.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..pts.len() {
        let (xa, ya) = pts[i];
        let (xb, yb) = pts[(i + 1) % pts.len()];
        acc += xa * yb - xb * ya;
    }
    acc / 2.0
}

/// A labelled ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub label: String,
    pub shape: RoiShape,
    pub color: [u8; 3],
}

impl Roi {
    pub fn area(&self) -> f64 {
        self.shape.area()
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        self.shape.centroid()
    }

    pub fn vertices(&self) -> Vec<(f64, f64)> {
        self.shape.vertices()
    }
}

/// The ROIs of one analysis session, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoiSession {
    rois: Vec<Roi>,
    /// Number of ROIs added since creation or the last `clear`.
    added: usize,
}

impl RoiSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ROI. Without a label the next free `ROI_n` is used.
    ///
    /// Explicit labels already in the session are rejected.
    pub fn add(&mut self, shape: RoiShape, label: Option<String>) -> CeusResult<&Roi> {
        let label = match label {
            Some(label) => {
                if label.trim().is_empty() {
                    return Err(CeusError::invalid_roi(label, "label must not be empty"));
                }
                if self.contains(&label) {
                    return Err(CeusError::invalid_roi(label, "label already in use"));
                }
                label
            }
            None => self.next_auto_label(),
        };

        let color = ROI_PALETTE[self.added % ROI_PALETTE.len()];
        self.added += 1;
        tracing::debug!(label = %label, area = shape.area(), "ROI added");
        self.rois.push(Roi {
            label,
            shape,
            color,
        });
        Ok(&self.rois[self.rois.len() - 1])
    }

    /// Remove a ROI by label, returning it.
    pub fn remove(&mut self, label: &str) -> Option<Roi> {
        let index = self.rois.iter().position(|r| r.label == label)?;
        Some(self.rois.remove(index))
    }

    /// Rename a ROI. Refused when `new` already exists or `old` is missing.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> CeusResult<()> {
        let new = new.into();
        if new.trim().is_empty() {
            return Err(CeusError::invalid_roi(new, "label must not be empty"));
        }
        if old != new && self.contains(&new) {
            return Err(CeusError::invalid_roi(new, "label already in use"));
        }
        let roi = self
            .rois
            .iter_mut()
            .find(|r| r.label == old)
            .ok_or_else(|| CeusError::invalid_roi(old, "no such ROI"))?;
        roi.label = new;
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Roi> {
        self.rois.iter().find(|r| r.label == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.rois.iter()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rois.iter().map(|r| r.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    /// Remove every ROI and restart auto labels at `ROI_1`.
    pub fn clear(&mut self) {
        self.rois.clear();
        self.added = 0;
    }

    fn next_auto_label(&self) -> String {
        let mut n = self.added + 1;
        loop {
            let candidate = format!("ROI_{n}");
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl<'a> IntoIterator for &'a RoiSession {
    type Item = &'a Roi;
    type IntoIter = std::slice::Iter<'a, Roi>;

    fn into_iter(self) -> Self::IntoIter {
        self.rois.iter()
    }
}
