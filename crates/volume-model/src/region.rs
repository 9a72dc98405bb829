//! Ultrasound region geometry.
//!
//! A clip may carry several ultrasound regions (side-by-side B-mode and
//! contrast panes, for example). Each [`RegionDescriptor`] is an inclusive
//! pixel box plus the data-type code the scanner wrote for it.

use serde::{Deserialize, Serialize};

use crate::volume::PixelVolume;

/// Region data-type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum RegionDataType {
    /// Tissue or unspecified (code 1). Could be either pane.
    Ambiguous,
    /// Explicitly flagged contrast region (code 2).
    ExplicitContrast,
    Other(u16),
}

impl From<u16> for RegionDataType {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Ambiguous,
            2 => Self::ExplicitContrast,
            other => Self::Other(other),
        }
    }
}

impl From<RegionDataType> for u16 {
    fn from(kind: RegionDataType) -> Self {
        match kind {
            RegionDataType::Ambiguous => 1,
            RegionDataType::ExplicitContrast => 2,
            RegionDataType::Other(code) => code,
        }
    }
}

/// One ultrasound region as reported by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    /// Left edge (inclusive).
    pub x0: i64,
    /// Top edge (inclusive).
    pub y0: i64,
    /// Right edge (inclusive).
    pub x1: i64,
    /// Bottom edge (inclusive).
    pub y1: i64,
    pub data_type: RegionDataType,
    /// Vendor flags, carried through untouched.
    #[serde(default)]
    pub flags: u32,
}

/// A region clipped to the volume, in unsigned pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelBox {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }
}

impl RegionDescriptor {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64, data_type: RegionDataType) -> Self {
        Self {
            x0,
            y0,
            x1,
            y1,
            data_type,
            flags: 0,
        }
    }

    /// Clip to a `height × width` frame.
    ///
    /// Returns `None` when the clipped box is degenerate (`x0 >= x1` or
    /// `y0 >= y1`).
    pub fn clip_to(&self, height: usize, width: usize) -> Option<PixelBox> {
        if height == 0 || width == 0 {
            return None;
        }
        let max_x = width as i64 - 1;
        let max_y = height as i64 - 1;
        let x0 = self.x0.clamp(0, max_x);
        let x1 = self.x1.clamp(0, max_x);
        let y0 = self.y0.clamp(0, max_y);
        let y1 = self.y1.clamp(0, max_y);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelBox {
            x0: x0 as usize,
            y0: y0 as usize,
            x1: x1 as usize,
            y1: y1 as usize,
        })
    }
}

/// Manufacturer information used to break split-screen ambiguity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorHint {
    #[serde(default)]
    pub manufacturer: Option<String>,
}

impl VendorHint {
    pub fn new(manufacturer: impl Into<String>) -> Self {
        Self {
            manufacturer: Some(manufacturer.into()),
        }
    }

    /// Vendors whose split-screen layout puts B-mode on the left.
    pub fn is_split_screen_known(&self) -> bool {
        self.manufacturer
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("ge"))
            .unwrap_or(false)
    }
}

/// How the CEUS and B-mode stacks were located.
///
/// Indices refer to positions in the descriptor list passed to the
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionLayout {
    ExplicitContrast { ceus: usize, bmode: Option<usize> },
    SplitScreenKnownVendor { ceus: usize, bmode: usize },
    SplitScreenGeneric { ceus: usize, bmode: usize },
    SingleRegion { region: usize },
    NoRegion,
}

impl RegionLayout {
    pub fn ceus_region(&self) -> Option<usize> {
        match *self {
            Self::ExplicitContrast { ceus, .. }
            | Self::SplitScreenKnownVendor { ceus, .. }
            | Self::SplitScreenGeneric { ceus, .. } => Some(ceus),
            Self::SingleRegion { region } => Some(region),
            Self::NoRegion => None,
        }
    }

    pub fn bmode_region(&self) -> Option<usize> {
        match *self {
            Self::ExplicitContrast { bmode, .. } => bmode,
            Self::SplitScreenKnownVendor { bmode, .. } | Self::SplitScreenGeneric { bmode, .. } => {
                Some(bmode)
            }
            Self::SingleRegion { .. } | Self::NoRegion => None,
        }
    }
}

/// Result of region classification. The CEUS stack is always present.
#[derive(Debug, Clone)]
pub struct ClassifiedStacks {
    pub ceus: PixelVolume,
    pub bmode: Option<PixelVolume>,
    pub layout: RegionLayout,
}

impl ClassifiedStacks {
    pub fn ceus_region(&self) -> Option<usize> {
        self.layout.ceus_region()
    }

    pub fn bmode_region(&self) -> Option<usize> {
        self.layout.bmode_region()
    }
}
