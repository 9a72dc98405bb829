//! Region classification.
//!
//! Splits a clip into its contrast (CEUS) stack and, when present, its
//! B-mode stack. The layout is resolved once into a [`RegionLayout`] and the
//! crop is driven entirely by that value.

use ceuslab_common::{CeusError, CeusResult};
use ceuslab_volume_model::{
    ClassifiedStacks, Photometric, PixelBox, PixelVolume, RegionDataType, RegionDescriptor,
    RegionLayout, VendorHint,
};
use ndarray::{s, Axis, Zip};

/// A descriptor that survived clipping.
#[derive(Debug, Clone, Copy)]
struct UsableRegion {
    index: usize,
    bounds: PixelBox,
    data_type: RegionDataType,
}

/// Locate the CEUS and B-mode stacks of `volume`.
pub fn classify_regions(
    volume: &PixelVolume,
    regions: &[RegionDescriptor],
    vendor: &VendorHint,
) -> CeusResult<ClassifiedStacks> {
    if volume.height() * volume.width() == 0 {
        return Err(CeusError::empty_video("frames contain no pixels"));
    }

    let usable: Vec<UsableRegion> = regions
        .iter()
        .enumerate()
        .filter_map(|(index, region)| {
            region
                .clip_to(volume.height(), volume.width())
                .map(|bounds| UsableRegion {
                    index,
                    bounds,
                    data_type: region.data_type,
                })
        })
        .collect();

    if usable.len() < regions.len() {
        tracing::debug!(
            dropped = regions.len() - usable.len(),
            "Dropped degenerate regions after clipping"
        );
    }

    let layout = resolve_layout(volume, &usable, vendor);
    let bounds_of = |index: usize| {
        usable
            .iter()
            .find(|r| r.index == index)
            .map(|r| r.bounds)
    };

    let ceus = match layout.ceus_region().and_then(bounds_of) {
        Some(b) => crop_region(volume, b)?,
        None => to_rgb_if_ybr(volume.clone())?,
    };
    let bmode = match layout.bmode_region().and_then(bounds_of) {
        Some(b) => Some(crop_region(volume, b)?),
        None => None,
    };

    tracing::info!(
        layout = ?layout,
        ceus_shape = ?ceus.dim(),
        has_bmode = bmode.is_some(),
        "Regions classified"
    );

    Ok(ClassifiedStacks {
        ceus,
        bmode,
        layout,
    })
}

fn resolve_layout(
    volume: &PixelVolume,
    usable: &[UsableRegion],
    vendor: &VendorHint,
) -> RegionLayout {
    let Some(first) = usable.first() else {
        return RegionLayout::NoRegion;
    };

    if let Some(contrast) = usable
        .iter()
        .find(|r| r.data_type == RegionDataType::ExplicitContrast)
    {
        let remaining: Vec<&UsableRegion> = usable
            .iter()
            .filter(|r| r.index != contrast.index && r.data_type == RegionDataType::Ambiguous)
            .collect();
        let bmode = match remaining.as_slice() {
            [only] => Some(only.index),
            _ => None,
        };
        return RegionLayout::ExplicitContrast {
            ceus: contrast.index,
            bmode,
        };
    }

    let ambiguous: Vec<&UsableRegion> = usable
        .iter()
        .filter(|r| r.data_type == RegionDataType::Ambiguous)
        .collect();

    match (usable.len(), ambiguous.as_slice()) {
        (2, [a, b]) if vendor.is_split_screen_known() => {
            // B-mode sits on the left for this vendor's dual display.
            let (left, right) = if (b.bounds.x0, b.index) < (a.bounds.x0, a.index) {
                (b, a)
            } else {
                (a, b)
            };
            RegionLayout::SplitScreenKnownVendor {
                ceus: right.index,
                bmode: left.index,
            }
        }
        (2, [a, b]) => {
            let var_a = color_variance(volume, a.bounds);
            let var_b = color_variance(volume, b.bounds);
            tracing::debug!(var_a, var_b, "Split-screen color variance");
            let (ceus, bmode) = if var_b > var_a { (b, a) } else { (a, b) };
            RegionLayout::SplitScreenGeneric {
                ceus: ceus.index,
                bmode: bmode.index,
            }
        }
        _ => RegionLayout::SingleRegion {
            region: first.index,
        },
    }
}

/// Sum of the standard deviations of `R−G`, `G−B` and `R−B` inside `bounds`
/// on the middle frame. Single-channel volumes score 0.
fn color_variance(volume: &PixelVolume, bounds: PixelBox) -> f64 {
    if volume.channels() != 3 {
        return 0.0;
    }
    let t = (volume.frames() / 2).min(volume.frames() - 1);
    let frame = volume.frame(t);
    let region = frame.slice(s![bounds.y0..=bounds.y1, bounds.x0..=bounds.x1, ..]);
    let ybr = volume.photometric() == Photometric::YbrFull;

    let mut rg = Vec::with_capacity(bounds.width() * bounds.height());
    let mut gb = Vec::with_capacity(rg.capacity());
    let mut rb = Vec::with_capacity(rg.capacity());
    for px in region.lanes(Axis(2)) {
        let (r, g, b) = if ybr {
            ybr_to_rgb(px[0], px[1], px[2])
        } else {
            (px[0], px[1], px[2])
        };
        rg.push((r - g) as f64);
        gb.push((g - b) as f64);
        rb.push((r - b) as f64);
    }
    std_dev(&rg) + std_dev(&gb) + std_dev(&rb)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn crop_region(volume: &PixelVolume, b: PixelBox) -> CeusResult<PixelVolume> {
    to_rgb_if_ybr(volume.crop(b.x0, b.y0, b.x1, b.y1)?)
}

/// Convert full-range YCbCr stacks to RGB. Other stacks pass through.
pub fn to_rgb_if_ybr(volume: PixelVolume) -> CeusResult<PixelVolume> {
    if volume.photometric() != Photometric::YbrFull || volume.channels() != 3 {
        return Ok(volume);
    }
    let mut data = volume.into_data();
    Zip::from(data.lanes_mut(Axis(3))).par_for_each(|mut px| {
        let (r, g, b) = ybr_to_rgb(px[0], px[1], px[2]);
        px[0] = r;
        px[1] = g;
        px[2] = b;
    });
    PixelVolume::new(data, Photometric::Rgb)
}

/// BT.601 full-range YCbCr to RGB, clipped to `[0, 255]`.
fn ybr_to_rgb(y: f32, cb: f32, cr: f32) -> (f32, f32, f32) {
    let cb = cb - 128.0;
    let cr = cr - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    (r.clamp(0.0, 255.0), g.clamp(0.0, 255.0), b.clamp(0.0, 255.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// 4 frames, 20×40 RGB. Left half gray, right half colorful.
    fn split_volume() -> PixelVolume {
        let data = Array4::from_shape_fn((4, 20, 40, 3), |(_, y, x, c)| {
            if x < 20 {
                100.0
            } else {
                ((x * 37 + y * 11 + c * 53) % 255) as f32
            }
        });
        PixelVolume::from_rgb(data).unwrap()
    }

    fn ambiguous(x0: i64, x1: i64) -> RegionDescriptor {
        RegionDescriptor::new(x0, 0, x1, 19, RegionDataType::Ambiguous)
    }

    #[test]
    fn test_no_region_uses_whole_volume() {
        let volume = split_volume();
        let stacks = classify_regions(&volume, &[], &VendorHint::default()).unwrap();
        assert_eq!(stacks.layout, RegionLayout::NoRegion);
        assert_eq!(stacks.ceus.dim(), volume.dim());
        assert!(stacks.bmode.is_none());
    }

    #[test]
    fn test_explicit_contrast_region() {
        let volume = split_volume();
        let regions = [
            ambiguous(0, 19),
            RegionDescriptor::new(20, 0, 39, 19, RegionDataType::ExplicitContrast),
        ];
        let stacks = classify_regions(&volume, &regions, &VendorHint::default()).unwrap();
        assert_eq!(
            stacks.layout,
            RegionLayout::ExplicitContrast {
                ceus: 1,
                bmode: Some(0)
            }
        );
        assert_eq!(stacks.ceus.width(), 20);
        assert_eq!(stacks.bmode.unwrap().width(), 20);
    }

    #[test]
    fn test_known_vendor_left_is_bmode() {
        let volume = split_volume();
        let regions = [ambiguous(20, 39), ambiguous(0, 19)];
        let stacks =
            classify_regions(&volume, &regions, &VendorHint::new("GE Healthcare")).unwrap();
        assert_eq!(
            stacks.layout,
            RegionLayout::SplitScreenKnownVendor { ceus: 0, bmode: 1 }
        );
    }

    #[test]
    fn test_generic_vendor_uses_color_variance() {
        let volume = split_volume();
        let regions = [ambiguous(20, 39), ambiguous(0, 19)];
        let stacks = classify_regions(&volume, &regions, &VendorHint::new("Acme")).unwrap();
        assert_eq!(
            stacks.layout,
            RegionLayout::SplitScreenGeneric { ceus: 0, bmode: 1 }
        );
        // The gray pane has zero chroma spread.
        let bmode = stacks.bmode.unwrap();
        assert!(bmode.data().iter().all(|&v| v == 100.0));
    }

    #[test]
    fn test_equal_variance_first_is_ceus() {
        let data = Array4::from_elem((3, 10, 20, 1), 5.0f32);
        let volume = PixelVolume::new(data, Photometric::Monochrome).unwrap();
        let regions = [ambiguous(10, 19), ambiguous(0, 9)];
        let stacks = classify_regions(&volume, &regions, &VendorHint::default()).unwrap();
        assert_eq!(
            stacks.layout,
            RegionLayout::SplitScreenGeneric { ceus: 0, bmode: 1 }
        );
    }

    #[test]
    fn test_degenerate_regions_dropped() {
        let volume = split_volume();
        let regions = [
            RegionDescriptor::new(100, 0, 120, 10, RegionDataType::Ambiguous),
            ambiguous(0, 19),
        ];
        let stacks = classify_regions(&volume, &regions, &VendorHint::default()).unwrap();
        assert_eq!(stacks.layout, RegionLayout::SingleRegion { region: 1 });
    }

    #[test]
    fn test_three_ambiguous_falls_back_to_first() {
        let volume = split_volume();
        let regions = [ambiguous(0, 10), ambiguous(11, 25), ambiguous(26, 39)];
        let stacks = classify_regions(&volume, &regions, &VendorHint::default()).unwrap();
        assert_eq!(stacks.layout, RegionLayout::SingleRegion { region: 0 });
        assert_eq!(stacks.ceus.width(), 11);
    }

    #[test]
    fn test_ybr_converted_after_crop() {
        let mut data = Array4::<f32>::zeros((2, 4, 4, 3));
        data.slice_mut(s![.., .., .., 0]).fill(100.0);
        data.slice_mut(s![.., .., .., 1]).fill(128.0);
        data.slice_mut(s![.., .., .., 2]).fill(228.0);
        let volume = PixelVolume::new(data, Photometric::YbrFull).unwrap();
        let stacks = classify_regions(&volume, &[], &VendorHint::default()).unwrap();
        assert_eq!(stacks.ceus.photometric(), Photometric::Rgb);
        let px = stacks.ceus.data();
        // R = 100 + 1.402 * 100 = 240.2
        assert!((px[[0, 0, 0, 0]] - 240.2).abs() < 1e-3);
        // G = 100 - 0.714136 * 100 = 28.5864
        assert!((px[[0, 0, 0, 1]] - 28.5864).abs() < 1e-3);
        assert!((px[[0, 0, 0, 2]] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_ybr_clipped() {
        assert_eq!(ybr_to_rgb(250.0, 255.0, 255.0).0, 255.0);
        assert_eq!(ybr_to_rgb(0.0, 0.0, 0.0).0, 0.0);
    }
}
