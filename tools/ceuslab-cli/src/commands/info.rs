//! Show clip information.

use std::path::PathBuf;

use ceuslab_analysis_core::events::{analysis_window, detect_flash, FlashConfig};
use ceuslab_analysis_core::classify_regions;
use ceuslab_common::{AppConfig, FrameClock};

use crate::clip::ClipFile;

pub fn run(config: &AppConfig, path: PathBuf) -> anyhow::Result<()> {
    let clip = ClipFile::load(&path)?;
    let volume = &clip.volume;
    let (frames, height, width, channels) = volume.dim();
    let (lo, hi) = volume.sample_range();

    println!("Clip: {}", path.display());
    println!("  Frames: {frames}");
    println!("  Size: {width}x{height} ({channels} channel(s), {:?})", volume.photometric());
    println!("  Sample range: {lo} .. {hi}");
    println!();

    let clock = FrameClock::from_metadata(&clip.timing);
    println!("Timing:");
    println!("  FPS: {:.3} (from {:?})", clock.fps(), clock.source());
    println!("  Duration: {:.2}s", frames as f64 * clock.frame_interval_secs());
    println!();

    println!("Regions:");
    if clip.regions.is_empty() {
        println!("  (none)");
    }
    for (i, region) in clip.regions.iter().enumerate() {
        let clipped = match region.clip_to(height, width) {
            Some(b) => format!("{}x{} after clipping", b.width(), b.height()),
            None => "degenerate, ignored".to_string(),
        };
        println!(
            "  [{i}] ({}, {}) - ({}, {}) {:?}: {clipped}",
            region.x0, region.y0, region.x1, region.y1, region.data_type
        );
    }
    if let Some(m) = &clip.vendor.manufacturer {
        println!("  Manufacturer: {m}");
    }

    let stacks = classify_regions(volume, &clip.regions, &clip.vendor)
        .map_err(|e| anyhow::anyhow!("Region classification failed: {e}"))?;
    println!("  Layout: {:?}", stacks.layout);
    let (_, ch, cw, _) = stacks.ceus.dim();
    println!("  Contrast stack: {cw}x{ch}");
    if let Some(bmode) = &stacks.bmode {
        let (_, bh, bw, _) = bmode.dim();
        println!("  B-mode stack: {bw}x{bh}");
    }
    println!();

    let defaults = &config.analysis;
    let flash = detect_flash(&stacks.ceus, &FlashConfig::from(defaults));
    let window = analysis_window(
        flash.washout_index,
        clock.fps(),
        defaults.analysis_window_secs,
        frames,
    );
    println!("Events:");
    println!("  Flash frame: {}", flash.flash_index);
    println!("  Washout frame: {}", flash.washout_index);
    println!(
        "  Analysis window: frames {}..{} ({:.2}s)",
        window.start,
        window.end,
        window.len() as f64 * clock.frame_interval_secs()
    );

    Ok(())
}
