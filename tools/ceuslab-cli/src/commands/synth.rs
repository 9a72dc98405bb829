//! Write a synthetic flash-replenishment clip.

use std::path::PathBuf;

use ceuslab_common::FrameTimingMetadata;
use ceuslab_volume_model::{PixelVolume, RegionDataType, RegionDescriptor, VendorHint};
use ndarray::{Array3, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clip::ClipFile;

/// Frames before the flash.
const PRE_FLASH_FRAMES: usize = 8;
const BASELINE: f64 = 20.0;
/// Channel gains of the contrast overlay in split-screen clips.
const TINT: [f32; 3] = [1.0, 0.6, 0.3];

pub struct SynthOptions {
    pub output: PathBuf,
    pub frames: usize,
    pub size: usize,
    pub fps: f64,
    pub plateau: f64,
    pub rate: f64,
    pub noise: f64,
    pub split_screen: bool,
    pub seed: Option<u64>,
}

pub fn run(opts: SynthOptions) -> anyhow::Result<()> {
    if opts.frames <= PRE_FLASH_FRAMES + 2 {
        anyhow::bail!("need more than {} frames", PRE_FLASH_FRAMES + 2);
    }
    if opts.size < 16 {
        anyhow::bail!("frames must be at least 16 pixels wide");
    }
    if !opts.fps.is_finite() || opts.fps <= 0.0 {
        anyhow::bail!("fps must be positive");
    }

    let seed = opts.seed.unwrap_or_else(|| rand::rng().random());
    let mut rng = StdRng::seed_from_u64(seed);
    let contrast = contrast_frames(&opts, &mut rng);

    let n = opts.size as i64;
    let (volume, regions) = if opts.split_screen {
        let data = Array4::from_shape_fn((opts.frames, opts.size, 2 * opts.size, 3), |(t, y, x, c)| {
            if x < opts.size {
                texture(y, x) as f32 + 60.0
            } else {
                contrast[[t, y, x - opts.size]] * TINT[c]
            }
        });
        let regions = vec![
            RegionDescriptor::new(0, 0, n - 1, n - 1, RegionDataType::Ambiguous),
            RegionDescriptor::new(n, 0, 2 * n - 1, n - 1, RegionDataType::Ambiguous),
        ];
        (PixelVolume::from_rgb(data)?, regions)
    } else {
        let regions = vec![RegionDescriptor::new(
            0,
            0,
            n - 1,
            n - 1,
            RegionDataType::ExplicitContrast,
        )];
        (PixelVolume::from_gray(contrast)?, regions)
    };

    let clip = ClipFile {
        volume,
        regions,
        vendor: VendorHint::default(),
        timing: FrameTimingMetadata {
            frame_time_ms: Some(1000.0 / opts.fps),
            ..Default::default()
        },
    };
    clip.save(&opts.output)?;

    tracing::info!(seed, path = %opts.output.display(), "Synthetic clip written");
    println!("Synthetic clip written to {}", opts.output.display());
    println!(
        "  {} frames @ {} fps, flash after frame {}",
        opts.frames,
        opts.fps,
        PRE_FLASH_FRAMES - 1
    );
    println!(
        "  Wash-in: plateau {} rate {}/s, noise ±{}",
        opts.plateau, opts.rate, opts.noise
    );
    println!("  Noise seed: {seed}");
    Ok(())
}

/// Saturated frames, a flash, then `baseline + A·(1 − e^{−B·t})`.
fn contrast_frames(opts: &SynthOptions, rng: &mut StdRng) -> Array3<f32> {
    let mut frames = Array3::from_shape_fn((opts.frames, opts.size, opts.size), |(t, y, x)| {
        let level = if t < PRE_FLASH_FRAMES {
            opts.plateau
        } else {
            let secs = (t - PRE_FLASH_FRAMES) as f64 / opts.fps;
            opts.plateau * (1.0 - (-opts.rate * secs).exp())
        };
        (BASELINE + level + texture(y, x)) as f32
    });
    if opts.noise > 0.0 {
        frames.mapv_inplace(|v| v + rng.random_range(-opts.noise..=opts.noise) as f32);
    }
    frames.mapv_inplace(|v| v.max(0.0));
    frames
}

/// Static tissue texture for the registration to lock on to.
fn texture(y: usize, x: usize) -> f64 {
    10.0 * ((x as f64 / 3.0).sin() * (y as f64 / 4.0).cos() + 1.0)
}
