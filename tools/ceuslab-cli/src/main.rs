//! CEUSLab CLI: command-line front end for the perfusion analysis core.
//!
//! Usage:
//!   ceuslab synth [OPTIONS]       Write a synthetic wash-in clip
//!   ceuslab info <CLIP>           Show clip, timing, and region information
//!   ceuslab analyze <CLIP>        Run the analysis pipeline on a clip

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod clip;
mod commands;

#[derive(Parser)]
#[command(
    name = "ceuslab",
    about = "Contrast-enhanced ultrasound perfusion analysis",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic wash-in clip
    Synth {
        /// Output clip file
        #[arg(short, long, default_value = "clip.json")]
        output: PathBuf,

        /// Number of frames
        #[arg(long, default_value = "60")]
        frames: usize,

        /// Frame width and height in pixels
        #[arg(long, default_value = "64")]
        size: usize,

        /// Frame rate written to the timing metadata
        #[arg(long, default_value = "10")]
        fps: f64,

        /// Wash-in plateau above baseline
        #[arg(long, default_value = "150")]
        plateau: f64,

        /// Wash-in rate (1/s)
        #[arg(long, default_value = "0.3")]
        rate: f64,

        /// Standard deviation of additive noise
        #[arg(long, default_value = "0")]
        noise: f64,

        /// Add a B-mode half and lay the clip out side by side
        #[arg(long)]
        split_screen: bool,

        /// Seed for the noise generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show clip information
    Info {
        /// Path to the clip file
        clip: PathBuf,
    },

    /// Run the analysis pipeline on a clip
    Analyze {
        /// Path to the clip file
        clip: PathBuf,

        /// Rectangular ROI as x0,y0,x1,y1 in contrast-stack pixels (repeatable)
        #[arg(long = "roi", value_name = "X0,Y0,X1,Y1")]
        rois: Vec<String>,

        /// Skip motion compensation
        #[arg(long)]
        no_motion: bool,

        /// Skip intensity preprocessing
        #[arg(long)]
        no_preprocess: bool,

        /// Analyse the whole clip instead of the post-washout window
        #[arg(long)]
        no_crop: bool,

        /// Use this frame as the flash instead of detecting it
        #[arg(long)]
        flash_frame: Option<usize>,

        /// LOESS span (fraction of points per neighborhood)
        #[arg(long)]
        span: Option<f64>,

        /// Multi-start count per model
        #[arg(long)]
        starts: Option<usize>,

        /// Seed for the multi-start draws
        #[arg(long)]
        seed: Option<u64>,

        /// Models to fit: lognormal,gamma,ldrw,fpt,washin
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,

        /// Write signals, parameters, predictions, and a report into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ceuslab_common::AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => ceuslab_common::AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    ceuslab_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Synth {
            output,
            frames,
            size,
            fps,
            plateau,
            rate,
            noise,
            split_screen,
            seed,
        } => commands::synth::run(commands::synth::SynthOptions {
            output,
            frames,
            size,
            fps,
            plateau,
            rate,
            noise,
            split_screen,
            seed,
        }),
        Commands::Info { clip } => commands::info::run(&config, clip),
        Commands::Analyze {
            clip,
            rois,
            no_motion,
            no_preprocess,
            no_crop,
            flash_frame,
            span,
            starts,
            seed,
            models,
            out,
        } => commands::analyze::run(
            &config,
            commands::analyze::AnalyzeOptions {
                clip,
                rois,
                motion: !no_motion,
                preprocess: !no_preprocess,
                crop: !no_crop,
                flash_frame,
                span,
                starts,
                seed,
                models,
                out,
            },
        ),
    }
}
