//! Run the analysis pipeline on a clip.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ceuslab_analysis_core::export::{parameter_rows, predicted_rows, signal_rows};
use ceuslab_analysis_core::{
    analyze, classify_regions, AnalysisReport, AnalysisRequest, KineticModel, MetricSet,
    RoiAnalysis,
};
use ceuslab_common::{AppConfig, FrameClock};
use ceuslab_volume_model::{RegionLayout, RoiSession, RoiShape};
use serde::Serialize;

use crate::clip::ClipFile;

pub struct AnalyzeOptions {
    pub clip: PathBuf,
    pub rois: Vec<String>,
    pub motion: bool,
    pub preprocess: bool,
    pub crop: bool,
    pub flash_frame: Option<usize>,
    pub span: Option<f64>,
    pub starts: Option<usize>,
    pub seed: Option<u64>,
    pub models: Vec<String>,
    pub out: Option<PathBuf>,
}

pub fn run(config: &AppConfig, opts: AnalyzeOptions) -> anyhow::Result<()> {
    println!("Analyzing clip at: {}", opts.clip.display());
    let clip = ClipFile::load(&opts.clip)?;
    let clock = FrameClock::from_metadata(&clip.timing);

    let mut defaults = config.analysis.clone();
    if let Some(span) = opts.span {
        defaults.loess_span = span;
    }
    if let Some(starts) = opts.starts {
        defaults.fit_starts = starts;
    }
    if opts.seed.is_some() {
        defaults.fit_seed = opts.seed;
    }

    let mut request = AnalysisRequest::new(&clip.volume, &clip.regions, clock)
        .with_defaults(&defaults)
        .map_err(|e| anyhow::anyhow!("Invalid analysis settings: {e}"))?;
    request.vendor = clip.vendor.clone();
    request.flash_override = opts.flash_frame;
    request.stages.motion = opts.motion;
    request.stages.preprocess = opts.preprocess;
    request.stages.crop_to_window = opts.crop;
    if !opts.models.is_empty() {
        request.fit.models = parse_models(&opts.models)?;
    }

    let session = build_session(&clip, &opts.rois)?;
    println!("  {} ROI(s) at {:.2} fps", session.len(), clock.fps());

    let report = analyze(&request, &session).map_err(|e| anyhow::anyhow!("Analysis failed: {e}"))?;

    print_report(&report);

    if let Some(dir) = &opts.out {
        write_outputs(dir, &opts.clip, &report)?;
        println!("\nResults written to: {}", dir.display());
    }
    println!("\nAnalysis complete.");
    Ok(())
}

fn parse_models(names: &[String]) -> anyhow::Result<Vec<KineticModel>> {
    names
        .iter()
        .map(|name| {
            KineticModel::from_name(name).ok_or_else(|| {
                anyhow::anyhow!("Unknown model '{name}' (expected lognormal, gamma, ldrw, fpt, washin)")
            })
        })
        .collect()
}

/// Parse `x0,y0,x1,y1`.
fn parse_rectangle(spec: &str) -> anyhow::Result<RoiShape> {
    let coords: Vec<f64> = spec
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("ROI '{spec}' is not x0,y0,x1,y1"))?;
    match coords.as_slice() {
        &[x0, y0, x1, y1] => Ok(RoiShape::rectangle(x0, y0, x1, y1)),
        _ => anyhow::bail!("ROI '{spec}' needs exactly 4 coordinates"),
    }
}

/// Requested ROIs, or the central quarter of the contrast stack.
fn build_session(clip: &ClipFile, specs: &[String]) -> anyhow::Result<RoiSession> {
    let mut session = RoiSession::new();
    if specs.is_empty() {
        let stacks = classify_regions(&clip.volume, &clip.regions, &clip.vendor)
            .map_err(|e| anyhow::anyhow!("Region classification failed: {e}"))?;
        let (_, h, w, _) = stacks.ceus.dim();
        let (w, h) = (w as f64, h as f64);
        let shape = RoiShape::rectangle(
            (w * 0.25).floor(),
            (h * 0.25).floor(),
            (w * 0.75).ceil() - 1.0,
            (h * 0.75).ceil() - 1.0,
        );
        session
            .add(shape, Some("centre".to_string()))
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        return Ok(session);
    }
    for spec in specs {
        session
            .add(parse_rectangle(spec)?, None)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(session)
}

fn print_report(report: &AnalysisReport) {
    println!("  Layout: {}", layout_name(&report.layout));
    println!(
        "  Flash frame {}, washout frame {}, analysed frames {}..{}",
        report.flash.flash_index, report.flash.washout_index, report.window.start, report.window.end
    );
    if let Some(motion) = &report.motion {
        let max_shift = motion
            .shifts
            .iter()
            .map(|(dy, dx)| dy.hypot(*dx))
            .fold(0.0f64, f64::max);
        println!(
            "  Motion: estimated on {} stack, largest shift {max_shift:.2} px",
            motion.source.label()
        );
    }
    println!("  Fit seed: {}", report.fit_seed);

    for roi in &report.rois {
        print_roi(roi);
    }
    for failure in &report.failures {
        println!("\n  ROI {}: FAILED ({})", failure.label, failure.error);
    }
}

fn print_roi(roi: &RoiAnalysis) {
    println!(
        "\n  ROI {} ({} of {} frames included)",
        roi.label,
        roi.time.len(),
        roi.tic.len()
    );
    if let Some(w) = &roi.washin {
        println!("    Wash-in: A = {:.3}, B = {:.4}/s", w.a, w.b);
    }
    println!("    Raw:      {}", format_metrics(&roi.metrics.raw));
    if let Some(m) = &roi.metrics.smoothed {
        println!("    LOESS:    {}", format_metrics(m));
    }
    for (model, fit) in &roi.fits {
        match fit {
            Ok(fit) => println!(
                "    {:<9} rss {:.4e}, MTT {:.3}s, TTP {:.3}s",
                model.name(),
                fit.rss,
                fit.derived.mtt,
                fit.derived.ttp
            ),
            Err(e) => println!("    {:<9} failed: {e}", model.name()),
        }
    }
}

fn format_metrics(m: &MetricSet) -> String {
    m.entries()
        .iter()
        .map(|(name, value)| format!("{name} {value:.3}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn layout_name(layout: &RegionLayout) -> &'static str {
    match layout {
        RegionLayout::ExplicitContrast { .. } => "explicit contrast region",
        RegionLayout::SplitScreenKnownVendor { .. } => "split screen (vendor layout)",
        RegionLayout::SplitScreenGeneric { .. } => "split screen (color variance)",
        RegionLayout::SingleRegion { .. } => "single region",
        RegionLayout::NoRegion => "whole frame",
    }
}

#[derive(Serialize)]
struct ReportFile<'a> {
    generated_at: String,
    clip: String,
    fps: f64,
    layout: RegionLayout,
    flash_index: usize,
    washout_index: usize,
    window: [usize; 2],
    motion_source: Option<&'static str>,
    fit_seed: u64,
    rois: Vec<RoiSummary<'a>>,
    failures: BTreeMap<&'a str, String>,
}

#[derive(Serialize)]
struct RoiSummary<'a> {
    label: &'a str,
    included_frames: usize,
    washin: Option<[f64; 2]>,
    metrics: BTreeMap<&'static str, f64>,
    models: BTreeMap<&'static str, ModelSummary>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ModelSummary {
    Fit {
        params: BTreeMap<String, f64>,
        rss: f64,
        mtt: f64,
        ttp: f64,
    },
    Failed {
        error: String,
    },
}

fn write_outputs(dir: &Path, clip: &Path, report: &AnalysisReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    write_json(&dir.join("signals.json"), &signal_rows(report))?;
    write_json(&dir.join("parameters.json"), &parameter_rows(report))?;
    write_json(&dir.join("predicted.json"), &predicted_rows(report))?;

    let summary = ReportFile {
        generated_at: chrono::Utc::now().to_rfc3339(),
        clip: clip.display().to_string(),
        fps: report.fps,
        layout: report.layout,
        flash_index: report.flash.flash_index,
        washout_index: report.flash.washout_index,
        window: [report.window.start, report.window.end],
        motion_source: report.motion.as_ref().map(|m| m.source.label()),
        fit_seed: report.fit_seed,
        rois: report.rois.iter().map(summarize_roi).collect(),
        failures: report
            .failures
            .iter()
            .map(|f| (f.label.as_str(), f.error.to_string()))
            .collect(),
    };
    write_json(&dir.join("report.json"), &summary)
}

fn summarize_roi(roi: &RoiAnalysis) -> RoiSummary<'_> {
    let models = roi
        .fits
        .iter()
        .map(|(model, fit)| {
            let summary = match fit {
                Ok(fit) => ModelSummary::Fit {
                    params: fit
                        .param_names
                        .iter()
                        .cloned()
                        .zip(fit.params.iter().copied())
                        .collect(),
                    rss: fit.rss,
                    mtt: fit.derived.mtt,
                    ttp: fit.derived.ttp,
                },
                Err(e) => ModelSummary::Failed {
                    error: e.to_string(),
                },
            };
            (model.name(), summary)
        })
        .collect();
    RoiSummary {
        label: &roi.label,
        included_frames: roi.time.len(),
        washin: roi.washin.as_ref().map(|w| [w.a, w.b]),
        metrics: roi.metrics.raw.entries().into_iter().collect(),
        models,
    }
}

/// Pretty JSON. Non-finite numbers are written as `null`.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rectangle() {
        let shape = parse_rectangle("1, 2,30,40").unwrap();
        assert_eq!(shape, RoiShape::rectangle(1.0, 2.0, 30.0, 40.0));
        assert!(parse_rectangle("1,2,3").is_err());
        assert!(parse_rectangle("a,b,c,d").is_err());
    }

    #[test]
    fn test_parse_models() {
        let models = parse_models(&["washin".into(), "Gamma".into()]).unwrap();
        assert_eq!(models, vec![KineticModel::WashIn, KineticModel::GammaVariate]);
        assert!(parse_models(&["cubic".into()]).is_err());
    }
}
