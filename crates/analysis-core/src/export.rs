//! Tidy result rows for caller-side serialization.
//!
//! The core writes no files; these rows derive `Serialize` so callers can
//! hand them to whichever writer they use.

use serde::Serialize;

use crate::fitting::KineticModel;
use crate::pipeline::{AnalysisReport, RoiAnalysis};

/// One included sample of one ROI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRow {
    pub roi: String,
    pub time: f64,
    /// Δ intensity from the first included frame.
    pub raw: f64,
    /// Anchored LOESS value.
    pub smoothed: Option<f64>,
    /// Wash-in prediction.
    pub predicted: Option<f64>,
}

/// One named scalar of one ROI. Missing values are NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRow {
    pub roi: String,
    pub parameter: String,
    pub value: f64,
}

/// Wash-in prediction on the fixed time grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedRow {
    pub roi: String,
    pub time: f64,
    pub predicted: f64,
}

pub fn signal_rows(report: &AnalysisReport) -> Vec<SignalRow> {
    report.rois.iter().flat_map(roi_signal_rows).collect()
}

fn roi_signal_rows(roi: &RoiAnalysis) -> Vec<SignalRow> {
    let smoothed = roi.smoothed.as_ref().ok();
    let predicted = roi.washin.as_ref().map(|w| &w.at_samples);
    roi.time
        .iter()
        .zip(&roi.value)
        .enumerate()
        .map(|(i, (&time, &raw))| SignalRow {
            roi: roi.label.clone(),
            time,
            raw,
            smoothed: smoothed.and_then(|s| s.get(i).copied()),
            predicted: predicted.and_then(|p| p.get(i).copied()),
        })
        .collect()
}

pub fn parameter_rows(report: &AnalysisReport) -> Vec<ParameterRow> {
    report.rois.iter().flat_map(roi_parameter_rows).collect()
}

fn roi_parameter_rows(roi: &RoiAnalysis) -> Vec<ParameterRow> {
    let nan = f64::NAN;
    let washin = roi.washin.as_ref();
    let raw = &roi.metrics.raw;
    let smoothed = roi.metrics.smoothed.as_ref();
    let grid = washin.map(|w| &w.grid_metrics);

    let mut values: Vec<(String, f64)> = vec![
        ("A".into(), washin.map_or(nan, |w| w.a)),
        ("B".into(), washin.map_or(nan, |w| w.b)),
        ("AB".into(), washin.map_or(nan, |w| w.a * w.b)),
        ("R-squared".into(), raw.r_squared.unwrap_or(nan)),
        ("AUC dVI_filt".into(), smoothed.map_or(nan, |m| m.auc)),
        ("AUC dVI_predict".into(), grid.map_or(nan, |m| m.auc)),
        ("Peak dVI".into(), raw.peak),
        ("Peak dVI_filt".into(), smoothed.map_or(nan, |m| m.peak)),
        ("Mean dVI".into(), raw.mean),
        ("Mean dVI_filt".into(), smoothed.map_or(nan, |m| m.mean)),
        ("Mean dVI_predict".into(), grid.map_or(nan, |m| m.mean)),
        ("MaxDiff dVI_filt".into(), smoothed.map_or(nan, |m| m.max_abs_derivative)),
        ("MaxDiff dVI_predict".into(), grid.map_or(nan, |m| m.max_abs_derivative)),
    ];

    for (model, result) in &roi.fits {
        let Ok(fit) = result else { continue };
        if *model == KineticModel::WashIn {
            continue;
        }
        let name = model.name();
        for (param, value) in fit.param_names.iter().zip(&fit.params) {
            values.push((format!("{name}.{param}"), *value));
        }
        values.push((format!("{name}.MTT"), fit.derived.mtt));
        values.push((format!("{name}.TTP"), fit.derived.ttp));
        values.push((format!("{name}.RSS"), fit.rss));
    }

    values
        .into_iter()
        .map(|(parameter, value)| ParameterRow {
            roi: roi.label.clone(),
            parameter,
            value: if value.is_finite() { value } else { nan },
        })
        .collect()
}

pub fn predicted_rows(report: &AnalysisReport) -> Vec<PredictedRow> {
    report
        .rois
        .iter()
        .filter_map(|roi| roi.washin.as_ref().map(|w| (roi, w)))
        .flat_map(|(roi, w)| {
            w.grid.iter().map(|&(time, predicted)| PredictedRow {
                roi: roi.label.clone(),
                time,
                predicted,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::{FitRequest, KineticModel};
    use crate::loess::LoessConfig;
    use crate::pipeline::analyze_tic;
    use ceuslab_volume_model::Tic;

    fn analysed(models: Vec<KineticModel>) -> RoiAnalysis {
        let time: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let raw: Vec<f64> = time.iter().map(|t| 10.0 + 30.0 * (1.0 - (-0.6 * t).exp())).collect();
        let tic = Tic::new("liver", time, raw).unwrap();
        let fit = FitRequest {
            models,
            seed: Some(3),
            ..Default::default()
        };
        analyze_tic(tic, 10.0, &LoessConfig::default(), &fit)
    }

    #[test]
    fn test_parameter_names_and_order() {
        let roi = analysed(vec![KineticModel::WashIn, KineticModel::GammaVariate]);
        let rows = roi_parameter_rows(&roi);
        let names: Vec<&str> = rows.iter().map(|r| r.parameter.as_str()).collect();
        assert_eq!(
            &names[..13],
            &[
                "A",
                "B",
                "AB",
                "R-squared",
                "AUC dVI_filt",
                "AUC dVI_predict",
                "Peak dVI",
                "Peak dVI_filt",
                "Mean dVI",
                "Mean dVI_filt",
                "Mean dVI_predict",
                "MaxDiff dVI_filt",
                "MaxDiff dVI_predict",
            ]
        );
        assert!(names.contains(&"gamma.alpha"));
        assert!(names.contains(&"gamma.MTT"));
        assert!(names.contains(&"gamma.RSS"));
        assert!(!names.iter().any(|n| n.starts_with("washin.")));

        let a = rows.iter().find(|r| r.parameter == "A").unwrap().value;
        assert!((a - 30.0).abs() < 0.5, "A = {a}");
    }

    #[test]
    fn test_missing_washin_is_nan() {
        let roi = analysed(vec![KineticModel::LogNormal]);
        let rows = roi_parameter_rows(&roi);
        let a = rows.iter().find(|r| r.parameter == "A").unwrap();
        assert!(a.value.is_nan());
        assert!(roi_signal_rows(&roi).iter().all(|r| r.predicted.is_none()));
    }

    #[test]
    fn test_signal_rows_cover_included_samples() {
        let roi = analysed(vec![KineticModel::WashIn]);
        let rows = roi_signal_rows(&roi);
        assert_eq!(rows.len(), 40);
        assert_eq!(rows[0].raw, 0.0);
        assert_eq!(rows[0].smoothed, Some(0.0));
        assert!(rows.iter().all(|r| r.predicted.is_some()));
        assert!(rows.iter().all(|r| r.roi == "liver"));
    }
}
