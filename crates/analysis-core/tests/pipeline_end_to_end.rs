use ceuslab_analysis_core::export::{parameter_rows, predicted_rows, signal_rows};
use ceuslab_analysis_core::pipeline::{analyze, AnalysisRequest, Stages};
use ceuslab_analysis_core::KineticModel;
use ceuslab_common::FrameClock;
use ceuslab_volume_model::{PixelVolume, RegionDataType, RegionDescriptor, RoiSession, RoiShape};
use ndarray::{Array3, Array4};

const FRAMES: usize = 50;
const SIZE: usize = 64;
const FPS: f64 = 10.0;

/// Static texture riding on `50 + 150 (1 − e^(−0.1 t))`.
fn washin_intensity(t: usize, y: usize, x: usize) -> f32 {
    let secs = t as f64 / FPS;
    let texture = 20.0 * (x as f64 / 3.0).sin() * (y as f64 / 5.0).cos();
    (50.0 + 150.0 * (1.0 - (-0.1 * secs).exp()) + texture) as f32
}

fn washin_clip() -> PixelVolume {
    PixelVolume::from_gray(Array3::from_shape_fn((FRAMES, SIZE, SIZE), |(t, y, x)| {
        washin_intensity(t, y, x)
    }))
    .unwrap()
}

fn centre_roi() -> RoiSession {
    let mut session = RoiSession::new();
    session
        .add(RoiShape::rectangle(16.0, 16.0, 47.0, 47.0), Some("centre".into()))
        .unwrap();
    session
}

fn request(volume: &PixelVolume) -> AnalysisRequest<'_> {
    let mut request = AnalysisRequest::new(volume, &[], FrameClock::new(FPS));
    request.stages = Stages {
        crop_to_window: false,
        motion: true,
        preprocess: false,
    };
    request.fit.seed = Some(2024);
    request
}

#[test]
fn synthetic_washin_clip_recovers_plateau_and_rate() {
    let volume = washin_clip();
    let report = analyze(&request(&volume), &centre_roi()).unwrap();

    assert!(report.failures.is_empty());
    let roi = report.roi("centre").unwrap();
    assert_eq!(roi.time.len(), FRAMES);

    let washin = roi.washin.as_ref().expect("wash-in fit should succeed");
    assert!((washin.a - 150.0).abs() / 150.0 < 0.1, "A = {}", washin.a);
    assert!((washin.b - 0.1).abs() / 0.1 < 0.1, "B = {}", washin.b);

    let raw = &roi.metrics.raw;
    assert!(raw.auc.is_finite() && raw.auc > 0.0, "AUC = {}", raw.auc);
    assert!(raw.mtt.is_finite() && raw.mtt > 0.0, "MTT = {}", raw.mtt);
    assert!(raw.r_squared.unwrap() > 0.99);

    let motion = report.motion.as_ref().unwrap();
    assert!(motion
        .shifts
        .iter()
        .all(|(dy, dx)| dy.abs() < 0.06 && dx.abs() < 0.06));
}

#[test]
fn noiseless_full_frame_washin_is_monotone_and_recovered() {
    let volume = PixelVolume::from_gray(Array3::from_shape_fn((FRAMES, SIZE, SIZE), |(t, _, _)| {
        let secs = t as f64 / FPS;
        (50.0 + 150.0 * (1.0 - (-0.1 * secs).exp())) as f32
    }))
    .unwrap();
    let mut session = RoiSession::new();
    session
        .add(RoiShape::rectangle(0.0, 0.0, 63.0, 63.0), Some("frame".into()))
        .unwrap();
    let mut request = request(&volume);
    request.fit.models = vec![KineticModel::WashIn];

    let report = analyze(&request, &session).unwrap();
    let roi = report.roi("frame").unwrap();
    assert_eq!(roi.value.len(), FRAMES);
    assert_eq!(roi.value[0], 0.0);
    assert!(roi.value.windows(2).all(|w| w[1] >= w[0]));

    let washin = roi.washin.as_ref().unwrap();
    assert!((washin.a - 150.0).abs() / 150.0 < 0.1, "A = {}", washin.a);
    assert!((washin.b - 0.1).abs() / 0.1 < 0.1, "B = {}", washin.b);
}

#[test]
fn export_rows_follow_the_report() {
    let volume = washin_clip();
    let report = analyze(&request(&volume), &centre_roi()).unwrap();

    let signals = signal_rows(&report);
    assert_eq!(signals.len(), FRAMES);
    assert!(signals.iter().all(|r| r.smoothed.is_some() && r.predicted.is_some()));

    let parameters = parameter_rows(&report);
    let a = parameters.iter().find(|r| r.parameter == "A").unwrap();
    assert!((a.value - 150.0).abs() < 15.0);
    assert!(parameters.iter().all(|r| r.roi == "centre"));

    let json = serde_json::to_value(&parameters).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), parameters.len());
    assert_eq!(rows[0]["parameter"], "A");
    assert!(rows[0]["value"].is_f64());

    let predicted = predicted_rows(&report);
    assert_eq!(predicted.len(), 81);
    assert!(predicted.windows(2).all(|w| w[1].predicted >= w[0].predicted));
}

#[test]
fn fits_are_reproducible_with_a_fixed_seed() {
    let volume = washin_clip();
    let first = analyze(&request(&volume), &centre_roi()).unwrap();
    let second = analyze(&request(&volume), &centre_roi()).unwrap();
    let a = &first.roi("centre").unwrap().fits;
    let b = &second.roi("centre").unwrap().fits;
    for model in KineticModel::ALL {
        match (&a[&model], &b[&model]) {
            (Ok(x), Ok(y)) => assert_eq!(x.params, y.params),
            (Err(_), Err(_)) => {}
            _ => panic!("{model} succeeded only once"),
        }
    }
}

#[test]
fn split_screen_clip_analyses_the_contrast_half() {
    // Left half gray B-mode, right half colored contrast.
    let width = 2 * SIZE;
    let data = Array4::from_shape_fn((FRAMES, SIZE, width, 3), |(t, y, x, c)| {
        if x < SIZE {
            80.0
        } else {
            let v = washin_intensity(t, y, x - SIZE);
            v * [1.0, 0.6, 0.3][c]
        }
    });
    let volume = PixelVolume::from_rgb(data).unwrap();
    let regions = [
        RegionDescriptor::new(0, 0, SIZE as i64 - 1, SIZE as i64 - 1, RegionDataType::Ambiguous),
        RegionDescriptor::new(SIZE as i64, 0, width as i64 - 1, SIZE as i64 - 1, RegionDataType::Ambiguous),
    ];
    let mut request = AnalysisRequest::new(&volume, &regions, FrameClock::new(FPS));
    request.stages = Stages {
        crop_to_window: false,
        motion: true,
        preprocess: false,
    };
    request.fit.seed = Some(5);
    request.fit.models = vec![KineticModel::WashIn];

    let report = analyze(&request, &centre_roi()).unwrap();
    assert_eq!(report.stacks.ceus.width(), SIZE);
    assert!(report.stacks.bmode.is_some());
    let washin = report.roi("centre").unwrap().washin.as_ref().unwrap();
    // Luminance of the tinted contrast scales the plateau.
    let gain = 0.299 + 0.587 * 0.6 + 0.114 * 0.3;
    assert!((washin.a - 150.0 * gain).abs() / (150.0 * gain) < 0.1, "A = {}", washin.a);
}

#[test]
fn degenerate_regions_fall_back_to_the_whole_frame() {
    let volume = washin_clip();
    let regions = [RegionDescriptor::new(10, 10, 5, 5, RegionDataType::Ambiguous)];
    let mut request = AnalysisRequest::new(&volume, &regions, FrameClock::new(FPS));
    request.stages.crop_to_window = false;
    let report = analyze(&request, &RoiSession::new()).unwrap();
    assert_eq!(report.stacks.ceus.width(), SIZE);
}
