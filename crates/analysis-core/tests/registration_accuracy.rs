use ceuslab_analysis_core::registration::{motion_compensate, RegistrationConfig, ShiftSource};
use ceuslab_volume_model::PixelVolume;
use ndarray::{Array3, ArrayView2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SIZE: usize = 64;

/// Offsets applied to frames after the reference window.
const MOTION: [(f64, f64); 8] = [
    (2.0, -1.0),
    (3.0, 0.0),
    (-2.5, 1.5),
    (0.4, -0.6),
    (-1.25, -2.75),
    (1.0, 1.0),
    (0.0, 3.0),
    (-3.0, -3.0),
];

fn blob(y: f64, x: f64, cy: f64, cx: f64) -> f32 {
    let d2 = (y - cy).powi(2) + (x - cx).powi(2);
    (200.0 * (-d2 / (2.0 * 16.0)).exp()) as f32
}

/// 13 still frames followed by one frame per entry of [`MOTION`].
fn offsets() -> Vec<(f64, f64)> {
    let mut offsets = vec![(0.0, 0.0); 13];
    offsets.extend_from_slice(&MOTION);
    offsets
}

fn moving_stack(offsets: &[(f64, f64)]) -> PixelVolume {
    let centre = SIZE as f64 / 2.0;
    let data = Array3::from_shape_fn((offsets.len(), SIZE, SIZE), |(t, y, x)| {
        let (oy, ox) = offsets[t];
        blob(y as f64, x as f64, centre + oy, centre + ox)
    });
    PixelVolume::from_gray(data).unwrap()
}

fn centroid(frame: ArrayView2<'_, f32>) -> (f64, f64) {
    let mut total = 0.0;
    let (mut sy, mut sx) = (0.0, 0.0);
    for ((y, x), &v) in frame.indexed_iter() {
        let v = v as f64;
        total += v;
        sy += y as f64 * v;
        sx += x as f64 * v;
    }
    (sy / total, sx / total)
}

#[test]
fn known_shifts_are_recovered_within_a_tenth_of_a_pixel() {
    let offsets = offsets();
    let stack = moving_stack(&offsets);
    let registration = motion_compensate(&stack, None, &RegistrationConfig::default()).unwrap();

    assert_eq!(registration.source, ShiftSource::Target);
    assert_eq!(registration.shifts.len(), offsets.len());
    for (t, (&(dy, dx), &(oy, ox))) in registration.shifts.iter().zip(&offsets).enumerate() {
        assert!((dy + oy).abs() < 0.1, "frame {t}: dy = {dy}, expected {}", -oy);
        assert!((dx + ox).abs() < 0.1, "frame {t}: dx = {dx}, expected {}", -ox);
    }
}

#[test]
fn corrected_frames_line_up_with_the_reference() {
    let offsets = offsets();
    let stack = moving_stack(&offsets);
    let registration = motion_compensate(&stack, None, &RegistrationConfig::default()).unwrap();
    let luminance = registration.corrected.luminance();
    let centre = SIZE as f64 / 2.0;

    for (t, frame) in luminance.axis_iter(Axis(0)).enumerate() {
        let (cy, cx) = centroid(frame);
        assert!((cy - centre).abs() < 0.15, "frame {t}: cy = {cy}");
        assert!((cx - centre).abs() < 0.15, "frame {t}: cx = {cx}");
    }
}

#[test]
fn bmode_drives_estimation_for_a_noisy_contrast_stack() {
    let offsets = offsets();
    let bmode = moving_stack(&offsets);

    let mut rng = StdRng::seed_from_u64(11);
    let noisy = bmode.luminance().mapv(|v| 0.2 * v + rng.random_range(0.0..40.0));
    let ceus = PixelVolume::from_gray(noisy).unwrap();

    let registration =
        motion_compensate(&ceus, Some(&bmode), &RegistrationConfig::default()).unwrap();
    assert_eq!(registration.source, ShiftSource::Secondary);
    for (&(dy, dx), &(oy, ox)) in registration.shifts.iter().zip(&offsets) {
        assert!((dy + oy).abs() < 0.1);
        assert!((dx + ox).abs() < 0.1);
    }
}
