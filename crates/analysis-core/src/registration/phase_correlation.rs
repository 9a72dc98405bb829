//! Phase correlation with upsampled-DFT sub-pixel refinement.
//!
//! 1. 2D FFT of the reference and the moving frame
//! 2. Normalized cross-power spectrum
//! 3. Integer peak of the inverse FFT (with wrap-around)
//! 4. Matrix-multiply DFT of the spectrum on a fine grid around the peak
//!    (Guizar-Sicairos, Thurman & Fienup 2008)
//!
//! The returned `(dy, dx)` is the translation that, applied to the moving
//! frame, registers it onto the reference.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::ArrayView2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Spectral bins below this fraction of the largest bin carry no phase.
const SPECTRUM_FLOOR: f64 = 1e-10;

/// Half-width of the refinement neighborhood, in coarse pixels.
const REFINE_RADIUS: f64 = 1.5;

/// Phase correlator for frames of one fixed size.
///
/// Holds cached FFT plans; safe to share across threads.
pub struct PhaseCorrelator {
    height: usize,
    width: usize,
    upsample: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl PhaseCorrelator {
    /// Create a correlator for `height × width` frames.
    ///
    /// `upsample` of 1 disables sub-pixel refinement.
    pub fn new(height: usize, width: usize, upsample: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            height,
            width,
            upsample: upsample.max(1),
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        }
    }

    /// Forward 2D spectrum of a frame, row-major.
    pub fn spectrum(&self, image: ArrayView2<'_, f64>) -> Vec<Complex<f64>> {
        let mut data: Vec<Complex<f64>> = image.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.fft_2d(&mut data, true);
        data
    }

    /// Shift registering `moving` onto the frame whose spectrum is `reference`.
    pub fn estimate_shift(
        &self,
        reference: &[Complex<f64>],
        moving: ArrayView2<'_, f64>,
    ) -> (f64, f64) {
        let moving = self.spectrum(moving);
        let mut product: Vec<Complex<f64>> = reference
            .iter()
            .zip(&moving)
            .map(|(&a, &b)| a * b.conj())
            .collect();

        let max_magnitude = product.iter().map(|c| c.norm()).fold(0.0, f64::max);
        if !(max_magnitude.is_finite() && max_magnitude > 0.0) {
            return (0.0, 0.0);
        }
        let floor = max_magnitude * SPECTRUM_FLOOR;
        for c in product.iter_mut() {
            let magnitude = c.norm();
            *c = if magnitude > floor {
                *c / magnitude
            } else {
                Complex::new(0.0, 0.0)
            };
        }

        let mut surface = product.clone();
        self.fft_2d(&mut surface, false);
        let magnitudes: Vec<f64> = surface.iter().map(|c| c.norm()).collect();

        let (peak, peak_value) = argmax_first(&magnitudes);
        let low = magnitudes.iter().copied().fold(f64::INFINITY, f64::min);
        if peak_value - low <= 1e-12 * peak_value.abs().max(f64::MIN_POSITIVE) {
            // Flat surface: nothing to lock on to.
            return (0.0, 0.0);
        }

        let dy = wrap(peak / self.width, self.height);
        let dx = wrap(peak % self.width, self.width);
        if self.upsample == 1 {
            return (dy, dx);
        }

        let uf = self.upsample as f64;
        let dy = (dy * uf).round() / uf;
        let dx = (dx * uf).round() / uf;
        let region = (uf * REFINE_RADIUS).ceil() as usize;
        let center = (region as f64 / 2.0).floor();

        for c in product.iter_mut() {
            *c = c.conj();
        }
        let fine = self.upsampled_dft(&product, region, center - dy * uf, center - dx * uf);
        let fine: Vec<f64> = fine.iter().map(|c| c.norm()).collect();

        let (fy, fx) = argmax_nearest(&fine, region, center);
        (dy + (fy - center) / uf, dx + (fx - center) / uf)
    }

    /// Row-column 2D FFT in place.
    fn fft_2d(&self, data: &mut Vec<Complex<f64>>, forward: bool) {
        let (h, w) = (self.height, self.width);
        let (rows, cols) = if forward {
            (&self.row_forward, &self.col_forward)
        } else {
            (&self.row_inverse, &self.col_inverse)
        };

        rows.process(data);
        let mut transposed = transpose(data, h, w);
        cols.process(&mut transposed);
        *data = transpose(&transposed, w, h);

        if !forward {
            let norm = 1.0 / (h * w) as f64;
            for c in data.iter_mut() {
                *c *= norm;
            }
        }
    }

    /// DFT of `spectrum` sampled on a `region × region` grid at
    /// `1/upsample` pixel spacing, grid origin at (`offset_y`, `offset_x`).
    fn upsampled_dft(
        &self,
        spectrum: &[Complex<f64>],
        region: usize,
        offset_y: f64,
        offset_x: f64,
    ) -> Vec<Complex<f64>> {
        let (h, w) = (self.height, self.width);
        let uf = self.upsample as f64;
        let kernel = |n: usize, offset: f64| -> Vec<Complex<f64>> {
            let mut k = Vec::with_capacity(region * n);
            for r in 0..region {
                for i in 0..n {
                    let phase = -2.0 * PI * (r as f64 - offset) * fft_freq(i, n) / uf;
                    k.push(Complex::from_polar(1.0, phase));
                }
            }
            k
        };
        let kx = kernel(w, offset_x);
        let ky = kernel(h, offset_y);

        // tmp[m][c] = sum_n spectrum[m][n] * kx[c][n]
        let mut tmp = vec![Complex::new(0.0, 0.0); h * region];
        for m in 0..h {
            let row = &spectrum[m * w..(m + 1) * w];
            for c in 0..region {
                let krow = &kx[c * w..(c + 1) * w];
                tmp[m * region + c] = row.iter().zip(krow).map(|(a, b)| a * b).sum();
            }
        }

        // out[r][c] = sum_m ky[r][m] * tmp[m][c]
        let mut out = vec![Complex::new(0.0, 0.0); region * region];
        for r in 0..region {
            let krow = &ky[r * h..(r + 1) * h];
            for (m, k) in krow.iter().enumerate() {
                let src = &tmp[m * region..(m + 1) * region];
                let dst = &mut out[r * region..(r + 1) * region];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += k * s;
                }
            }
        }
        out
    }
}

/// Signed frequency of bin `i` of an `n`-point DFT, in cycles per sample.
fn fft_freq(i: usize, n: usize) -> f64 {
    let k = if i <= (n - 1) / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    };
    k / n as f64
}

/// Map a peak index back to a signed shift.
fn wrap(index: usize, n: usize) -> f64 {
    if index > n / 2 {
        index as f64 - n as f64
    } else {
        index as f64
    }
}

fn argmax_first(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

/// Peak of a `region × region` surface. Near-equal maxima resolve to the one
/// closest to `(center, center)`.
fn argmax_nearest(values: &[f64], region: usize, center: f64) -> (f64, f64) {
    let (_, peak) = argmax_first(values);
    let tolerance = 1e-9 * peak.abs().max(f64::MIN_POSITIVE);
    let mut best = (center, center);
    let mut best_distance = f64::INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if peak - v > tolerance {
            continue;
        }
        let (y, x) = ((i / region) as f64, (i % region) as f64);
        let distance = (y - center).powi(2) + (x - center).powi(2);
        if distance < best_distance {
            best_distance = distance;
            best = (y, x);
        }
    }
    best
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blob(h: usize, w: usize, cy: f64, cx: f64) -> Array2<f64> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let d2 = (y as f64 - cy).powi(2) + (x as f64 - cx).powi(2);
            100.0 * (-d2 / (2.0 * 16.0)).exp()
        })
    }

    #[test]
    fn test_fft_roundtrip() {
        let correlator = PhaseCorrelator::new(6, 10, 1);
        let image = blob(6, 10, 2.0, 4.0);
        let mut spectrum = correlator.spectrum(image.view());
        correlator.fft_2d(&mut spectrum, false);
        for (c, &v) in spectrum.iter().zip(image.iter()) {
            assert!((c.re - v).abs() < 1e-9);
            assert!(c.im.abs() < 1e-9);
        }
    }

    #[test]
    fn test_integer_shift() {
        let correlator = PhaseCorrelator::new(48, 64, 1);
        let reference = correlator.spectrum(blob(48, 64, 24.0, 32.0).view());
        let (dy, dx) = correlator.estimate_shift(&reference, blob(48, 64, 27.0, 30.0).view());
        assert_eq!((dy, dx), (-3.0, 2.0));
    }

    #[test]
    fn test_subpixel_shift() {
        let correlator = PhaseCorrelator::new(64, 64, 20);
        let reference = correlator.spectrum(blob(64, 64, 32.0, 32.0).view());
        let (dy, dx) = correlator.estimate_shift(&reference, blob(64, 64, 33.5, 31.75).view());
        assert!((dy + 1.5).abs() < 0.1, "dy = {dy}");
        assert!((dx - 0.25).abs() < 0.1, "dx = {dx}");
    }

    #[test]
    fn test_flat_frames_give_zero() {
        let correlator = PhaseCorrelator::new(16, 16, 20);
        let flat = Array2::from_elem((16, 16), 42.0);
        let reference = correlator.spectrum(flat.view());
        assert_eq!(correlator.estimate_shift(&reference, flat.view()), (0.0, 0.0));

        let zeros = Array2::zeros((16, 16));
        let reference = correlator.spectrum(zeros.view());
        assert_eq!(correlator.estimate_shift(&reference, zeros.view()), (0.0, 0.0));
    }

    #[test]
    fn test_identical_frames_give_zero() {
        let correlator = PhaseCorrelator::new(32, 32, 20);
        let image = blob(32, 32, 10.0, 20.0);
        let reference = correlator.spectrum(image.view());
        let (dy, dx) = correlator.estimate_shift(&reference, image.view());
        assert!(dy.abs() < 1e-9 && dx.abs() < 1e-9);
    }

    #[test]
    fn test_fft_freq_matches_convention() {
        let freqs: Vec<f64> = (0..5).map(|i| fft_freq(i, 5)).collect();
        assert_eq!(freqs, vec![0.0, 0.2, 0.4, -0.4, -0.2]);
        let freqs: Vec<f64> = (0..4).map(|i| fft_freq(i, 4)).collect();
        assert_eq!(freqs, vec![0.0, 0.25, -0.5, -0.25]);
    }
}
