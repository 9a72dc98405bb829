//! Small signal and image filters shared by the preprocessing and TIC
//! stages.

use ndarray::{Array2, ArrayView2};

/// Edge handling for 1D and 2D filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Symmetric reflection including the edge sample (`d c b a | a b c d`).
    Reflect,
    /// Repeat the edge sample (`a a a a | a b c d`).
    Nearest,
}

impl Edge {
    /// Map a possibly out-of-range index into `0..n`.
    pub fn index(self, i: isize, n: usize) -> usize {
        let n = n as isize;
        if n == 1 {
            return 0;
        }
        match self {
            Self::Nearest => i.clamp(0, n - 1) as usize,
            Self::Reflect => {
                let period = 2 * n;
                let mut j = i.rem_euclid(period);
                if j >= n {
                    j = period - 1 - j;
                }
                j as usize
            }
        }
    }
}

/// Median of `values`. Even counts average the two middle values.
///
/// Reorders `values`. Returns NaN when empty.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mid = values.len() / 2;
    let odd = values.len() % 2 == 1;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if odd {
        upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    }
}

/// Percentile with linear interpolation between order statistics.
///
/// `p` is in percent and clamped to `[0, 100]`. Reorders `values`.
pub fn percentile<T: Copy + Into<f64>>(values: &mut [T], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let rank = p.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    let (_, lo_value, upper) =
        values.select_nth_unstable_by(lo, |a, b| (*a).into().total_cmp(&(*b).into()));
    let lo_value: f64 = (*lo_value).into();
    if frac == 0.0 || upper.is_empty() {
        return lo_value;
    }
    let hi_value = upper.iter().map(|&v| v.into()).fold(f64::INFINITY, f64::min);
    lo_value + (hi_value - lo_value) * frac
}

/// Normalized Gaussian kernel with radius `⌊4σ + 0.5⌋`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma + 0.5).floor() as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Correlate `values` with a centered odd-length `kernel`.
pub fn convolve_1d(values: &[f64], kernel: &[f64], edge: Edge) -> Vec<f64> {
    let n = values.len();
    let radius = (kernel.len() / 2) as isize;
    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[edge.index(i + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

/// 1D Gaussian smoothing.
pub fn gaussian_1d(values: &[f64], sigma: f64, edge: Edge) -> Vec<f64> {
    if values.len() < 2 || sigma <= 0.0 {
        return values.to_vec();
    }
    convolve_1d(values, &gaussian_kernel(sigma), edge)
}

/// Centered moving average of odd width (even widths are rounded up),
/// edges replicated.
pub fn moving_mean(values: &[f64], width: usize) -> Vec<f64> {
    let width = odd_width(width);
    convolve_1d(values, &vec![1.0 / width as f64; width], Edge::Nearest)
}

/// Centered running median of odd width (even widths are rounded up).
pub fn running_median(values: &[f64], width: usize, edge: Edge) -> Vec<f64> {
    let width = odd_width(width);
    let n = values.len();
    let radius = (width / 2) as isize;
    let mut window = vec![0.0; width];
    (0..n as isize)
        .map(|i| {
            for (k, slot) in window.iter_mut().enumerate() {
                *slot = values[edge.index(i + k as isize - radius, n)];
            }
            median(&mut window)
        })
        .collect()
}

/// 3×3 median filter with reflected edges.
pub fn median_3x3(frame: ArrayView2<'_, f32>) -> Array2<f32> {
    let (h, w) = frame.dim();
    let mut window = [0.0f64; 9];
    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut k = 0;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let yy = Edge::Reflect.index(y as isize + dy, h);
                let xx = Edge::Reflect.index(x as isize + dx, w);
                window[k] = frame[[yy, xx]] as f64;
                k += 1;
            }
        }
        median(&mut window) as f32
    })
}

/// Separable 2D Gaussian blur with reflected edges.
pub fn gaussian_2d(frame: ArrayView2<'_, f32>, sigma: f64) -> Array2<f32> {
    let (h, w) = frame.dim();
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let rows = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wt)| {
                wt * frame[[y, Edge::Reflect.index(x as isize + k as isize - radius, w)]] as f64
            })
            .sum::<f64>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, wt)| wt * rows[[Edge::Reflect.index(y as isize + k as isize - radius, h), x]])
            .sum::<f64>() as f32
    })
}

fn odd_width(width: usize) -> usize {
    let width = width.max(1);
    if width % 2 == 0 {
        width + 1
    } else {
        width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_index() {
        let reflect: Vec<usize> = (-3..7).map(|i| Edge::Reflect.index(i, 4)).collect();
        assert_eq!(reflect, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
        let nearest: Vec<usize> = (-2..6).map(|i| Edge::Nearest.index(i, 4)).collect();
        assert_eq!(nearest, vec![0, 0, 0, 1, 2, 3, 3, 3]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&mut Vec::new()).is_nan());
    }

    #[test]
    fn test_percentile_linear() {
        let mut values: Vec<f32> = (0..=10).rev().map(|v| v as f32).collect();
        assert!((percentile(&mut values, 50.0) - 5.0).abs() < 1e-12);
        assert!((percentile(&mut values, 99.0) - 9.9).abs() < 1e-6);
        assert!((percentile(&mut values, 1.0) - 0.1).abs() < 1e-6);
        assert_eq!(percentile(&mut values, 100.0), 10.0);
    }

    #[test]
    fn test_gaussian_kernel() {
        let kernel = gaussian_kernel(0.6);
        assert_eq!(kernel.len(), 5);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(kernel[2] > kernel[1] && kernel[1] > kernel[0]);
        assert!((kernel[0] - kernel[4]).abs() < 1e-15);
    }

    #[test]
    fn test_gaussian_1d_preserves_constant() {
        let values = vec![7.0; 10];
        let smoothed = gaussian_1d(&values, 1.0, Edge::Nearest);
        assert!(smoothed.iter().all(|v| (v - 7.0).abs() < 1e-12));
    }

    #[test]
    fn test_moving_mean_edge_replication() {
        let smoothed = moving_mean(&[0.0, 3.0, 6.0, 9.0], 2);
        // Width rounds up to 3.
        assert!((smoothed[0] - 1.0).abs() < 1e-12);
        assert!((smoothed[1] - 3.0).abs() < 1e-12);
        assert!((smoothed[3] - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_running_median_removes_spike() {
        let values = [1.0, 1.0, 50.0, 1.0, 1.0];
        assert_eq!(running_median(&values, 3, Edge::Nearest), vec![1.0; 5]);
    }

    #[test]
    fn test_median_3x3_removes_salt() {
        let mut frame = Array2::from_elem((5, 5), 2.0f32);
        frame[[2, 2]] = 100.0;
        frame[[0, 0]] = 100.0;
        let filtered = median_3x3(frame.view());
        assert!(filtered.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_gaussian_2d_preserves_mass_of_constant() {
        let frame = Array2::from_elem((6, 7), 3.0f32);
        let blurred = gaussian_2d(frame.view(), 0.6);
        assert!(blurred.iter().all(|&v| (v - 3.0).abs() < 1e-5));
    }
}
