//! Dense linear solves for the small normal-equation systems used by the
//! LOESS smoother and the Levenberg-Marquardt solver.

/// Pivots below this fraction of the largest matrix entry count as zero.
const SINGULAR_RATIO: f64 = 1e-14;

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// `a` is row-major `n × n`. Returns `None` when the matrix is singular or
/// carries non-finite entries.
pub fn solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }
    let mut matrix: Vec<Vec<f64>> = a.to_vec();
    let mut rhs = b.to_vec();

    let scale = matrix
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if !scale.is_finite() || scale == 0.0 || rhs.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let threshold = scale * SINGULAR_RATIO;

    for col in 0..n {
        let (max_row, max_val) = (col..n)
            .map(|row| (row, matrix[row][col].abs()))
            .fold((col, -1.0), |best, cand| if cand.1 > best.1 { cand } else { best });
        if max_val <= threshold {
            return None;
        }
        if max_row != col {
            matrix.swap(col, max_row);
            rhs.swap(col, max_row);
        }

        for row in (col + 1)..n {
            let factor = matrix[row][col] / matrix[col][col];
            if factor == 0.0 {
                continue;
            }
            let (upper, lower) = matrix.split_at_mut(row);
            let pivot_row = &upper[col];
            for (m, p) in lower[0].iter_mut().zip(pivot_row.iter()).skip(col) {
                *m -= factor * p;
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= matrix[i][j] * xj;
        }
        x[i] = sum / matrix[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_identity() {
        let a = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        let x = solve(&a, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(x, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        let a = vec![vec![0.0, 2.0], vec![3.0, 1.0]];
        let x = solve(&a, &[4.0, 5.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_returns_none() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve(&a, &[1.0, 2.0]).is_none());
        assert!(solve(&[vec![0.0]], &[1.0]).is_none());
        assert!(solve(&[vec![f64::NAN]], &[1.0]).is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(solve(&[vec![1.0, 0.0]], &[1.0]).is_none());
    }
}
