//! Ordinary least squares with intercept
//!
//! Solves the normal equations `(XᵀX) b = Xᵀy` by Gaussian elimination with
//! partial pivoting. Covariate counts are tiny (one or two), so forming XᵀX
//! directly is adequate.

/// Relative pivot threshold below which the system is treated as singular
const SINGULAR_EPSILON: f64 = 1e-10;

/// Fit `y = b0 + b1*x1 + ... + bk*xk`
///
/// Returns `[b0, b1, ..., bk]`, or `None` when there are fewer than `k + 1`
/// observations, rows have inconsistent widths, or XᵀX is singular.
pub fn least_squares(xs: &[Vec<f64>], ys: &[f64]) -> Option<Vec<f64>> {
    let n = ys.len();
    if n == 0 || xs.len() != n {
        return None;
    }
    let k = xs[0].len();
    if n < k + 1 || xs.iter().any(|row| row.len() != k) {
        return None;
    }

    let dim = k + 1;
    let mut xtx = vec![vec![0.0; dim]; dim];
    let mut xty = vec![0.0; dim];

    for (row, &y) in xs.iter().zip(ys) {
        // Design row with leading 1 for the intercept
        let design: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
        for i in 0..dim {
            xty[i] += design[i] * y;
            for j in 0..dim {
                xtx[i][j] += design[i] * design[j];
            }
        }
    }

    solve(xtx, xty)
}

/// Solve `a x = b` in place; `a` is square
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let dim = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }

    for col in 0..dim {
        let pivot_row = (col..dim).max_by(|&r1, &r2| {
            a[r1][col]
                .abs()
                .partial_cmp(&a[r2][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() <= SINGULAR_EPSILON * scale {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..dim {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..dim {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; dim];
    for row in (0..dim).rev() {
        let tail: f64 = ((row + 1)..dim).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Evaluate fitted coefficients at `covariates`
pub fn predict(coefficients: &[f64], covariates: &[f64]) -> f64 {
    coefficients[0]
        + coefficients[1..]
            .iter()
            .zip(covariates)
            .map(|(b, x)| b * x)
            .sum::<f64>()
}
