use ndarray::{Array1, Array2};

/// Ridge least squares: solves `(XᵀX + λI) β = Xᵀy` with `λ = ridge * trace(XᵀX) / k`.
///
/// Returns zeros for an empty design. Near-singular pivots yield zero coefficients
/// instead of blowing up.
pub fn ridge_least_squares(x: &Array2<f64>, y: &Array1<f64>, ridge: f64) -> Array1<f64> {
    let k = x.ncols();
    if k == 0 || x.nrows() == 0 {
        return Array1::zeros(k);
    }

    let mut xtx = x.t().dot(x);
    let xty = x.t().dot(y);

    let trace: f64 = (0..k).map(|i| xtx[[i, i]]).sum();
    let lambda = ridge.max(0.0) * trace / k as f64 + 1e-12;
    for i in 0..k {
        xtx[[i, i]] += lambda;
    }

    solve(xtx, xty)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Array1<f64> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-300 {
            continue;
        }
        if pivot != col {
            for j in 0..n {
                a.swap([col, j], [pivot, j]);
            }
            b.swap(col, pivot);
        }

        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[[row, j]] -= factor * a[[col, j]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut beta = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let diag = a[[row, row]];
        if diag.abs() < 1e-300 {
            continue;
        }
        let tail: f64 = ((row + 1)..n).map(|j| a[[row, j]] * beta[j]).sum();
        beta[row] = (b[row] - tail) / diag;
    }
    beta
}
