//! Ordinary least squares regression.

use super::ModelError;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Diagonal jitter added to the normal equations so collinear price
/// columns still give a solvable system.
const RIDGE_JITTER: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LinearRegression {
    /// Solve `β = (X'X)⁻¹ X'y` with an intercept column.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, ModelError> {
        check_shape(x, y)?;
        let design = with_intercept(x)?;
        let xt = design.t();
        let mut xtx = xt.dot(&design);
        let xty = xt.dot(&y);
        xtx.diag_mut().mapv_inplace(|d| d + RIDGE_JITTER);

        let beta = cholesky_solve(&xtx, &xty)
            .or_else(|| {
                let bump = xtx.diag().mean().map_or(1.0, f64::abs).max(1.0) * 1e-8;
                tracing::debug!(bump, "normal equations ill-conditioned, adding ridge");
                let mut ridged = xtx.clone();
                ridged.diag_mut().mapv_inplace(|d| d + bump);
                cholesky_solve(&ridged, &xty)
            })
            .ok_or_else(|| ModelError::Fit("normal equations are singular".into()))?;
        Ok(Self {
            intercept: beta[0],
            coefficients: beta.slice(s![1..]).to_owned(),
        })
    }

    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + self.coefficients.dot(&row)
    }
}

pub(crate) fn check_shape(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::Fit("no training rows".into()));
    }
    if x.nrows() != y.len() {
        return Err(ModelError::Fit(format!(
            "{} feature rows but {} targets",
            x.nrows(),
            y.len()
        )));
    }
    Ok(())
}

/// `x` with a leading column of ones.
pub(crate) fn with_intercept(x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
    let ones = Array2::<f64>::ones((x.nrows(), 1));
    concatenate(Axis(1), &[ones.view(), x.view()]).map_err(|e| ModelError::Fit(e.to_string()))
}

/// Solve `A x = b` for symmetric positive definite `A` via `A = L Lᵀ`.
/// `None` when `A` is not positive definite.
pub(crate) fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum = l.row(i).slice(s![..j]).dot(&l.row(j).slice(s![..j]));
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b, then Lᵀ x = z.
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum = l.row(i).slice(s![..i]).dot(&z.slice(s![..i]));
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum = l.column(i).slice(s![i + 1..]).dot(&x.slice(s![i + 1..]));
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
