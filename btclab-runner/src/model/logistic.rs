//! L2-regularised logistic regression fitted by Newton's method.

use super::linear::{check_shape, cholesky_solve, with_intercept};
use super::ModelError;
use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    /// Inverse regularisation strength; the intercept is not penalised.
    pub c: f64,
}

impl LogisticRegression {
    /// Fit on 0/1 targets.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, c: f64) -> Result<Self, ModelError> {
        check_shape(x, y)?;
        if c <= 0.0 || !c.is_finite() {
            return Err(ModelError::Fit(format!("regularisation C must be positive, got {c}")));
        }
        let design = with_intercept(x)?;
        let p = design.ncols();
        let lambda = 1.0 / c;
        // Penalty on every coefficient but the intercept.
        let mut penalty = Array1::from_elem(p, lambda);
        penalty[0] = 1e-10;
        let mut beta = Array1::<f64>::zeros(p);

        for iter in 0..MAX_ITER {
            let prob = design.dot(&beta).mapv(sigmoid);
            let weight = &prob * &prob.mapv(|v| 1.0 - v);

            let mut grad = design.t().dot(&(&prob - &y));
            grad.slice_mut(s![1..]).scaled_add(lambda, &beta.slice(s![1..]));

            let weighted = &design * &weight.view().insert_axis(Axis(1));
            let mut hess = design.t().dot(&weighted);
            hess.diag_mut().zip_mut_with(&penalty, |h, pen| *h += pen);

            let step = cholesky_solve(&hess, &grad)
                .ok_or_else(|| ModelError::Fit("logistic Hessian is singular".into()))?;
            beta -= &step;
            let largest = step.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
            if largest < TOLERANCE {
                tracing::debug!(iterations = iter + 1, "logistic regression converged");
                break;
            }
        }

        Ok(Self {
            intercept: beta[0],
            coefficients: beta.slice(s![1..]).to_owned(),
            c,
        })
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.intercept + self.coefficients.dot(&row))
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
