//! Per-feature standardisation.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Centres each feature on its training mean and divides by its population
/// standard deviation. Constant features keep a scale of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit over the columns of `x`. No rows gives zero means and unit scales.
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = if x.nrows() == 0 {
            Array1::ones(x.ncols())
        } else {
            x.std_axis(Axis(0), 0.0)
                .mapv(|sd| if sd > f64::EPSILON && sd.is_finite() { sd } else { 1.0 })
        };
        Self { mean, scale }
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        (&row - &self.mean) / &self.scale
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn standardises_to_zero_mean_unit_variance() {
        let x = arr2(&[[1.0, 10.0], [2.0, 10.0], [3.0, 10.0]]);
        let scaler = StandardScaler::fit(x.view());

        assert_eq!(scaler.mean, arr1(&[2.0, 10.0]));
        assert!((scaler.scale[0] - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(scaler.scale[1], 1.0, "constant column keeps unit scale");

        let scaled = scaler.transform(x.view());
        let first = scaled.column(0);
        assert!(first.mean().unwrap().abs() < 1e-12);
        assert!((first.mapv(|v| v * v).mean().unwrap() - 1.0).abs() < 1e-12);
        assert!(scaled.column(1).iter().all(|&v| v == 0.0));
        assert_eq!(scaler.transform_row(x.row(2)), scaled.row(2));
    }

    #[test]
    fn empty_fit_is_identity() {
        let scaler = StandardScaler::fit(Array2::<f64>::zeros((0, 2)).view());
        assert_eq!(scaler.mean, arr1(&[0.0, 0.0]));
        assert_eq!(scaler.scale, arr1(&[1.0, 1.0]));
    }
}
