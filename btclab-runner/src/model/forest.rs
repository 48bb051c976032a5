//! Bagged ensemble of decision trees.

use super::tree::{Criterion, DecisionTree, TreeParams};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Grow `n_trees` trees, each on a bootstrap sample of the rows.
    ///
    /// Regression forests consider every feature at each split; classification
    /// forests sample `floor(sqrt(p))` features per split.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, n_trees: usize, criterion: Criterion, seed: u64) -> Self {
        let n = x.nrows();
        let width = x.ncols();
        let max_features = match criterion {
            Criterion::SquaredError => None,
            Criterion::Gini => Some(((width as f64).sqrt().floor() as usize).max(1)),
        };
        let params = TreeParams {
            max_features,
            ..TreeParams::new(criterion)
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut tree_rng = StdRng::seed_from_u64(rng.gen());
                DecisionTree::fit_indices(x, y, sample, params.clone(), &mut tree_rng)
            })
            .collect();
        Self { trees }
    }

    /// Mean of the tree predictions.
    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>() / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array, Array1, Array2};

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 5) as f64 });
        let y = Array::from_shape_fn(40, |i| if i >= 20 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = step_data();
        let a = RandomForest::fit(x.view(), y.view(), 10, Criterion::SquaredError, 42);
        let b = RandomForest::fit(x.view(), y.view(), 10, Criterion::SquaredError, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn averages_towards_the_step() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(x.view(), y.view(), 25, Criterion::Gini, 7);

        assert_eq!(forest.trees.len(), 25);
        assert!(forest.predict_one(arr1(&[2.0, 2.0]).view()) < 0.3);
        assert!(forest.predict_one(arr1(&[37.0, 2.0]).view()) > 0.7);
        let p = forest.predict_one(arr1(&[20.0, 0.0]).view());
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn empty_input_gives_empty_trees() {
        let x = Array2::<f64>::zeros((0, 1));
        let forest = RandomForest::fit(x.view(), Array1::<f64>::zeros(0).view(), 3, Criterion::SquaredError, 1);
        assert_eq!(forest.predict_one(arr1(&[1.0]).view()), 0.0);
    }
}
