//! CART decision tree for regression and binary classification.
//!
//! Both variants predict the mean target of the leaf. For 0/1 targets that is
//! the class-1 frequency, so a classification tree differs from a regression
//! tree only in the impurity used to pick splits.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Impurity used to choose splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    SquaredError,
    Gini,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per split; `None` considers all of them.
    pub max_features: Option<usize>,
}

impl TreeParams {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

/// Nodes live in a flat arena; children are indices into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub params: TreeParams,
    pub nodes: Vec<Node>,
}

/// Running target statistics for one side of a split.
#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    n: f64,
    sum: f64,
    sum_sq: f64,
}

impl Stats {
    fn add(&mut self, y: f64) {
        self.n += 1.0;
        self.sum += y;
        self.sum_sq += y * y;
    }

    fn sub(&mut self, y: f64) {
        self.n -= 1.0;
        self.sum -= y;
        self.sum_sq -= y * y;
    }

    /// Impurity multiplied by the sample count.
    fn weighted_impurity(&self, criterion: Criterion) -> f64 {
        if self.n <= 0.0 {
            return 0.0;
        }
        let value = match criterion {
            Criterion::SquaredError => self.sum_sq - self.sum * self.sum / self.n,
            Criterion::Gini => {
                let p = self.sum / self.n;
                self.n * 2.0 * p * (1.0 - p)
            }
        };
        value.max(0.0)
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    cost: f64,
}

impl DecisionTree {
    /// Fit on every row of `x`. Grows until leaves are pure or too small
    /// to split.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, params: TreeParams, rng: &mut StdRng) -> Self {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        Self::fit_indices(x, y, indices, params, rng)
    }

    /// Fit on the rows named by `indices`. Repeated indices weigh a row
    /// more, which is how bootstrap samples are expressed.
    pub fn fit_indices(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: Vec<usize>,
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self {
            params,
            nodes: Vec::new(),
        };
        if !indices.is_empty() {
            tree.grow(x, y, indices, rng);
        }
        tree
    }

    fn grow(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>, indices: Vec<usize>, rng: &mut StdRng) -> usize {
        let mut stats = Stats::default();
        for &i in &indices {
            stats.add(y[i]);
        }
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.sum / stats.n,
            samples: indices.len(),
        });

        let parent_cost = stats.weighted_impurity(self.params.criterion);
        if indices.len() < self.params.min_samples_split || parent_cost <= 1e-12 {
            return id;
        }

        let Some(best) = self.best_split(x, y, &indices, stats, rng) else {
            return id;
        };
        if best.cost >= parent_cost - 1e-12 {
            return id;
        }

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, best.feature]] <= best.threshold);
        let left = self.grow(x, y, left_idx, rng);
        let right = self.grow(x, y, right_idx, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: &[usize],
        total: Stats,
        rng: &mut StdRng,
    ) -> Option<BestSplit> {
        let width = x.ncols();
        let mut features: Vec<usize> = (0..width).collect();
        if let Some(m) = self.params.max_features.filter(|&m| m < width) {
            features.shuffle(rng);
            features.truncate(m.max(1));
        }

        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut order = indices.to_vec();

        for &f in &features {
            order.sort_by(|&a, &b| x[[a, f]].total_cmp(&x[[b, f]]));
            let mut left = Stats::default();
            let mut right = total;

            for k in 1..order.len() {
                let prev = order[k - 1];
                left.add(y[prev]);
                right.sub(y[prev]);

                let (lo, hi) = (x[[prev, f]], x[[order[k], f]]);
                if lo == hi || k < min_leaf || order.len() - k < min_leaf {
                    continue;
                }
                let cost = left.weighted_impurity(self.params.criterion)
                    + right.weighted_impurity(self.params.criterion);
                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(BestSplit {
                        feature: f,
                        threshold,
                        cost,
                    });
                }
            }
        }
        best
    }

    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Leaf { value, .. }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    id = if v <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match nodes.get(id) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                Some(Node::Leaf { .. }) => 1,
                None => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    #[cfg(test)]
    fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array, Array1, Array2};
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn single_split_on_step_function() {
        let x: Array2<f64> = Array::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y: Array1<f64> = Array::from_shape_fn(10, |i| if i < 4 { 0.0 } else { 1.0 });

        let tree = DecisionTree::fit(x.view(), y.view(), TreeParams::new(Criterion::SquaredError), &mut rng());

        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.n_leaves(), 2);
        match &tree.nodes[0] {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 3.5);
            }
            other => panic!("expected a split, got {other:?}"),
        }
        assert_eq!(tree.predict_one(arr1(&[2.0]).view()), 0.0);
        assert_eq!(tree.predict_one(arr1(&[7.0]).view()), 1.0);
    }

    #[test]
    fn unlimited_tree_fits_training_targets() {
        let x: Array2<f64> =
            Array::from_shape_fn((30, 2), |(i, j)| if j == 0 { (i * 7 % 11) as f64 } else { (i % 3) as f64 });
        let y: Array1<f64> = Array::from_shape_fn(30, |i| ((i * 5) % 4) as f64);

        let tree = DecisionTree::fit(x.view(), y.view(), TreeParams::new(Criterion::SquaredError), &mut rng());

        // Rows that share a feature vector average their targets; the rest
        // are reproduced exactly.
        let predicted: Array1<f64> = x.outer_iter().map(|r| tree.predict_one(r)).collect();
        let mse = (&predicted - &y).mapv(|d| d * d).mean().unwrap();
        let baseline = y.var(0.0);
        assert!(mse < baseline);
    }

    #[test]
    fn gini_leaves_hold_class_frequency() {
        let x = arr2(&[[0.0], [0.0], [0.0], [1.0]]);
        let y = arr1(&[1.0, 0.0, 0.0, 1.0]);
        let tree = DecisionTree::fit(x.view(), y.view(), TreeParams::new(Criterion::Gini), &mut rng());

        assert!((tree.predict_one(arr1(&[0.0]).view()) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(tree.predict_one(arr1(&[1.0]).view()), 1.0);
    }

    #[test]
    fn min_leaf_size_blocks_tiny_splits() {
        let x: Array2<f64> = Array::from_shape_fn((6, 1), |(i, _)| i as f64);
        let y = arr1(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let params = TreeParams {
            min_samples_leaf: 3,
            ..TreeParams::new(Criterion::SquaredError)
        };

        let tree = DecisionTree::fit(x.view(), y.view(), params, &mut rng());

        assert_eq!(tree.n_leaves(), 2);
        assert!((tree.predict_one(arr1(&[0.0]).view()) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn constant_target_is_one_leaf() {
        let x: Array2<f64> = Array::from_shape_fn((5, 1), |(i, _)| i as f64);
        let y = Array1::from_elem(5, 1.0);
        let tree = DecisionTree::fit(x.view(), y.view(), TreeParams::new(Criterion::SquaredError), &mut rng());
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict_one(arr1(&[100.0]).view()), 1.0);
    }
}
