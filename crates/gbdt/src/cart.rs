//! CART (Classification and Regression Tree) builder
//!
//! Implements deterministic exact-greedy regression tree construction over
//! second-order gradient statistics.

use std::cmp::Ordering;

use crate::deterministic::SplitTieBreaker;
use crate::tree::{Node, Tree};

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    pub lambda: f64,
    pub min_split_gain: f64,
    /// Shrinkage folded into every leaf value
    pub learning_rate: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_leaf: 20,
            lambda: 1.0,
            min_split_gain: 0.0,
            learning_rate: 0.1,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: f64, gain: f64, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, threshold, node_id),
        }
    }

    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain
            || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

/// Build a regression tree using exact-greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f64>],
    gradients: &'a [f64],
    hessians: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a [Vec<f64>],
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: TreeConfig,
    ) -> Self {
        assert_eq!(features.len(), gradients.len());
        assert_eq!(features.len(), hessians.len());

        let feature_count = features.first().map(|row| row.len()).unwrap_or(0);

        Self {
            config,
            features,
            gradients,
            hessians,
            feature_count,
        }
    }

    /// Build tree and return nodes
    pub fn build(&self) -> Tree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..self.features.len()).collect();

        self.build_node(&indices, 0, &mut nodes, 0);

        Tree { nodes }
    }

    /// Recursively build tree nodes
    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        node_id: usize,
    ) -> i32 {
        let current_idx = nodes.len() as i32;
        let leaf_value = self.calculate_leaf_value(indices);

        if depth >= self.config.max_depth || indices.len() < 2 * self.config.min_samples_leaf {
            nodes.push(Node::leaf(leaf_value));
            return current_idx;
        }

        let Some(split) = self.find_best_split(indices, node_id) else {
            nodes.push(Node::leaf(leaf_value));
            return current_idx;
        };

        let (left_indices, right_indices) =
            self.split_samples(indices, split.feature_idx, split.threshold);

        nodes.push(Node::internal(split.feature_idx as i32, split.threshold));

        let child_id = node_id.saturating_mul(2);
        let left_idx =
            self.build_node(&left_indices, depth + 1, nodes, child_id.saturating_add(1));
        let right_idx =
            self.build_node(&right_indices, depth + 1, nodes, child_id.saturating_add(2));

        nodes[current_idx as usize].left = left_idx;
        nodes[current_idx as usize].right = right_idx;

        current_idx
    }

    /// Find best split by sweeping each feature in sorted order
    fn find_best_split(&self, indices: &[usize], node_id: usize) -> Option<SplitCandidate> {
        let (g_total, h_total) = self.sum_gradients_hessians(indices);
        let parent_score = self.score(g_total, h_total);
        let min_leaf = self.config.min_samples_leaf.max(1);

        let mut best_split: Option<SplitCandidate> = None;
        let mut ordered: Vec<(f64, usize)> = Vec::with_capacity(indices.len());

        for feature_idx in 0..self.feature_count {
            ordered.clear();
            ordered.extend(
                indices
                    .iter()
                    .map(|&i| (self.features[i][feature_idx], i))
                    .filter(|(v, _)| !v.is_nan()),
            );
            ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut g_left = 0.0;
            let mut h_left = 0.0;

            for pos in 0..ordered.len().saturating_sub(1) {
                let (value, idx) = ordered[pos];
                g_left += self.gradients[idx];
                h_left += self.hessians[idx];

                let next_value = ordered[pos + 1].0;
                if next_value <= value {
                    continue;
                }

                // NaN rows are not in `ordered`; they stay on the right.
                let left_count = pos + 1;
                let right_count = indices.len() - left_count;
                if left_count < min_leaf || right_count < min_leaf {
                    continue;
                }

                let g_right = g_total - g_left;
                let h_right = h_total - h_left;
                let gain = self.score(g_left, h_left) + self.score(g_right, h_right) - parent_score;
                if gain <= self.config.min_split_gain {
                    continue;
                }

                let threshold = midpoint(value, next_value);
                let candidate = SplitCandidate::new(feature_idx, threshold, gain, node_id);

                best_split = match best_split {
                    Some(current) if !candidate.beats(&current) => Some(current),
                    _ => Some(candidate),
                };
            }
        }

        best_split
    }

    /// Split samples based on threshold
    fn split_samples(
        &self,
        indices: &[usize],
        feature_idx: usize,
        threshold: f64,
    ) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .partition(|&&idx| self.features[idx][feature_idx] <= threshold)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.lambda)
    }

    /// Sum gradients and hessians for a set of samples
    fn sum_gradients_hessians(&self, indices: &[usize]) -> (f64, f64) {
        indices.iter().fold((0.0, 0.0), |(g, h), &idx| {
            (g + self.gradients[idx], h + self.hessians[idx])
        })
    }

    /// Optimal leaf value -G/(H+lambda), shrunk by the learning rate
    fn calculate_leaf_value(&self, indices: &[usize]) -> f64 {
        let (sum_g, sum_h) = self.sum_gradients_hessians(indices);
        let denom = sum_h + self.config.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -sum_g / denom * self.config.learning_rate
    }
}

/// Threshold strictly below `upper` so that `upper` routes right
fn midpoint(lower: f64, upper: f64) -> f64 {
    let mid = lower + (upper - lower) / 2.0;
    if mid >= upper {
        lower
    } else {
        mid
    }
}
