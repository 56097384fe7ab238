//! Isolation forest outlier scorer
//!
//! Random axis-aligned partitioning isolates outliers in fewer splits than
//! inliers. Scores follow the usual convention: `score_samples` is the
//! negated anomaly score (lower = more abnormal) and `decision_function`
//! shifts it by the fitted offset so that negative values are outliers.

use crate::features::percentile;
use crate::tuning::{AnomalyParams, Contamination};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Rows drawn per tree
const MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Decision offset used with `Contamination::Auto`
const AUTO_OFFSET: f64 = -0.5;

#[derive(Debug, Error, PartialEq)]
pub enum ForestError {
    #[error("cannot fit on an empty feature matrix")]
    EmptyInput,
    #[error("row {row} has {actual} columns, expected {expected}")]
    RaggedInput {
        row: usize,
        actual: usize,
        expected: usize,
    },
    #[error("feature matrix contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Fitted ensemble of isolation trees
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    n_features: usize,
    max_samples: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on `rows`; deterministic for a given `params.random_state`
    pub fn fit<R: AsRef<[f64]>>(rows: &[R], params: &AnomalyParams) -> Result<Self, ForestError> {
        let data = to_matrix(rows)?;
        let n = data.len();
        let n_features = data[0].len();

        let max_samples = MAX_SAMPLES.min(n);
        let height_limit = (max_samples as f64).log2().ceil().max(0.0) as usize;
        let features_per_tree = ((params.max_features * n_features as f64).floor() as usize)
            .clamp(1, n_features);

        let mut rng = StdRng::seed_from_u64(params.random_state);
        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let rows = index::sample(&mut rng, n, max_samples).into_vec();
                let features = index::sample(&mut rng, n_features, features_per_tree).into_vec();
                let mut nodes = Vec::new();
                grow(&data, rows, &features, 0, height_limit, &mut rng, &mut nodes);
                IsolationTree { nodes }
            })
            .collect();

        let mut forest = Self {
            trees,
            n_features,
            max_samples,
            offset: AUTO_OFFSET,
        };

        if let Contamination::Fraction(fraction) = params.contamination {
            let scores = forest.score_matrix(&data);
            forest.offset = percentile(&scores, 100.0 * fraction);
        }

        Ok(forest)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Negated anomaly score per row, in [-1, 0]; lower is more abnormal
    pub fn score_samples<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<f64>, ForestError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let data = to_matrix(rows)?;
        if data[0].len() != self.n_features {
            return Err(ForestError::RaggedInput {
                row: 0,
                actual: data[0].len(),
                expected: self.n_features,
            });
        }
        Ok(self.score_matrix(&data))
    }

    /// `score_samples - offset`; negative values are outliers
    pub fn decision_function<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<f64>, ForestError> {
        Ok(self
            .score_samples(rows)?
            .into_iter()
            .map(|s| s - self.offset)
            .collect())
    }

    /// `true` for rows classified as outliers
    pub fn predict<R: AsRef<[f64]>>(&self, rows: &[R]) -> Result<Vec<bool>, ForestError> {
        Ok(self
            .decision_function(rows)?
            .into_iter()
            .map(|d| d < 0.0)
            .collect())
    }

    fn score_matrix(&self, data: &[&[f64]]) -> Vec<f64> {
        let normalizer = match average_path_length(self.max_samples) {
            c if c > 0.0 => c,
            _ => 1.0,
        };
        data.iter()
            .map(|row| {
                let total: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
                let mean_depth = total / self.trees.len() as f64;
                -(2f64.powf(-mean_depth / normalizer))
            })
            .collect()
    }
}

fn to_matrix<R: AsRef<[f64]>>(rows: &[R]) -> Result<Vec<&[f64]>, ForestError> {
    let first = rows.first().ok_or(ForestError::EmptyInput)?.as_ref();
    if first.is_empty() {
        return Err(ForestError::EmptyInput);
    }
    let expected = first.len();

    let mut data = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        if row.len() != expected {
            return Err(ForestError::RaggedInput {
                row: i,
                actual: row.len(),
                expected,
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ForestError::NonFinite);
        }
        data.push(row);
    }
    Ok(data)
}

/// Grow a subtree over `rows` and return its node index
fn grow(
    data: &[&[f64]],
    rows: Vec<usize>,
    features: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    nodes.push(Node::Leaf { size: rows.len() });

    if depth >= height_limit || rows.len() <= 1 {
        return id;
    }

    let candidates: Vec<(usize, f64, f64)> = features
        .iter()
        .filter_map(|&f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return id;
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] < threshold);

    let left = grow(data, left_rows, features, depth + 1, height_limit, rng, nodes);
    let right = grow(data, right_rows, features, depth + 1, height_limit, rng, nodes);
    nodes[id] = Node::Split {
        feature,
        threshold,
        left,
        right,
    };
    id
}

/// Average path length of an unsuccessful BST search among `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<[f64; 2]> {
        let mut rows: Vec<[f64; 2]> = (0..200)
            .map(|i| {
                let x = (i % 20) as f64 * 0.05;
                let y = (i / 20) as f64 * 0.1;
                [x, y]
            })
            .collect();
        rows.push([25.0, -30.0]);
        rows
    }

    #[test]
    fn test_outlier_scores_lowest() {
        let rows = cluster_with_outlier();
        let forest = IsolationForest::fit(&rows, &AnomalyParams::default()).unwrap();
        let scores = forest.score_samples(&rows).unwrap();

        let outlier = scores[rows.len() - 1];
        assert!(scores[..rows.len() - 1].iter().all(|&s| s > outlier));
        assert!(scores.iter().all(|&s| (-1.0..=0.0).contains(&s)));
        assert!(forest.predict(&rows).unwrap()[rows.len() - 1]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let rows = cluster_with_outlier();
        let params = AnomalyParams::default();
        let a = IsolationForest::fit(&rows, &params).unwrap();
        let b = IsolationForest::fit(&rows, &params).unwrap();
        assert_eq!(a.score_samples(&rows).unwrap(), b.score_samples(&rows).unwrap());
    }

    #[test]
    fn test_contamination_sets_offset_quantile() {
        let rows = cluster_with_outlier();
        let params = AnomalyParams {
            contamination: Contamination::Fraction(0.05),
            ..AnomalyParams::default()
        };
        let forest = IsolationForest::fit(&rows, &params).unwrap();
        let flagged = forest.predict(&rows).unwrap().iter().filter(|f| **f).count();
        // About 5% of 201 rows sit below the 5th percentile
        assert!((8..=12).contains(&flagged), "flagged {}", flagged);
    }

    #[test]
    fn test_auto_offset() {
        let rows = cluster_with_outlier();
        let forest = IsolationForest::fit(&rows, &AnomalyParams::default()).unwrap();
        assert_eq!(forest.offset(), -0.5);
        let scores = forest.score_samples(&rows).unwrap();
        let decisions = forest.decision_function(&rows).unwrap();
        assert!((decisions[0] - (scores[0] + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_feature_subsampling_still_fits() {
        let rows = cluster_with_outlier();
        let params = AnomalyParams {
            n_estimators: 50,
            max_features: 0.5,
            ..AnomalyParams::default()
        };
        let forest = IsolationForest::fit(&rows, &params).unwrap();
        assert_eq!(forest.n_trees(), 50);
        assert_eq!(forest.score_samples(&rows).unwrap().len(), rows.len());
    }

    #[test]
    fn test_rejects_bad_input() {
        let empty: Vec<[f64; 2]> = Vec::new();
        assert_eq!(
            IsolationForest::fit(&empty, &AnomalyParams::default()).unwrap_err(),
            ForestError::EmptyInput
        );

        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            IsolationForest::fit(&ragged, &AnomalyParams::default()),
            Err(ForestError::RaggedInput { row: 1, .. })
        ));

        let nan = vec![[1.0, f64::NAN]];
        assert_eq!(
            IsolationForest::fit(&nan, &AnomalyParams::default()).unwrap_err(),
            ForestError::NonFinite
        );
    }

    #[test]
    fn test_constant_data_scores_uniformly() {
        let rows = vec![[3.0, 3.0]; 40];
        let forest = IsolationForest::fit(&rows, &AnomalyParams::default()).unwrap();
        let scores = forest.score_samples(&rows).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.05);
    }
}
