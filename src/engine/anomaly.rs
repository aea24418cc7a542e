// Isolation-forest anomaly detection over standardized feature vectors
//
// Score convention: higher means more normal. The reported score is the
// negated isolation anomaly score `-2^(-E[h(x)] / c(psi))`, so it lies in
// [-1, 0) and anomalies sit at the low end.
use crate::domain::outcome::{require, Outcome, SkipReason};
use crate::domain::telemetry::TelemetryTable;
use crate::engine::features::FeatureMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

pub const DEFAULT_CONTAMINATION: f64 = 0.1;
pub const MIN_FEATURE_CHANNELS: usize = 3;
pub const MIN_SAMPLES: usize = 10;

const TREES: usize = 100;
const MAX_TREE_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLabel {
    Normal,
    Anomalous,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredSample {
    pub row: usize,
    pub score: f64,
    pub label: AnomalyLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyDetection {
    pub channels: Vec<String>,
    pub contamination: f64,
    /// Highest score still labelled anomalous.
    pub threshold: f64,
    pub anomalies: usize,
    /// Ordered by table row.
    pub samples: Vec<ScoredSample>,
}

impl AnomalyDetection {
    /// The `n` lowest-scoring samples, most anomalous first.
    pub fn most_anomalous(&self, n: usize) -> Vec<ScoredSample> {
        let mut ranked = self.samples.clone();
        ranked.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.row.cmp(&b.row)));
        ranked.truncate(n);
        ranked
    }
}

/// Average path length of an unsuccessful search in a binary search tree of `n` points.
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
    fn grow(samples: &[Vec<f64>], indices: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.split(samples, indices, 0, height_limit, rng);
        tree
    }

    fn split(
        &mut self,
        samples: &[Vec<f64>],
        indices: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: indices.len() });
        if depth >= height_limit || indices.len() <= 1 {
            return id;
        }

        // only features that still vary inside this node can isolate anything
        let n_features = samples[indices[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(samples[i][f]), hi.max(samples[i][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.random_range(0..candidates.len())];
        let threshold = lo + rng.random::<f64>() * (hi - lo);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| samples[i][feature] <= threshold);

        let left = self.split(samples, left, depth + 1, height_limit, rng);
        let right = self.split(samples, right, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, point: &[f64]) -> f64 {
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
                    node = if point[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Ensemble of isolation trees grown on random sub-samples.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn fit(samples: &[Vec<f64>], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = samples.len().min(MAX_TREE_SAMPLES);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = (0..TREES)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, samples.len(), sample_size).into_vec();
                IsolationTree::grow(samples, indices, height_limit, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Higher is more normal, see the module notes.
    pub fn score(&self, point: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        -(2f64.powf(-mean_path / c))
    }
}

pub fn detect(
    table: &TelemetryTable,
    channels: &[String],
    contamination: f64,
    seed: u64,
) -> Outcome<AnomalyDetection> {
    detect_inner(table, channels, contamination, seed).into()
}

fn detect_inner(
    table: &TelemetryTable,
    channels: &[String],
    contamination: f64,
    seed: u64,
) -> Result<AnomalyDetection, SkipReason> {
    if !(contamination > 0.0 && contamination < 1.0) {
        return Err(SkipReason::invalid(format!(
            "contamination {contamination} outside (0, 1)"
        )));
    }

    let matrix = FeatureMatrix::build(table, channels);
    require("feature channels", MIN_FEATURE_CHANNELS, matrix.n_features())?;
    require("complete samples", MIN_SAMPLES, matrix.n_samples())?;
    let matrix = matrix.standardized();

    let forest = IsolationForest::fit(matrix.samples(), seed);
    let scores: Vec<f64> = matrix.samples().iter().map(|x| forest.score(x)).collect();

    let n = scores.len();
    let anomalies = ((contamination * n as f64).round() as usize).clamp(1, n);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));

    let mut labels = vec![AnomalyLabel::Normal; n];
    for &i in &order[..anomalies] {
        labels[i] = AnomalyLabel::Anomalous;
    }
    let threshold = scores[order[anomalies - 1]];

    let samples = matrix
        .rows
        .iter()
        .zip(scores.iter().zip(labels))
        .map(|(&row, (&score, label))| ScoredSample { row, score, label })
        .collect();

    tracing::debug!(
        "Isolation forest flagged {} of {} samples over {} channels",
        anomalies,
        n,
        matrix.n_features()
    );

    Ok(AnomalyDetection {
        channels: matrix.channels,
        contamination,
        threshold,
        anomalies,
        samples,
    })
}
