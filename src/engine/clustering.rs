// Motion-pattern clustering with seeded k-means
use crate::domain::outcome::{require, Outcome, SkipReason};
use crate::domain::telemetry::TelemetryTable;
use crate::engine::features::FeatureMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_CLUSTERS: usize = 5;
pub const DEFAULT_SEED: u64 = 42;
pub const MIN_SAMPLES: usize = 50;

const RESTARTS: usize = 10;
const MAX_ITERATIONS: usize = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clustering {
    pub channels: Vec<String>,
    pub k: usize,
    /// Table row → cluster id in `[0, k)`.
    pub assignments: BTreeMap<usize, usize>,
    /// Within-cluster sum of squares in standardized units.
    pub inertia: f64,
    pub iterations: usize,
}

impl Clustering {
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &cluster in self.assignments.values() {
            sizes[cluster] += 1;
        }
        sizes
    }
}

struct Run {
    labels: Vec<usize>,
    inertia: f64,
    iterations: usize,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Nearest centroid, ties to the lower id.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared distance from the nearest chosen one.
fn seed_centroids(samples: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![samples[rng.random_range(0..samples.len())].clone()];
    let mut distances: Vec<f64> = samples
        .iter()
        .map(|s| squared_distance(s, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            distances
                .iter()
                .position(|&d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(samples.len() - 1)
        } else {
            rng.random_range(0..samples.len())
        };

        let centroid = samples[chosen].clone();
        for (d, s) in distances.iter_mut().zip(samples) {
            *d = d.min(squared_distance(s, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

fn lloyd(samples: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> Run {
    let k = centroids.len();
    let dims = samples[0].len();
    let mut labels = vec![0; samples.len()];
    let mut iterations = 0;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        for (label, s) in labels.iter_mut().zip(samples) {
            *label = nearest(s, &centroids).0;
        }

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (&label, s) in labels.iter().zip(samples) {
            counts[label] += 1;
            for (acc, v) in sums[label].iter_mut().zip(s) {
                *acc += v;
            }
        }

        let mut updated: Vec<Vec<f64>> = sums
            .into_iter()
            .zip(&counts)
            .map(|(sum, &count)| {
                if count == 0 {
                    sum
                } else {
                    sum.into_iter().map(|v| v / count as f64).collect()
                }
            })
            .collect();

        // an emptied cluster takes over the sample worst served by its centroid
        for cluster in (0..k).filter(|&c| counts[c] == 0) {
            let far = samples
                .iter()
                .enumerate()
                .map(|(i, s)| (i, nearest(s, &updated).1))
                .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
                .0;
            updated[cluster] = samples[far].clone();
        }

        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(a, b)| squared_distance(a, b))
            .sum();
        centroids = updated;
        if shift <= TOLERANCE {
            break;
        }
    }

    let mut inertia = 0.0;
    for (label, s) in labels.iter_mut().zip(samples) {
        let (nearest_id, distance) = nearest(s, &centroids);
        *label = nearest_id;
        inertia += distance;
    }

    Run {
        labels,
        inertia,
        iterations,
    }
}

pub fn cluster(table: &TelemetryTable, channels: &[String], k: usize, seed: u64) -> Outcome<Clustering> {
    cluster_inner(table, channels, k, seed).into()
}

fn cluster_inner(
    table: &TelemetryTable,
    channels: &[String],
    k: usize,
    seed: u64,
) -> Result<Clustering, SkipReason> {
    if k == 0 {
        return Err(SkipReason::invalid("cluster count must be positive"));
    }

    let matrix = FeatureMatrix::build(table, channels);
    require("feature channels", 1, matrix.n_features())?;
    require("complete samples", MIN_SAMPLES.max(k), matrix.n_samples())?;
    let matrix = matrix.standardized();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<Run> = None;
    for _ in 0..RESTARTS {
        let centroids = seed_centroids(matrix.samples(), k, &mut rng);
        let run = lloyd(matrix.samples(), centroids);
        if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    let best = best.ok_or_else(|| SkipReason::invalid("no clustering run completed"))?;

    tracing::debug!(
        "k-means with k={} converged in {} iterations, inertia {:.3}",
        k,
        best.iterations,
        best.inertia
    );

    Ok(Clustering {
        assignments: matrix.rows.iter().copied().zip(best.labels).collect(),
        channels: matrix.channels,
        k,
        inertia: best.inertia,
        iterations: best.iterations,
    })
}
