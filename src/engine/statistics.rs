// Descriptive and comparative statistics over trace series
//
// Standard deviation uses the sample (n - 1) denominator everywhere in the
// engine, including feature standardization. A single value has std 0.
use crate::domain::outcome::{require, Outcome, SkipReason};
use serde::Serialize;

/// Added to near-zero denominators instead of failing.
pub const EPSILON: f64 = 1e-6;

/// Widest offset searched by [`estimate_lag`], in samples either way.
pub const MAX_LAG_SAMPLES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub rms: f64,
    /// Coefficient of variation, `std / (|mean| + EPSILON)`.
    pub cv: f64,
}

impl Summary {
    /// Largest absolute value.
    pub fn peak_abs(&self) -> f64 {
        self.min.abs().max(self.max.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairSummary {
    pub samples: usize,
    /// `None` when either side has zero variance.
    pub correlation: Option<f64>,
    pub diff_mean: f64,
    pub diff_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LagEstimate {
    /// Positive when the second series trails the first.
    pub samples: i64,
    pub seconds: f64,
    pub sample_interval: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Values that are present, in order.
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

pub fn summarize(values: &[f64]) -> Outcome<Summary> {
    if let Err(reason) = require("samples", 1, values.len()) {
        return Outcome::Skipped(reason);
    }

    let mean = mean(values);
    let std = std_dev(values);
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    Outcome::Completed(Summary {
        count: values.len(),
        mean,
        std,
        min,
        max,
        rms: rms(values),
        cv: std / (mean.abs() + EPSILON),
    })
}

/// Pearson correlation of two equal-length series.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Correlation and difference statistics over rows where both sides are present.
pub fn summarize_pair(a: &[Option<f64>], b: &[Option<f64>]) -> Outcome<PairSummary> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip();

    if let Err(reason) = require("paired samples", 2, xs.len()) {
        return Outcome::Skipped(reason);
    }

    let diff: Vec<f64> = xs.iter().zip(&ys).map(|(x, y)| x - y).collect();
    Outcome::Completed(PairSummary {
        samples: xs.len(),
        correlation: pearson(&xs, &ys),
        diff_mean: mean(&diff),
        diff_std: std_dev(&diff),
    })
}

fn z_normalize(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = std_dev(values) + EPSILON;
    values.iter().map(|v| (v - m) / s).collect()
}

/// Peak over mean of absolute values, `max|x| / (mean|x| + EPSILON)`.
/// An empty series gives 0.
pub fn peak_to_mean(values: &[f64]) -> f64 {
    let abs: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    summarize(&abs)
        .completed()
        .map_or(0.0, |s| s.max / (s.mean + EPSILON))
}

/// Time offset of `follower` relative to `reference` by cross-correlation
/// over offsets in `[-max_lag, max_lag]`.
///
/// The sample offset is converted to seconds with the median interval of
/// `timestamps`. Ties resolve to the most negative offset.
pub fn estimate_lag(
    reference: &[f64],
    follower: &[f64],
    timestamps: &[f64],
    max_lag: usize,
) -> Outcome<LagEstimate> {
    estimate_lag_inner(reference, follower, timestamps, max_lag).into()
}

fn estimate_lag_inner(
    reference: &[f64],
    follower: &[f64],
    timestamps: &[f64],
    max_lag: usize,
) -> Result<LagEstimate, SkipReason> {
    if reference.len() != follower.len() || reference.len() != timestamps.len() {
        return Err(SkipReason::invalid(format!(
            "lag series lengths differ: {}, {}, {}",
            reference.len(),
            follower.len(),
            timestamps.len()
        )));
    }
    require("samples", 2, reference.len())?;

    let a = z_normalize(reference);
    let b = z_normalize(follower);
    let n = a.len() as i64;
    let window = max_lag.min(a.len() - 1) as i64;

    let mut best_lag = 0i64;
    let mut best = f64::NEG_INFINITY;
    for lag in -window..=window {
        let start = (-lag).max(0);
        let end = (n - lag).min(n);
        let value: f64 = (start..end)
            .map(|i| b[(i + lag) as usize] * a[i as usize])
            .sum();
        if value > best {
            best = value;
            best_lag = lag;
        }
    }

    let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    let sample_interval = median(&intervals);

    Ok(LagEstimate {
        samples: best_lag,
        seconds: best_lag as f64 * sample_interval,
        sample_interval,
    })
}

/// Least-squares slope against the sample index.
pub fn trend_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = mean(values);
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_rms_is_zero_only_for_zero_series() {
        assert_eq!(rms(&[0.0, 0.0, 0.0]), 0.0);
        assert!(rms(&[0.0, -1e-9, 0.0]) > 0.0);
        assert!(rms(&[-3.0, 4.0]) > 0.0);
    }

    #[test]
    fn test_summary_uses_sample_std() {
        let summary = summarize(&[1.0, 2.0, 3.0, 4.0]).completed().copied().unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.mean, 2.5);
        assert!(approx(summary.std, 1.290_994, 1e-6));
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert!(approx(summary.rms, 7.5f64.sqrt(), 1e-12));
        assert!(approx(summary.cv, summary.std / 2.5, 1e-6));
    }

    #[test]
    fn test_summarize_empty_is_skipped() {
        assert!(!summarize(&[]).is_completed());
    }

    #[test]
    fn test_cv_with_zero_mean_is_finite() {
        let summary = summarize(&[-1.0, 1.0]).completed().copied().unwrap();
        assert!(summary.cv.is_finite());
    }

    #[test]
    fn test_correlation_is_symmetric_and_bounded() {
        let a = [1.0, 2.0, 4.0, 3.0, 7.0];
        let b = [2.0, 1.0, 5.0, 5.0, 6.0];
        let ab = pearson(&a, &b).unwrap();
        let ba = pearson(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((-1.0..=1.0).contains(&ab));

        let neg: Vec<f64> = a.iter().map(|v| -2.0 * v).collect();
        assert!(approx(pearson(&a, &neg).unwrap(), -1.0, 1e-12));
    }

    #[test]
    fn test_correlation_undefined_for_constant_series() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_summarize_pair_uses_complete_rows() {
        let a = [Some(1.0), Some(2.0), None, Some(4.0)];
        let b = [Some(0.5), Some(1.5), Some(9.0), Some(3.5)];
        let pair = summarize_pair(&a, &b).completed().copied().unwrap();
        assert_eq!(pair.samples, 3);
        assert!(approx(pair.diff_mean, 0.5, 1e-12));
        assert!(approx(pair.diff_std, 0.0, 1e-12));
        assert!(approx(pair.correlation.unwrap(), 1.0, 1e-12));
    }

    #[test]
    fn test_peak_to_mean_uses_absolute_values() {
        // |x| has mean 5 and peak 12
        let ratio = peak_to_mean(&[-12.0, 3.0, -3.0, 2.0]);
        assert!(approx(ratio, 2.4, 1e-5));
        assert_eq!(peak_to_mean(&[]), 0.0);
        assert!(peak_to_mean(&[0.0, 0.0]).is_finite());
    }

    #[test]
    fn test_lag_detects_delayed_follower() {
        let n: usize = 200;
        let t: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let reference: Vec<f64> = (0..n).map(|_| rng.random::<f64>() - 0.5).collect();
        let follower: Vec<f64> = (0..n)
            .map(|i| if i >= 3 { reference[i - 3] } else { reference[0] })
            .collect();

        let lag = estimate_lag(&reference, &follower, &t, MAX_LAG_SAMPLES)
            .completed()
            .copied()
            .unwrap();
        assert_eq!(lag.samples, 3);
        assert!(approx(lag.seconds, 0.03, 1e-9));
        assert!(approx(lag.sample_interval, 0.01, 1e-12));
    }

    #[test]
    fn test_lag_search_stays_inside_window() {
        let n: usize = 300;
        let t: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        let mut rng = StdRng::seed_from_u64(2);
        let reference: Vec<f64> = (0..n).map(|_| rng.random::<f64>() - 0.5).collect();
        let follower: Vec<f64> = (0..n)
            .map(|i| if i >= 40 { reference[i - 40] } else { reference[0] })
            .collect();

        let wide = estimate_lag(&reference, &follower, &t, 50).completed().copied().unwrap();
        assert_eq!(wide.samples, 40);
        let narrow = estimate_lag(&reference, &follower, &t, 10).completed().copied().unwrap();
        assert!(narrow.samples.abs() <= 10);
    }

    #[test]
    fn test_lag_requires_two_samples() {
        let outcome = estimate_lag(&[1.0], &[1.0], &[0.0], MAX_LAG_SAMPLES);
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::InsufficientData { required: 2, available: 1, .. })
        ));
    }

    #[test]
    fn test_trend_slope() {
        assert!(approx(trend_slope(&[1.0, 3.0, 5.0, 7.0]), 2.0, 1e-12));
        assert_eq!(trend_slope(&[4.0]), 0.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
