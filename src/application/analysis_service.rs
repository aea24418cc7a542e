// Analysis service - Runs the engine over a loaded trace table
use crate::domain::channels::{axes_present, resolve, AxisId, SignalRole, CART_VEL_ACT};
use crate::domain::outcome::Outcome;
use crate::domain::telemetry::TelemetryTable;
use crate::engine::anomaly::{detect, AnomalyDetection, ScoredSample};
use crate::engine::axis_report::{analyze_axis, AxisReport};
use crate::engine::clustering::{cluster, Clustering};
use crate::engine::features::{anomaly_channels, axis_channels, cluster_channels};
use crate::engine::tracking::{compute_errors, ErrorComputation};
use crate::infrastructure::config::AnalysisSettings;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const TOP_ANOMALIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedSample {
    pub row: usize,
    pub zeit: f64,
    pub score: f64,
    pub motion_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyOverview {
    /// Share of included samples labelled anomalous, in percent.
    pub anomaly_rate: f64,
    pub most_anomalous: Vec<FlaggedSample>,
    pub detection: AnomalyDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    /// `None` for the whole-table feature set.
    pub axis: Option<AxisId>,
    pub outcome: Outcome<AnomalyOverview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub size: usize,
    pub mean_speed: Option<f64>,
    pub dominant_motion_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOverview {
    pub summaries: Vec<ClusterSummary>,
    pub clustering: Clustering,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub k: usize,
    pub seed: u64,
    pub outcome: Outcome<ClusterOverview>,
}

/// Shape of the loaded table and completeness of the focus axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetOverview {
    pub samples: usize,
    pub channels: usize,
    /// Seconds between the first and last sample.
    pub time_span: f64,
    pub motion_types: BTreeMap<String, usize>,
    pub axes: Vec<AxisId>,
    pub focus_axis: Option<AxisId>,
    pub focus_missing: Vec<SignalRole>,
}

/// One line of a streamed run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    AxisReport(Box<AxisReport>),
    AxisFailed { axis: AxisId, message: String },
    Anomalies(AnomalyReport),
    Clusters(ClusterReport),
    Complete { axes: usize, elapsed_ms: u64 },
}

#[derive(Clone)]
pub struct AnalysisService {
    table: Arc<TelemetryTable>,
    settings: AnalysisSettings,
}

impl AnalysisService {
    /// Computes the derived error columns of every axis on blocking workers
    /// and merges them into the table in axis order.
    pub async fn prepare(table: TelemetryTable, settings: AnalysisSettings) -> anyhow::Result<Self> {
        let started = Instant::now();
        let axes = axes_present(&table);
        let shared = Arc::new(table);

        let mut workers = JoinSet::new();
        for axis in axes.iter().copied() {
            let table = shared.clone();
            workers.spawn_blocking(move || compute_errors(&table, axis));
        }

        let mut computations: BTreeMap<AxisId, ErrorComputation> = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(computation) => {
                    computations.insert(computation.axis, computation);
                }
                Err(e) => tracing::warn!("Error computation worker failed: {}", e),
            }
        }

        let mut table = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
        for (axis, mut computation) in computations {
            computation
                .apply_to(&mut table)
                .with_context(|| format!("merging derived columns for axis {axis}"))?;
        }

        tracing::info!(
            "Prepared {} samples over {} axes in {} ms",
            table.len(),
            axes.len(),
            started.elapsed().as_millis()
        );

        Ok(Self {
            table: Arc::new(table),
            settings,
        })
    }

    #[cfg(test)]
    pub fn table(&self) -> &TelemetryTable {
        &self.table
    }

    pub fn axes(&self) -> Vec<AxisId> {
        axes_present(&self.table)
    }

    pub fn overview(&self) -> DatasetOverview {
        let focus_axis = self.settings.axis();
        DatasetOverview {
            samples: self.table.len(),
            channels: self.table.channel_names().count(),
            time_span: self.table.time_span(),
            motion_types: self.table.motion_type_counts(),
            axes: self.axes(),
            focus_axis,
            focus_missing: focus_axis
                .map(|axis| resolve(&self.table, axis).missing())
                .unwrap_or_default(),
        }
    }

    /// `None` when the table carries no channel for `axis`.
    pub async fn axis_report(&self, axis: AxisId) -> anyhow::Result<Option<AxisReport>> {
        if resolve(&self.table, axis).is_empty() {
            return Ok(None);
        }
        let table = self.table.clone();
        let report = tokio::task::spawn_blocking(move || analyze_axis(&table, axis))
            .await
            .with_context(|| format!("axis {axis} analysis worker failed"))?;
        Ok(Some(report))
    }

    pub async fn anomalies(
        &self,
        axis: Option<AxisId>,
        contamination: Option<f64>,
    ) -> anyhow::Result<AnomalyReport> {
        let table = self.table.clone();
        let contamination = contamination.unwrap_or(self.settings.contamination);
        let seed = self.settings.seed;
        tokio::task::spawn_blocking(move || anomaly_report(&table, axis, contamination, seed))
            .await
            .context("anomaly detection worker failed")
    }

    pub async fn clusters(&self, k: Option<usize>, seed: Option<u64>) -> anyhow::Result<ClusterReport> {
        let table = self.table.clone();
        let k = k.unwrap_or(self.settings.clusters);
        let seed = seed.unwrap_or(self.settings.seed);
        tokio::task::spawn_blocking(move || cluster_report(&table, k, seed))
            .await
            .context("clustering worker failed")
    }

    /// Streams every axis report as its worker finishes, then the anomaly
    /// and cluster reports, then a completion event.
    pub fn stream_run(&self) -> mpsc::Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel(32);
        let service = self.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let axes = service.axes();

            let mut workers = JoinSet::new();
            for axis in axes.iter().copied() {
                let table = service.table.clone();
                workers.spawn(async move {
                    let report = tokio::task::spawn_blocking(move || analyze_axis(&table, axis)).await;
                    (axis, report)
                });
            }

            while let Some(joined) = workers.join_next().await {
                let event = match joined {
                    Ok((_, Ok(report))) => RunEvent::AxisReport(Box::new(report)),
                    Ok((axis, Err(e))) => {
                        tracing::warn!("Axis {} analysis failed: {}", axis, e);
                        RunEvent::AxisFailed {
                            axis,
                            message: e.to_string(),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Axis worker task failed: {}", e);
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    tracing::debug!("Run stream receiver dropped");
                    return;
                }
            }

            match service.anomalies(None, None).await {
                Ok(report) => {
                    let _ = tx.send(RunEvent::Anomalies(report)).await;
                }
                Err(e) => tracing::warn!("Anomaly report failed: {:#}", e),
            }
            match service.clusters(None, None).await {
                Ok(report) => {
                    let _ = tx.send(RunEvent::Clusters(report)).await;
                }
                Err(e) => tracing::warn!("Cluster report failed: {:#}", e),
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let _ = tx
                .send(RunEvent::Complete {
                    axes: axes.len(),
                    elapsed_ms,
                })
                .await;
        });

        rx
    }
}

fn anomaly_report(
    table: &TelemetryTable,
    axis: Option<AxisId>,
    contamination: f64,
    seed: u64,
) -> AnomalyReport {
    let channels = match axis {
        Some(axis) => axis_channels(table, axis),
        None => anomaly_channels(),
    };

    let outcome = detect(table, &channels, contamination, seed).map(|detection| {
        let flag = |sample: ScoredSample| FlaggedSample {
            row: sample.row,
            zeit: table.zeit()[sample.row],
            score: sample.score,
            motion_type: table.meta()[sample.row].motion_type.clone(),
        };
        AnomalyOverview {
            anomaly_rate: 100.0 * detection.anomalies as f64 / detection.samples.len() as f64,
            most_anomalous: detection
                .most_anomalous(TOP_ANOMALIES)
                .into_iter()
                .map(flag)
                .collect(),
            detection,
        }
    });

    if let Some(reason) = outcome.skip_reason() {
        tracing::warn!("Anomaly detection skipped: {}", reason);
    }

    AnomalyReport { axis, outcome }
}

fn cluster_report(table: &TelemetryTable, k: usize, seed: u64) -> ClusterReport {
    let outcome = cluster(table, &cluster_channels(), k, seed).map(|clustering| ClusterOverview {
        summaries: summarize_clusters(table, &clustering),
        clustering,
    });

    if let Some(reason) = outcome.skip_reason() {
        tracing::warn!("Motion clustering skipped: {}", reason);
    }

    ClusterReport { k, seed, outcome }
}

/// Size, mean Cartesian speed and most frequent motion type per cluster.
fn summarize_clusters(table: &TelemetryTable, clustering: &Clustering) -> Vec<ClusterSummary> {
    let speed = table.channel(CART_VEL_ACT);
    let sizes = clustering.sizes();

    (0..clustering.k)
        .map(|id| {
            let rows: Vec<usize> = clustering
                .assignments
                .iter()
                .filter(|&(_, &c)| c == id)
                .map(|(&row, _)| row)
                .collect();

            let speeds: Vec<f64> = speed
                .map(|column| rows.iter().filter_map(|&r| column[r]).collect())
                .unwrap_or_default();
            let mean_speed =
                (!speeds.is_empty()).then(|| speeds.iter().sum::<f64>() / speeds.len() as f64);

            let mut motion_counts: BTreeMap<&str, usize> = BTreeMap::new();
            for &row in &rows {
                if let Some(motion) = table.meta()[row].motion_type.as_deref() {
                    *motion_counts.entry(motion).or_default() += 1;
                }
            }
            // ties go to the alphabetically first motion type
            let dominant_motion_type = motion_counts
                .into_iter()
                .fold(None, |best: Option<(&str, usize)>, (motion, count)| match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((motion, count)),
                })
                .map(|(motion, _)| motion.to_string());

            ClusterSummary {
                cluster: id,
                size: sizes[id],
                mean_speed,
                dominant_motion_type,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::SkipReason;
    use crate::domain::telemetry::SampleMeta;

    fn axis(n: u32) -> AxisId {
        AxisId::new(n).unwrap()
    }

    /// Two axes with set-point/actual pairs, Cartesian channels and motion types.
    fn trace_table(n: usize) -> TelemetryTable {
        let zeit: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
        let meta: Vec<SampleMeta> = (0..n)
            .map(|i| SampleMeta {
                motion_type: Some(if i < n / 2 { "LIN" } else { "PTP" }.to_string()),
                ..SampleMeta::default()
            })
            .collect();
        let wave = |k: f64, scale: f64| -> Vec<f64> { (0..n).map(|i| (i as f64 * k).sin() * scale).collect() };

        let mut table = TelemetryTable::new(zeit, meta).unwrap();
        for (name, values) in [
            ("sollposition_1", wave(0.05, 10.0)),
            ("istposition_1", wave(0.05, 10.0).iter().map(|v| v - 0.02).collect()),
            ("sollgeschwindigkeit_1", wave(0.05, 5.0)),
            ("istgeschwindigkeit_1", wave(0.05, 5.0)),
            ("sollposition_2", wave(0.07, 20.0)),
            ("istposition_2", wave(0.07, 20.0).iter().map(|v| v + 0.5).collect()),
            ("x_act", wave(0.1, 100.0)),
            ("y_act", wave(0.08, 80.0)),
            ("z_act", wave(0.06, 40.0)),
            ("cart_vel_act", (0..n).map(|i| if i < n / 2 { 10.0 } else { 50.0 }).collect()),
        ] {
            table = table.with_channel(name, values).unwrap();
        }
        table
    }

    #[tokio::test]
    async fn test_prepare_merges_derived_columns_for_every_axis() {
        let service = AnalysisService::prepare(trace_table(80), AnalysisSettings::default())
            .await
            .unwrap();

        assert_eq!(service.axes(), vec![axis(1), axis(2)]);
        assert!(service.table().has_channel("calculated_pos_error_1"));
        assert!(service.table().has_channel("calculated_vel_diff_1"));
        assert!(service.table().has_channel("calculated_pos_error_2"));
        assert!(!service.table().has_channel("moment_error_1"));

        let error = service.table().channel("calculated_pos_error_2").unwrap();
        assert!(error.iter().flatten().all(|v| (v + 0.5).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_overview_reports_span_motion_types_and_focus_gaps() {
        let settings = AnalysisSettings {
            axis: 2,
            ..AnalysisSettings::default()
        };
        let service = AnalysisService::prepare(trace_table(80), settings).await.unwrap();

        let overview = service.overview();
        assert_eq!(overview.samples, 80);
        assert!((overview.time_span - 7.9).abs() < 1e-9);
        assert_eq!(overview.motion_types["LIN"], 40);
        assert_eq!(overview.motion_types["PTP"], 40);
        assert_eq!(overview.focus_axis, Some(axis(2)));
        // axis 2 carries only the position pair
        assert_eq!(
            overview.focus_missing,
            vec![
                SignalRole::PositionError,
                SignalRole::TargetVelocity,
                SignalRole::ActualVelocity,
                SignalRole::VelocityError,
                SignalRole::MotorTemperature,
                SignalRole::Current,
            ]
        );
    }

    #[tokio::test]
    async fn test_axis_report_for_unknown_axis_is_none() {
        let service = AnalysisService::prepare(trace_table(60), AnalysisSettings::default())
            .await
            .unwrap();

        assert!(service.axis_report(axis(4)).await.unwrap().is_none());
        let report = service.axis_report(axis(1)).await.unwrap().unwrap();
        assert_eq!(report.axis, axis(1));
        assert!(report.errors.get(crate::engine::tracking::ErrorKind::Position).is_some());
    }

    #[tokio::test]
    async fn test_anomaly_report_lists_top_samples() {
        let service = AnalysisService::prepare(trace_table(100), AnalysisSettings::default())
            .await
            .unwrap();

        let report = service.anomalies(None, Some(0.05)).await.unwrap();
        let overview = report.outcome.completed().unwrap();
        assert_eq!(overview.detection.anomalies, 5);
        assert!((overview.anomaly_rate - 5.0).abs() < 1e-9);
        assert_eq!(overview.most_anomalous.len(), TOP_ANOMALIES);
        for flagged in &overview.most_anomalous {
            assert_eq!(flagged.zeit, service.table().zeit()[flagged.row]);
        }
    }

    #[tokio::test]
    async fn test_anomaly_report_for_axis_with_too_few_channels() {
        let service = AnalysisService::prepare(trace_table(100), AnalysisSettings::default())
            .await
            .unwrap();

        // axis 2 has two supplied channels only
        let report = service.anomalies(Some(axis(2)), None).await.unwrap();
        assert!(matches!(
            report.outcome.skip_reason(),
            Some(SkipReason::InsufficientData { required: 3, available: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_cluster_summaries_cover_every_sample() {
        let service = AnalysisService::prepare(trace_table(120), AnalysisSettings::default())
            .await
            .unwrap();

        let report = service.clusters(Some(2), None).await.unwrap();
        assert_eq!(report.seed, 42);
        let overview = report.outcome.completed().unwrap();
        assert_eq!(overview.summaries.len(), 2);
        assert_eq!(overview.summaries.iter().map(|s| s.size).sum::<usize>(), 120);
        for summary in &overview.summaries {
            assert!(summary.mean_speed.is_some());
            assert!(summary.dominant_motion_type.is_some());
        }
    }

    #[tokio::test]
    async fn test_clusters_skipped_below_fifty_samples() {
        let service = AnalysisService::prepare(trace_table(30), AnalysisSettings::default())
            .await
            .unwrap();
        let report = service.clusters(None, None).await.unwrap();
        assert!(!report.outcome.is_completed());
    }

    #[tokio::test]
    async fn test_stream_run_ends_with_completion() {
        let service = AnalysisService::prepare(trace_table(80), AnalysisSettings::default())
            .await
            .unwrap();

        let mut rx = service.stream_run();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let axis_reports = events
            .iter()
            .filter(|e| matches!(e, RunEvent::AxisReport(_)))
            .count();
        assert_eq!(axis_reports, 2);
        assert!(events.iter().any(|e| matches!(e, RunEvent::Anomalies(_))));
        assert!(events.iter().any(|e| matches!(e, RunEvent::Clusters(_))));
        assert!(matches!(events.last(), Some(RunEvent::Complete { axes: 2, .. })));
    }

    #[test]
    fn test_dominant_motion_type_prefers_majority() {
        let table = trace_table(60);
        let clustering = Clustering {
            channels: vec![],
            k: 2,
            assignments: (0..60).map(|row| (row, if row < 40 { 0 } else { 1 })).collect(),
            inertia: 0.0,
            iterations: 1,
        };
        let summaries = summarize_clusters(&table, &clustering);
        assert_eq!(summaries[0].dominant_motion_type.as_deref(), Some("LIN"));
        assert_eq!(summaries[0].size, 40);
        assert_eq!(summaries[1].dominant_motion_type.as_deref(), Some("PTP"));
        assert_eq!(summaries[1].mean_speed, Some(50.0));
    }
}
