// Per-axis deep dive: errors, statistics, lag and grades for one axis
use crate::domain::channels::{resolve, AxisChannelSet, AxisId, SignalRole};
use crate::domain::outcome::{Outcome, SkipReason};
use crate::domain::telemetry::TelemetryTable;
use crate::engine::grading::{grade_axis, recommend_maintenance, AxisStatistics, GradeReport, Recommendation};
use crate::engine::statistics::{
    estimate_lag, peak_to_mean, present, summarize, summarize_pair, trend_slope, LagEstimate,
    Summary, MAX_LAG_SAMPLES,
};
use crate::engine::tracking::{compute_errors, ErrorComputation, ErrorKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisReport {
    pub axis: AxisId,
    pub channels: AxisChannelSet,
    pub errors: ErrorComputation,
    /// Actual velocity relative to target velocity.
    pub velocity_lag: Outcome<LagEstimate>,
    pub statistics: AxisStatistics,
    pub grades: GradeReport,
    pub recommendations: Vec<Recommendation>,
}

fn role_values<'a>(table: &'a TelemetryTable, channels: &AxisChannelSet, role: SignalRole) -> Option<&'a [Option<f64>]> {
    channels.get(role).and_then(|name| table.channel(name))
}

fn role_summary(table: &TelemetryTable, channels: &AxisChannelSet, role: SignalRole) -> Option<Summary> {
    role_values(table, channels, role).and_then(|values| summarize(&present(values)).completed().copied())
}

fn role_correlation(
    table: &TelemetryTable,
    channels: &AxisChannelSet,
    a: SignalRole,
    b: SignalRole,
) -> Option<f64> {
    let a = role_values(table, channels, a)?;
    let b = role_values(table, channels, b)?;
    summarize_pair(a, b).completed().and_then(|pair| pair.correlation)
}

fn velocity_lag(table: &TelemetryTable, channels: &AxisChannelSet) -> Outcome<LagEstimate> {
    let (Some(target), Some(actual)) = (
        channels.get(SignalRole::TargetVelocity),
        channels.get(SignalRole::ActualVelocity),
    ) else {
        let role = if channels.contains(SignalRole::TargetVelocity) {
            SignalRole::ActualVelocity
        } else {
            SignalRole::TargetVelocity
        };
        return Outcome::Skipped(SkipReason::missing(role.channel_name(channels.axis)));
    };

    let rows = table.complete_rows(&[target, actual]);
    let pick = |name: &str| -> Vec<f64> {
        table
            .channel(name)
            .map(|column| rows.iter().filter_map(|&r| column[r]).collect())
            .unwrap_or_default()
    };
    let timestamps: Vec<f64> = rows.iter().map(|&r| table.zeit()[r]).collect();

    estimate_lag(&pick(target), &pick(actual), &timestamps, MAX_LAG_SAMPLES)
}

pub fn analyze_axis(table: &TelemetryTable, axis: AxisId) -> AxisReport {
    let channels = resolve(table, axis);
    let errors = compute_errors(table, axis);

    let error_summary = |kind: ErrorKind| errors.get(kind).and_then(|s| s.summary.completed().copied());

    let torque = role_values(table, &channels, SignalRole::ActualTorque)
        .map(present)
        .filter(|values| !values.is_empty());
    let torque_load = torque.as_ref().and_then(|values| {
        let abs: Vec<f64> = values.iter().map(|v| v.abs()).collect();
        summarize(&abs).completed().copied()
    });
    let peak_load_ratio = torque.as_deref().map(peak_to_mean);
    let temperature_trend = role_values(table, &channels, SignalRole::MotorTemperature)
        .map(|values| present(values))
        .filter(|values| !values.is_empty())
        .map(|values| trend_slope(&values));

    let statistics = AxisStatistics {
        position_error: error_summary(ErrorKind::Position),
        velocity_error: error_summary(ErrorKind::Velocity),
        torque_error: error_summary(ErrorKind::Torque),
        torque_load,
        peak_load_ratio,
        velocity: role_summary(table, &channels, SignalRole::ActualVelocity),
        temperature: role_summary(table, &channels, SignalRole::MotorTemperature),
        temperature_trend,
        current: role_summary(table, &channels, SignalRole::Current),
        temperature_current_correlation: role_correlation(
            table,
            &channels,
            SignalRole::MotorTemperature,
            SignalRole::Current,
        ),
        torque_current_correlation: role_correlation(
            table,
            &channels,
            SignalRole::ActualTorque,
            SignalRole::Current,
        ),
    };

    let grades = grade_axis(axis, &statistics);
    let recommendations = recommend_maintenance(&statistics);
    let velocity_lag = velocity_lag(table, &channels);

    tracing::debug!(
        "Axis {}: {} channels, position grade {:?}, {} recommendations",
        axis,
        channels.len(),
        grades.position_precision,
        recommendations.len()
    );

    AxisReport {
        axis,
        channels,
        errors,
        velocity_lag,
        statistics,
        grades,
        recommendations,
    }
}
