// Following-error derivation from set-point/actual channel pairs
use crate::domain::channels::{resolve, AxisChannelSet, AxisId, SignalRole};
use crate::domain::outcome::{Outcome, SkipReason};
use crate::domain::telemetry::{TableError, TelemetryTable};
use crate::engine::statistics::{present, summarize, summarize_pair, PairSummary, Summary};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Position,
    Velocity,
    Torque,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 3] = [ErrorKind::Position, ErrorKind::Velocity, ErrorKind::Torque];

    fn target(self) -> SignalRole {
        match self {
            ErrorKind::Position => SignalRole::TargetPosition,
            ErrorKind::Velocity => SignalRole::TargetVelocity,
            ErrorKind::Torque => SignalRole::TargetTorque,
        }
    }

    fn actual(self) -> SignalRole {
        match self {
            ErrorKind::Position => SignalRole::ActualPosition,
            ErrorKind::Velocity => SignalRole::ActualVelocity,
            ErrorKind::Torque => SignalRole::ActualTorque,
        }
    }

    /// Error channel the controller may already log for this kind.
    fn collected(self) -> Option<SignalRole> {
        match self {
            ErrorKind::Position => Some(SignalRole::PositionError),
            ErrorKind::Velocity => Some(SignalRole::VelocityError),
            ErrorKind::Torque => None,
        }
    }

    pub fn derived_column(self, axis: AxisId) -> String {
        match self {
            ErrorKind::Position => format!("calculated_pos_error_{axis}"),
            ErrorKind::Velocity => format!("calculated_vel_diff_{axis}"),
            ErrorKind::Torque => format!("moment_error_{axis}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// |r| > 0.8
    High,
    /// 0.5 < |r| <= 0.8, possible systematic offset
    Moderate,
    /// |r| <= 0.5 or undefined, data-quality concern
    Low,
}

impl Consistency {
    pub fn from_correlation(correlation: Option<f64>) -> Self {
        match correlation.map(f64::abs) {
            Some(r) if r > 0.8 => Consistency::High,
            Some(r) if r > 0.5 => Consistency::Moderate,
            _ => Consistency::Low,
        }
    }
}

/// Collected-vs-computed comparison for one error kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyCheck {
    pub collected_column: String,
    pub comparison: Outcome<PairSummary>,
    pub verdict: Consistency,
}

/// Computed `target - actual` series, aligned with the table rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSeries {
    pub kind: ErrorKind,
    pub column: String,
    #[serde(skip)]
    pub values: Vec<Option<f64>>,
    pub summary: Outcome<Summary>,
    pub consistency: Option<ConsistencyCheck>,
}

/// Error outcomes of one axis. Skipped kinds carry the missing channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorComputation {
    pub axis: AxisId,
    pub kinds: BTreeMap<ErrorKind, Outcome<ErrorSeries>>,
}

impl ErrorComputation {
    pub fn get(&self, kind: ErrorKind) -> Option<&ErrorSeries> {
        self.kinds.get(&kind).and_then(Outcome::completed)
    }

    /// Append the derived columns; a kind whose column collides with a
    /// supplied channel is downgraded to a skip.
    pub fn apply_to(&mut self, table: &mut TelemetryTable) -> Result<(), TableError> {
        for outcome in self.kinds.values_mut() {
            let Outcome::Completed(series) = outcome else {
                continue;
            };
            match table.append_derived(series.column.clone(), series.values.clone()) {
                Ok(()) => {}
                Err(TableError::DerivedConflict(column)) => {
                    tracing::warn!("Derived column {} collides with a supplied channel", column);
                    *outcome = Outcome::Skipped(SkipReason::ColumnConflict { column });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub fn compute_errors(table: &TelemetryTable, axis: AxisId) -> ErrorComputation {
    let channels = resolve(table, axis);
    let kinds = ErrorKind::ALL
        .iter()
        .map(|&kind| (kind, Outcome::from(compute_kind(table, &channels, kind))))
        .collect();

    ErrorComputation { axis, kinds }
}

fn compute_kind(
    table: &TelemetryTable,
    channels: &AxisChannelSet,
    kind: ErrorKind,
) -> Result<ErrorSeries, SkipReason> {
    let target = column(table, channels, kind.target())?;
    let actual = column(table, channels, kind.actual())?;

    let values: Vec<Option<f64>> = target
        .iter()
        .zip(actual)
        .map(|(t, a)| Some((*t)? - (*a)?))
        .collect();

    let consistency = kind
        .collected()
        .and_then(|role| channels.get(role))
        .and_then(|name| Some((name, table.channel(name)?)))
        .map(|(name, collected)| {
            let comparison = summarize_pair(collected, &values);
            let verdict = Consistency::from_correlation(
                comparison.completed().and_then(|pair| pair.correlation),
            );
            tracing::debug!(
                "Axis {} {:?} error consistency against {}: {:?}",
                channels.axis,
                kind,
                name,
                verdict
            );
            ConsistencyCheck {
                collected_column: name.to_string(),
                comparison,
                verdict,
            }
        });

    Ok(ErrorSeries {
        kind,
        column: kind.derived_column(channels.axis),
        summary: summarize(&present(&values)),
        values,
        consistency,
    })
}

fn column<'a>(
    table: &'a TelemetryTable,
    channels: &AxisChannelSet,
    role: SignalRole,
) -> Result<&'a [Option<f64>], SkipReason> {
    channels
        .get(role)
        .and_then(|name| table.channel(name))
        .ok_or_else(|| SkipReason::missing(role.channel_name(channels.axis)))
}
