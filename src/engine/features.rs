// Feature matrices for the whole-table analyses
use crate::domain::channels::{
    resolve, AxisId, SignalRole, CART_VEL_ACT, X_ACT, Y_ACT, Z_ACT,
};
use crate::domain::telemetry::TelemetryTable;
use crate::engine::statistics::{mean, std_dev, EPSILON};

/// Row-major matrix of complete samples. Rows with a missing value in any
/// selected channel are left out; `rows` maps back to table row indices.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub channels: Vec<String>,
    pub rows: Vec<usize>,
    data: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Builds from the listed channels that exist in the table; unknown names are dropped.
    pub fn build(table: &TelemetryTable, channels: &[String]) -> Self {
        let channels: Vec<String> = channels
            .iter()
            .filter(|name| table.has_channel(name))
            .cloned()
            .collect();
        let columns: Vec<&[Option<f64>]> = channels
            .iter()
            .filter_map(|name| table.channel(name))
            .collect();

        let names: Vec<&str> = channels.iter().map(String::as_str).collect();
        let rows = if names.is_empty() {
            Vec::new()
        } else {
            table.complete_rows(&names)
        };
        let data = rows
            .iter()
            .map(|&row| columns.iter().filter_map(|c| c[row]).collect())
            .collect();

        Self { channels, rows, data }
    }

    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    pub fn n_features(&self) -> usize {
        self.channels.len()
    }

    pub fn samples(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// Z-score every column in place. Constant columns are only centred.
    pub fn standardize(&mut self) {
        for j in 0..self.n_features() {
            let column: Vec<f64> = self.data.iter().map(|r| r[j]).collect();
            let m = mean(&column);
            let s = std_dev(&column);
            let scale = if s > EPSILON { s } else { 1.0 };
            for r in &mut self.data {
                r[j] = (r[j] - m) / scale;
            }
        }
    }

    pub fn standardized(mut self) -> Self {
        self.standardize();
        self
    }
}

fn first_axes(role: SignalRole, count: u32) -> impl Iterator<Item = String> {
    (1..=count).filter_map(move |n| AxisId::new(n).map(|axis| role.channel_name(axis)))
}

/// Cartesian position and speed, plus temperature and current of the first three axes.
pub fn anomaly_channels() -> Vec<String> {
    [X_ACT, Y_ACT, Z_ACT, CART_VEL_ACT]
        .iter()
        .map(|s| s.to_string())
        .chain(first_axes(SignalRole::MotorTemperature, 3))
        .chain(first_axes(SignalRole::Current, 3))
        .collect()
}

/// Every resolved channel of one axis.
pub fn axis_channels(table: &TelemetryTable, axis: AxisId) -> Vec<String> {
    resolve(table, axis).names().map(str::to_string).collect()
}

/// Cartesian position, speed and the first three joint angles.
pub fn cluster_channels() -> Vec<String> {
    [X_ACT, Y_ACT, Z_ACT, CART_VEL_ACT]
        .iter()
        .map(|s| s.to_string())
        .chain(first_axes(SignalRole::JointAngle, 3))
        .collect()
}
