// Trace table domain model
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("timestamp at row {row} is not finite")]
    NonFiniteTimestamp { row: usize },
    #[error("timestamps not sorted ascending at row {row}")]
    UnsortedTimestamps { row: usize },
    #[error("channel {name} has {actual} values, table has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("channel {0} already exists")]
    DuplicateChannel(String),
    #[error("derived column {0} would overwrite a supplied channel")]
    DerivedConflict(String),
}

/// Categorical metadata attached to every sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleMeta {
    pub instance_id: Option<String>,
    pub trace_id: Option<String>,
    pub motion_type: Option<String>,
    pub point_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOrigin {
    Supplied,
    Derived,
}

#[derive(Debug, Clone)]
struct Channel {
    values: Vec<Option<f64>>,
    origin: ChannelOrigin,
}

/// Time-ordered samples with named numeric channels.
///
/// Rows are fixed at construction; channels may be added afterwards, either
/// supplied by a loader or derived by the analysis engine. Derived columns
/// can be rewritten, supplied ones cannot.
#[derive(Debug, Clone)]
pub struct TelemetryTable {
    zeit: Vec<f64>,
    meta: Vec<SampleMeta>,
    channels: BTreeMap<String, Channel>,
}

impl TelemetryTable {
    pub fn new(zeit: Vec<f64>, meta: Vec<SampleMeta>) -> Result<Self, TableError> {
        if meta.len() != zeit.len() {
            return Err(TableError::LengthMismatch {
                name: "meta".to_string(),
                expected: zeit.len(),
                actual: meta.len(),
            });
        }
        if let Some(row) = zeit.iter().position(|t| !t.is_finite()) {
            return Err(TableError::NonFiniteTimestamp { row });
        }
        if let Some(row) = zeit.windows(2).position(|w| w[1] < w[0]) {
            return Err(TableError::UnsortedTimestamps { row: row + 1 });
        }

        Ok(Self {
            zeit,
            meta,
            channels: BTreeMap::new(),
        })
    }

    /// Table without metadata.
    #[cfg(test)]
    pub fn from_timestamps(zeit: Vec<f64>) -> Result<Self, TableError> {
        let meta = vec![SampleMeta::default(); zeit.len()];
        Self::new(zeit, meta)
    }

    #[cfg(test)]
    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, TableError> {
        self.insert_channel(name, values.into_iter().map(Some).collect())?;
        Ok(self)
    }

    pub fn insert_channel(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        self.check_length(&name, values.len())?;
        if self.channels.contains_key(&name) {
            return Err(TableError::DuplicateChannel(name));
        }
        self.channels.insert(
            name,
            Channel {
                values,
                origin: ChannelOrigin::Supplied,
            },
        );
        Ok(())
    }

    /// Append or refresh a derived column. Refuses to touch supplied channels.
    pub fn append_derived(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        self.check_length(&name, values.len())?;
        match self.channels.get_mut(&name) {
            Some(channel) if channel.origin == ChannelOrigin::Supplied => {
                Err(TableError::DerivedConflict(name))
            }
            Some(channel) => {
                channel.values = values;
                Ok(())
            }
            None => {
                self.channels.insert(
                    name,
                    Channel {
                        values,
                        origin: ChannelOrigin::Derived,
                    },
                );
                Ok(())
            }
        }
    }

    fn check_length(&self, name: &str, actual: usize) -> Result<(), TableError> {
        if actual != self.len() {
            return Err(TableError::LengthMismatch {
                name: name.to_string(),
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.zeit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zeit.is_empty()
    }

    pub fn zeit(&self) -> &[f64] {
        &self.zeit
    }

    pub fn meta(&self) -> &[SampleMeta] {
        &self.meta
    }

    /// Seconds between the first and last sample.
    pub fn time_span(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.zeit[self.len() - 1] - self.zeit[0]
    }

    /// Samples per motion type. Rows without one are not counted.
    pub fn motion_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for motion in self.meta.iter().filter_map(|m| m.motion_type.as_ref()) {
            *counts.entry(motion.clone()).or_default() += 1;
        }
        counts
    }

    pub fn channel(&self, name: &str) -> Option<&[Option<f64>]> {
        self.channels.get(name).map(|c| c.values.as_slice())
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Rows where every listed channel has a value. Unknown channels match nothing.
    pub fn complete_rows(&self, names: &[&str]) -> Vec<usize> {
        let columns: Option<Vec<&[Option<f64>]>> =
            names.iter().map(|name| self.channel(name)).collect();
        let Some(columns) = columns else {
            return Vec::new();
        };

        (0..self.len())
            .filter(|&row| columns.iter().all(|c| c[row].is_some()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsorted_timestamps() {
        let err = TelemetryTable::from_timestamps(vec![0.0, 0.2, 0.1]).unwrap_err();
        assert_eq!(err, TableError::UnsortedTimestamps { row: 2 });
    }

    #[test]
    fn test_rejects_non_finite_timestamps() {
        let err = TelemetryTable::from_timestamps(vec![0.0, f64::NAN, 0.1]).unwrap_err();
        assert_eq!(err, TableError::NonFiniteTimestamp { row: 1 });
        let err = TelemetryTable::from_timestamps(vec![0.0, f64::INFINITY]).unwrap_err();
        assert_eq!(err, TableError::NonFiniteTimestamp { row: 1 });
    }

    #[test]
    fn test_time_span_and_motion_counts() {
        let meta = ["LIN", "PTP", "LIN"]
            .iter()
            .map(|m| SampleMeta {
                motion_type: Some(m.to_string()),
                ..SampleMeta::default()
            })
            .chain(std::iter::once(SampleMeta::default()))
            .collect();
        let table = TelemetryTable::new(vec![1.5, 2.0, 3.0, 4.25], meta).unwrap();

        assert_eq!(table.time_span(), 2.75);
        let counts = table.motion_type_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["LIN"], 2);
        assert_eq!(counts["PTP"], 1);

        assert_eq!(TelemetryTable::from_timestamps(vec![]).unwrap().time_span(), 0.0);
    }

    #[test]
    fn test_equal_timestamps_are_allowed() {
        let table = TelemetryTable::from_timestamps(vec![0.0, 0.0, 0.1]).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_channel_length_must_match() {
        let table = TelemetryTable::from_timestamps(vec![0.0, 1.0]).unwrap();
        let err = table.with_channel("x_act", vec![1.0]).unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_derived_never_overwrites_supplied() {
        let mut table = TelemetryTable::from_timestamps(vec![0.0, 1.0])
            .unwrap()
            .with_channel("moment_error_1", vec![1.0, 2.0])
            .unwrap();

        let err = table
            .append_derived("moment_error_1", vec![Some(0.0), Some(0.0)])
            .unwrap_err();
        assert_eq!(err, TableError::DerivedConflict("moment_error_1".to_string()));
        assert_eq!(table.channel("moment_error_1").unwrap(), &[Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_derived_can_be_refreshed() {
        let mut table = TelemetryTable::from_timestamps(vec![0.0, 1.0]).unwrap();
        table.append_derived("d", vec![Some(1.0), None]).unwrap();
        table.append_derived("d", vec![Some(1.0), Some(3.0)]).unwrap();

        assert_eq!(table.channel("d").unwrap(), &[Some(1.0), Some(3.0)]);
    }

    #[test]
    fn test_complete_rows_skips_missing_values() {
        let mut table = TelemetryTable::from_timestamps(vec![0.0, 1.0, 2.0]).unwrap();
        table.insert_channel("a", vec![Some(1.0), None, Some(3.0)]).unwrap();
        table.insert_channel("b", vec![Some(1.0), Some(2.0), Some(3.0)]).unwrap();

        assert_eq!(table.complete_rows(&["a", "b"]), vec![0, 2]);
        assert!(table.complete_rows(&["a", "missing"]).is_empty());
    }
}
