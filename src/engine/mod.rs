// Analysis engine: pure computations over a telemetry table
pub mod anomaly;
pub mod axis_report;
pub mod clustering;
pub mod features;
pub mod grading;
pub mod statistics;
pub mod tracking;
