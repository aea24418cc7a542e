// Domain layer - Trace table, channel registry and analysis outcomes
pub mod channels;
pub mod outcome;
pub mod telemetry;
