// Repository trait for trace data access
use crate::domain::telemetry::TelemetryTable;
use async_trait::async_trait;

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Short label for logs, e.g. `influx` or `synthetic`.
    fn source_name(&self) -> &str;

    /// Load up to `limit` samples (all of them for `None`), sorted by `zeit`.
    async fn load_table(&self, limit: Option<usize>) -> anyhow::Result<TelemetryTable>;
}
