// InfluxDB repository implementation
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::telemetry::{SampleMeta, TelemetryTable};
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const TRACE_QUERY: &str = "SELECT * FROM ${measurement}";
const METADATA_COLUMNS: [&str; 4] = ["ins_id", "trace_id", "motion_type", "point_name"];

#[derive(Debug, Clone)]
pub struct InfluxRepository {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    measurement: String,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    values: Vec<Vec<Value>>,
}

impl InfluxRepository {
    pub fn new(settings: &InfluxSettings) -> Self {
        Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            measurement: settings.measurement.clone(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    fn trace_query(&self, limit: Option<usize>) -> String {
        let mut vars = HashMap::new();
        vars.insert("measurement".to_string(), self.measurement.clone());
        let query = prepare_query(TRACE_QUERY, &vars);
        match limit {
            Some(n) => format!("{query} LIMIT {n}"),
            None => query,
        }
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);

        let client = reqwest::Client::new();
        let response = client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.first().and_then(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }
}

#[async_trait]
impl TelemetryRepository for InfluxRepository {
    fn source_name(&self) -> &str {
        "influx"
    }

    async fn load_table(&self, limit: Option<usize>) -> Result<TelemetryTable> {
        let query = self.trace_query(limit);
        tracing::debug!("Executing trace query: {}", query);

        let response = self.execute_query(&query).await?;
        let series = response
            .results
            .into_iter()
            .next()
            .and_then(|r| r.series)
            .and_then(|s| s.into_iter().next())
            .with_context(|| format!("measurement {} returned no series", self.measurement))?;

        let table = table_from_series(&series)?;
        tracing::info!(
            "Loaded {} samples with {} channels from InfluxDB",
            table.len(),
            table.channel_names().count()
        );
        Ok(table)
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Seconds since the earliest row, from `zeit` if present, else from RFC 3339 `time`.
fn row_times(series: &InfluxQLSeries) -> Result<Vec<Option<f64>>> {
    let column = |name: &str| series.columns.iter().position(|c| c == name);

    if let Some(idx) = column("zeit") {
        return Ok(series
            .values
            .iter()
            .map(|row| row.get(idx).and_then(as_number))
            .collect());
    }

    let idx = column("time").context("series has neither a zeit nor a time column")?;
    let millis: Vec<Option<i64>> = series
        .values
        .iter()
        .map(|row| {
            row.get(idx)
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.timestamp_millis())
        })
        .collect();
    let origin = millis.iter().flatten().copied().min().unwrap_or(0);
    Ok(millis
        .into_iter()
        .map(|ms| ms.map(|ms| (ms - origin) as f64 / 1000.0))
        .collect())
}

fn table_from_series(series: &InfluxQLSeries) -> Result<TelemetryTable> {
    let times = row_times(series)?;

    // rows without a usable timestamp cannot be placed on the time axis
    let mut order: Vec<(usize, f64)> = times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.map(|t| (i, t)))
        .collect();
    let dropped = series.values.len() - order.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} rows without a timestamp", dropped);
    }
    order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let cell = |row: usize, col: usize| series.values[row].get(col).unwrap_or(&Value::Null);
    let label = |name: &str, row: usize| {
        series
            .columns
            .iter()
            .position(|c| c == name)
            .and_then(|col| as_label(cell(row, col)))
    };

    let zeit: Vec<f64> = order.iter().map(|&(_, t)| t).collect();
    let meta: Vec<SampleMeta> = order
        .iter()
        .map(|&(row, _)| SampleMeta {
            instance_id: label(METADATA_COLUMNS[0], row),
            trace_id: label(METADATA_COLUMNS[1], row),
            motion_type: label(METADATA_COLUMNS[2], row),
            point_name: label(METADATA_COLUMNS[3], row),
        })
        .collect();

    let mut table = TelemetryTable::new(zeit, meta)?;
    for (col, name) in series.columns.iter().enumerate() {
        if matches!(name.as_str(), "time" | "zeit") || METADATA_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        let values: Vec<Option<f64>> = order.iter().map(|&(row, _)| as_number(cell(row, col))).collect();
        if values.iter().all(Option::is_none) {
            tracing::debug!("Skipping non-numeric column {}", name);
            continue;
        }
        table.insert_channel(name.clone(), values)?;
    }

    Ok(table)
}
