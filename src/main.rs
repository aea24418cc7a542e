// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod engine;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::analysis_service::AnalysisService;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::telemetry::TelemetryTable;
use crate::infrastructure::config::{load_settings, Settings, SourceKind};
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::infrastructure::synthetic_repository::SyntheticRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    anomalies, axis_report, clusters, health_check, list_axes, stream_report,
};

/// Load from the configured source, falling back to generated traces when
/// the database cannot be read.
async fn load_table(settings: &Settings) -> anyhow::Result<(TelemetryTable, String)> {
    let limit = settings.analysis.sample_limit.rows();
    let synthetic = SyntheticRepository::new(settings.analysis.seed, settings.source.robots);

    if let (SourceKind::Influx, Some(influx)) = (settings.source.kind, &settings.influx) {
        let repository = InfluxRepository::new(influx);
        match repository.load_table(limit).await {
            Ok(table) => return Ok((table, repository.source_name().to_string())),
            Err(e) => tracing::warn!("InfluxDB load failed, using synthetic traces: {:#}", e),
        }
    }

    let table = synthetic
        .load_table(limit)
        .await
        .context("upstream load failed: synthetic trace generation")?;
    Ok((table, synthetic.source_name().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let settings = load_settings()?;

    // Load the trace table (infrastructure layer)
    let (table, source) = load_table(&settings).await?;

    // Create services (application layer)
    let analysis_service = AnalysisService::prepare(table, settings.analysis.clone()).await?;
    let overview = analysis_service.overview();
    tracing::info!(
        "Loaded {} samples from {} spanning {:.2} s over {} axes, motion types {:?}",
        overview.samples,
        source,
        overview.time_span,
        overview.axes.len(),
        overview.motion_types
    );
    if let Some(axis) = overview.focus_axis {
        if !overview.focus_missing.is_empty() {
            tracing::warn!("Axis {} lacks channels: {:?}", axis, overview.focus_missing);
        }
    }

    // Create application state
    let state = Arc::new(AppState {
        analysis_service,
        source,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/axes", get(list_axes))
        .route("/axes/:axis/report", get(axis_report))
        .route("/anomalies", get(anomalies))
        .route("/clusters", get(clusters))
        .route("/report/stream", get(stream_report))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind))?;
    tracing::info!("Starting robot-trace-analysis service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
