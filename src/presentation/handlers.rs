// HTTP request handlers
use crate::application::analysis_service::DatasetOverview;
use crate::domain::channels::AxisId;
use crate::infrastructure::http_response::{error_response, stream_from_receiver};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    pub axis: Option<u32>,
    pub contamination: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClusterQuery {
    pub k: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AxesOverview {
    pub source: String,
    #[serde(flatten)]
    pub dataset: DatasetOverview,
}

fn parse_axis(axis: u32) -> Result<AxisId, Response> {
    AxisId::new(axis).ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "axis numbers start at 1"))
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Axes present in the loaded table, with the dataset overview
pub async fn list_axes(State(state): State<Arc<AppState>>) -> Json<AxesOverview> {
    Json(AxesOverview {
        source: state.source.clone(),
        dataset: state.analysis_service.overview(),
    })
}

/// Full report for one axis
pub async fn axis_report(Path(axis): Path<u32>, State(state): State<Arc<AppState>>) -> Response {
    let axis = match parse_axis(axis) {
        Ok(axis) => axis,
        Err(response) => return response,
    };

    match state.analysis_service.axis_report(axis).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("axis {axis} not present")),
        Err(e) => {
            tracing::error!("Axis {} report failed: {:#}", axis, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "axis analysis failed")
        }
    }
}

pub async fn anomalies(Query(query): Query<AnomalyQuery>, State(state): State<Arc<AppState>>) -> Response {
    let axis = match query.axis.map(parse_axis).transpose() {
        Ok(axis) => axis,
        Err(response) => return response,
    };

    match state.analysis_service.anomalies(axis, query.contamination).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!("Anomaly detection failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "anomaly detection failed")
        }
    }
}

pub async fn clusters(Query(query): Query<ClusterQuery>, State(state): State<Arc<AppState>>) -> Response {
    match state.analysis_service.clusters(query.k, query.seed).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!("Motion clustering failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "motion clustering failed")
        }
    }
}

/// Stream every analysis as it completes (progressive loading)
pub async fn stream_report(State(state): State<Arc<AppState>>) -> Response {
    let rx = state.analysis_service.stream_run();
    stream_from_receiver(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::analysis_service::AnalysisService;
    use crate::infrastructure::config::AnalysisSettings;
    use crate::infrastructure::synthetic_repository::SyntheticRepository;

    async fn state() -> Arc<AppState> {
        let table = SyntheticRepository::new(42, 1).generate(120).unwrap();
        let analysis_service = AnalysisService::prepare(table, AnalysisSettings::default())
            .await
            .unwrap();
        Arc::new(AppState {
            analysis_service,
            source: "synthetic".to_string(),
        })
    }

    #[tokio::test]
    async fn test_list_axes() {
        let Json(overview) = list_axes(State(state().await)).await;
        assert_eq!(overview.source, "synthetic");
        let dataset = &overview.dataset;
        assert_eq!(dataset.samples, 120);
        assert_eq!(dataset.axes.len(), 6);
        assert_eq!(dataset.focus_axis, AxisId::new(1));
        assert!(dataset.focus_missing.is_empty());
        assert_eq!(dataset.motion_types.values().sum::<usize>(), 120);
        assert!((dataset.time_span - 100.0).abs() < 0.01);

        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["samples"], 120);
        assert!(json["motion_types"].is_object());
    }

    #[tokio::test]
    async fn test_axis_report_status_codes() {
        let state = state().await;
        assert_eq!(axis_report(Path(3), State(state.clone())).await.status(), StatusCode::OK);
        assert_eq!(axis_report(Path(9), State(state.clone())).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(axis_report(Path(0), State(state)).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_anomalies_and_clusters_respond() {
        let state = state().await;
        let query = AnomalyQuery {
            axis: Some(2),
            contamination: Some(0.2),
        };
        assert_eq!(anomalies(Query(query), State(state.clone())).await.status(), StatusCode::OK);
        let query = ClusterQuery { k: Some(3), seed: None };
        assert_eq!(clusters(Query(query), State(state)).await.status(), StatusCode::OK);
    }
}
