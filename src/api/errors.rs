use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::infra::error_metrics::ErrorMetricsEntry;
use crate::infra::http_app::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorsSnapshot {
    pub total: u64,
    pub entries: Vec<ErrorMetricsEntry>,
}

pub async fn list(State(state): State<AppState>) -> Json<ErrorsSnapshot> {
    let errors = &state.ctx.errors;
    Json(ErrorsSnapshot {
        total: errors.total(),
        entries: errors.metrics(),
    })
}

pub async fn reset(State(state): State<AppState>) -> StatusCode {
    state.ctx.errors.reset();
    tracing::info!("error metrics reset");
    StatusCode::NO_CONTENT
}
