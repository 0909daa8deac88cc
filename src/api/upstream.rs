use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::core::error::TypedError;
use crate::infra::http::json::error_response;
use crate::infra::http_app::AppState;

pub const OPERATION: &str = "upstream.get";

#[derive(Debug, Deserialize)]
pub struct ProxyReq {
    pub path: String,
}

/// Forward a GET to the upstream under the executor's retry, breaker and deadline.
pub async fn proxy(State(state): State<AppState>, Json(req): Json<ProxyReq>) -> Response {
    let production = state.ctx.is_production();
    let path = req.path.trim().to_string();
    if path.is_empty() {
        let err = TypedError::validation("path must not be empty");
        state.ctx.errors.record_error(&err);
        return error_response(&err, production);
    }

    tracing::debug!(%path, "proxy request");
    let upstream = state.upstream.clone();
    let options = state.ctx.upstream_options(OPERATION);
    let result = state
        .ctx
        .executor
        .execute(
            move || {
                let upstream = upstream.clone();
                let path = path.clone();
                async move { upstream.get_json(&path).await }
            },
            options,
        )
        .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e, production),
    }
}
