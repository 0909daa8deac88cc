use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::clients::upstream::Upstream;
use crate::infra::context::ResilienceContext;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ResilienceContext>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    pub fn new(ctx: Arc<ResilienceContext>, upstream: Arc<dyn Upstream>) -> Self {
        Self { ctx, upstream }
    }
}

/// `/healthz`, the error-metrics snapshot, and the resilient upstream proxy.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/errors",
            get(crate::api::errors::list).delete(crate::api::errors::reset),
        )
        .route("/v1/upstream", post(crate::api::upstream::proxy))
        .with_state(state)
}
