use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::classify::{classify_from_error_correlated, classify_from_status_correlated};
use crate::core::error::TypedError;
use crate::infra::config::UpstreamConfig;
use crate::infra::http::headers::add_standard_headers;
use crate::infra::runtime::limits::make_http_client;

/// A remote JSON service the gateway forwards calls to.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_json(&self, path: &str) -> Result<Value, TypedError>;
}

#[derive(Clone)]
pub struct UpstreamClient {
    base: String,
    http: Client,
}

impl UpstreamClient {
    pub fn new(base: impl Into<String>, http: Client) -> Self {
        Self {
            base: base.into(),
            http,
        }
    }

    pub fn from_config(cfg: &UpstreamConfig) -> Result<Self, TypedError> {
        Ok(Self::new(cfg.base_url.clone(), make_http_client(cfg)?))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn health(&self) -> bool {
        let (builder, _rid) = add_standard_headers(self.http.get(self.url("/health")), None);
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn get_json(&self, path: &str) -> Result<Value, TypedError> {
        let url = self.url(path);
        let (builder, rid) = add_standard_headers(self.http.get(&url), None);
        tracing::debug!(endpoint = %url, request_id = %rid, "upstream.get request");

        let resp = builder.send().await.map_err(|e| {
            let ctx = format!("GET {url}");
            classify_from_error_correlated(Box::new(e), Some(ctx.as_str()), &rid)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.ok();
            return Err(classify_from_status_correlated(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                body.as_deref(),
                None,
                &rid,
            ));
        }

        resp.json::<Value>().await.map_err(|e| {
            classify_from_error_correlated(Box::new(e), Some("decoding upstream body"), &rid)
        })
    }
}
