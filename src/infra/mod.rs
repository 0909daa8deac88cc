pub mod boot;
pub mod config;
pub mod context;
pub mod error_metrics;
pub mod http_app;
pub mod logging;
pub mod http {
    pub mod headers;
    pub mod json;
}
pub mod runtime;
pub mod shutdown;
pub mod signals;
