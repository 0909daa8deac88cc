//! HTTP handlers mounted by `infra::http_app`.

pub mod errors;
pub mod upstream;
