use reqwest::RequestBuilder;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a request id used as the correlation id for one outbound call.
pub fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("rg-{}-{}", now.as_secs(), now.subsec_nanos())
}

pub fn user_agent() -> String {
    format!("resilient-gateway/{}", env!("CARGO_PKG_VERSION"))
}

/// Add the correlation and user-agent headers. Returns the builder and the id used.
pub fn add_standard_headers(
    builder: RequestBuilder,
    request_id: Option<String>,
) -> (RequestBuilder, String) {
    let rid = request_id.unwrap_or_else(generate_request_id);
    let b = builder
        .header(REQUEST_ID_HEADER, rid.as_str())
        .header(reqwest::header::USER_AGENT, user_agent());
    (b, rid)
}
