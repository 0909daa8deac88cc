use crate::core::error::TypedError;
use crate::infra::config::UpstreamConfig;

/// Build the shared upstream client. Redirects are not followed.
pub fn make_http_client(cfg: &UpstreamConfig) -> Result<reqwest::Client, TypedError> {
    reqwest::Client::builder()
        .connect_timeout(cfg.connect_timeout())
        .timeout(cfg.timeout())
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| {
            TypedError::builder(
                crate::core::error::ErrorCategory::Configuration,
                "cannot build upstream http client",
            )
            .cause(e)
            .build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_limits() {
        assert!(make_http_client(&UpstreamConfig::default()).is_ok());
    }
}
