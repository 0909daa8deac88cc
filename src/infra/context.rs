//! Process-wide resilience state, built once at startup and shared by `Arc`.

use std::sync::Arc;

use crate::infra::config::Config;
use crate::infra::error_metrics::ErrorCollector;
use crate::infra::runtime::executor::{ExecuteOptions, ResilientExecutor};
use crate::infra::shutdown::ShutdownManager;

pub struct ResilienceContext {
    pub config: Config,
    pub errors: Arc<ErrorCollector>,
    pub executor: ResilientExecutor,
    pub shutdown: Arc<ShutdownManager>,
}

impl ResilienceContext {
    pub fn new(config: Config) -> Self {
        let errors = Arc::new(ErrorCollector::new());
        let shutdown = Arc::new(ShutdownManager::new(config.shutdown.global_timeout()));
        Self {
            executor: ResilientExecutor::new(errors.clone()),
            errors,
            shutdown,
            config,
        }
    }

    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// Options for an upstream call, derived from the upstream and circuit settings.
    pub fn upstream_options(&self, operation: &str) -> ExecuteOptions {
        let opts = ExecuteOptions::new(operation, self.config.upstream.timeout())
            .with_retry(self.config.upstream.retry_profile.retry_config())
            .with_circuit(self.config.circuit.breaker_config());
        if self.config.circuit.enabled {
            opts
        } else {
            opts.without_circuit_breaker()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TypedError;
    use crate::infra::config::RetryProfile;

    #[tokio::test]
    async fn executor_records_into_the_shared_collector() {
        let ctx = ResilienceContext::new(Config::default());
        let opts = ctx
            .upstream_options("ctx.test")
            .with_retry(RetryProfile::Light.retry_config().with_max_attempts(1));
        let _ = ctx
            .executor
            .execute(|| async { Err::<(), _>(TypedError::resource("gone")) }, opts)
            .await;
        assert_eq!(ctx.errors.total(), 1);
    }

    #[test]
    fn disabled_circuit_bypasses_breakers() {
        let mut cfg = Config::default();
        cfg.circuit.enabled = false;
        cfg.upstream.timeout_ms = 250;
        let ctx = ResilienceContext::new(cfg);
        let opts = ctx.upstream_options("ctx.plain");
        assert!(!opts.enable_circuit_breaker);
        assert_eq!(opts.timeout.as_millis(), 250);
        assert_eq!(opts.retry.unwrap().max_attempts, 3);
    }
}
