//! Single entry point that runs an operation under retry, circuit breaking
//! and a per-attempt deadline.
//!
//! Composition, outermost first: `retry -> circuit breaker -> timeout -> op`.
//! Every attempt passes through the breaker and gets its own deadline, so a
//! timed-out attempt counts as a breaker failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::error::TypedError;
use crate::infra::error_metrics::ErrorCollector;
use crate::infra::logging::with_timing;
use crate::infra::runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::infra::runtime::retry::{self, RetryConfig};
use crate::infra::runtime::timeout;

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub operation_name: String,
    pub timeout: Duration,
    pub retry: Option<RetryConfig>,
    pub circuit: Option<CircuitBreakerConfig>,
    pub enable_circuit_breaker: bool,
}

impl ExecuteOptions {
    pub fn new(operation_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation_name: operation_name.into(),
            timeout,
            retry: None,
            circuit: None,
            enable_circuit_breaker: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.enable_circuit_breaker = false;
        self
    }
}

pub struct ResilientExecutor {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    errors: Arc<ErrorCollector>,
}

impl ResilientExecutor {
    pub fn new(errors: Arc<ErrorCollector>) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            errors,
        }
    }

    /// Breaker for `name`, created with `config` on first use. Later configs
    /// for the same name are ignored.
    pub fn breaker(&self, name: &str, config: Option<&CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, config.cloned().unwrap_or_default()))
            })
            .clone()
    }

    pub fn breaker_names(&self) -> Vec<String> {
        let breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<_> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute<T, F, Fut>(&self, mut op: F, options: ExecuteOptions) -> Result<T, TypedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TypedError>> + Send + 'static,
        T: Send + 'static,
    {
        let name = options.operation_name.as_str();
        let retry_config = options.retry.clone().unwrap_or_default();
        let breaker = options
            .enable_circuit_breaker
            .then(|| self.breaker(name, options.circuit.as_ref()));
        let deadline = options.timeout;

        // Admission is decided before `op` runs so an open breaker never
        // invokes the caller's closure.
        let attempt = || {
            let admitted = match &breaker {
                Some(b) => b.try_acquire(),
                None => Ok(()),
            };
            let fut = admitted.map(|()| op());
            let breaker = breaker.clone();
            async move {
                let out = timeout::execute(fut?, deadline, name).await;
                if let Some(b) = breaker {
                    b.record(&out);
                }
                out
            }
        };

        let result = with_timing(name, retry::execute(attempt, name, &retry_config)).await;
        if let Err(e) = &result {
            e.log(name);
            self.errors.record_error(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorCategory;
    use crate::infra::runtime::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> ResilientExecutor {
        ResilientExecutor::new(Arc::new(ErrorCollector::new()))
    }

    fn quick_retry(attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let ex = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = ex
            .execute(
                move || {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(TypedError::network("flaky"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                ExecuteOptions::new("exec.flaky", Duration::from_millis(200))
                    .with_retry(quick_retry(3)),
            )
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ex.errors.metrics().is_empty());
    }

    #[tokio::test]
    async fn each_attempt_gets_a_fresh_timeout() {
        let ex = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = ex
            .execute(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<Result<(), TypedError>>()
                },
                ExecuteOptions::new("exec.hung", Duration::from_millis(20))
                    .with_retry(quick_retry(2))
                    .without_circuit_breaker(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ex.breaker_names().is_empty());
    }

    #[tokio::test]
    async fn terminal_failures_are_recorded() {
        let ex = executor();
        let _ = ex
            .execute(
                || async { Err::<(), _>(TypedError::authorization("nope")) },
                ExecuteOptions::new("exec.denied", Duration::from_millis(50))
                    .with_retry(quick_retry(3)),
            )
            .await;
        let m = ex.errors.metrics();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].key, "AUTHORIZATION:AUTHORIZATION_DENIED");
    }

    #[tokio::test]
    async fn breakers_are_cached_per_operation_name() {
        let ex = executor();
        let first = ex.breaker("a", None);
        let again = ex.breaker(
            "a",
            Some(&CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            }),
        );
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.config().failure_threshold, 5);
        let _ = ex.breaker("b", None);
        assert_eq!(ex.breaker_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn timeouts_count_toward_the_breaker_and_open_it() {
        let ex = executor();
        let circuit = CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_requests: 2,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
        };
        let err = ex
            .execute(
                || std::future::pending::<Result<(), TypedError>>(),
                ExecuteOptions::new("exec.breaker", Duration::from_millis(10))
                    .with_retry(quick_retry(5))
                    .with_circuit(circuit),
            )
            .await
            .unwrap_err();
        // Two timeouts open the circuit; the third attempt is rejected fast
        // and the rejection is not retryable.
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(ex.breaker("exec.breaker", None).state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_is_shared_with_later_callers() {
        let ex = executor();
        let circuit = CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_requests: 1,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
        };
        let _ = ex
            .execute(
                || async { Err::<(), _>(TypedError::validation("bad")) },
                ExecuteOptions::new("exec.shared", Duration::from_millis(50))
                    .with_retry(quick_retry(1))
                    .with_circuit(circuit),
            )
            .await;

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = ex
            .execute(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, TypedError>(()) }
                },
                ExecuteOptions::new("exec.shared", Duration::from_millis(50))
                    .with_retry(quick_retry(3)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
