//! Bounded retry with exponential backoff and jitter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::core::error::TypedError;

pub type RetryPredicate = Arc<dyn Fn(&TypedError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryConfig {
    /// Total invocations, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub is_retryable: RetryPredicate,
}

impl RetryConfig {
    /// Two quick attempts for latency-sensitive paths.
    pub fn light() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Critical operations that should try harder before giving up.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&TypedError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(f);
        self
    }

    /// Deterministic delay after `attempt` (1-indexed) fails, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exp);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor)
            .min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(nanos.max(0.0).round() as u64).min(self.max_delay)
    }

    /// Delay actually slept after `attempt` fails.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let scale = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::try_from_secs_f64(base.as_secs_f64() * scale)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
            is_retryable: Arc::new(TypedError::is_retryable),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. The last error is returned as-is.
pub async fn execute<T, F, Fut>(mut op: F, name: &str, config: &RetryConfig) -> Result<T, TypedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TypedError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    tracing::debug!(operation = name, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) => {
                if attempt >= max_attempts || !(config.is_retryable)(&e) {
                    tracing::debug!(
                        operation = name,
                        attempt,
                        retryable = e.is_retryable(),
                        "giving up"
                    );
                    return Err(e);
                }
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    code = e.code(),
                    "attempt failed, retrying"
                );
                metrics::counter!("retry_attempts_total", "operation" => name.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(attempts)
            .with_delays(Duration::from_millis(10), Duration::from_millis(50))
            .with_jitter(false)
    }

    #[test]
    fn jittered_delay_stays_within_max_for_huge_bounds() {
        let mut cfg = RetryConfig::default()
            .with_delays(Duration::from_secs(u64::MAX / 2), Duration::MAX);
        cfg.backoff_factor = 10.0;
        for attempt in [1, 2, 40, u32::MAX] {
            for _ in 0..50 {
                assert!(cfg.delay_for(attempt) <= Duration::MAX);
            }
        }

        let capped = cfg.with_delays(Duration::from_secs(8), Duration::from_secs(10));
        for _ in 0..200 {
            let d = capped.delay_for(3);
            assert!(d >= Duration::from_secs(6) && d <= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn it_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = execute(
            || {
                let c = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if c < 3 {
                        Err(TypedError::network("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            },
            "test.op",
            &fast(5),
        )
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let err = execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TypedError::authentication("bad token")) }
            },
            "test.op",
            &fast(5),
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.message(), "bad token");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_last_error() {
        let calls = AtomicU32::new(0);
        let err = execute(
            || {
                let c = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(TypedError::network(format!("attempt {c}"))) }
            },
            "test.op",
            &fast(3),
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.message(), "attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_overrides_error_flag() {
        let calls = AtomicU32::new(0);
        let cfg = fast(4).with_predicate(|_| false);
        let _ = execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TypedError::network("retryable by default")) }
            },
            "test.op",
            &cfg,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_the_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let _ = execute(
            || async { Err::<(), _>(TypedError::timeout("slow")) },
            "test.op",
            &fast(3),
        )
        .await;
        // 10ms after the first failure, 20ms after the second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(40), "{elapsed:?}");
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let cfg = RetryConfig::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(1_000))
            .with_jitter(false);
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(4), Duration::from_millis(800));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(cfg.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_a_quarter_and_under_max() {
        let cfg = RetryConfig::default()
            .with_delays(Duration::from_millis(400), Duration::from_millis(1_000))
            .with_jitter(true);
        for _ in 0..200 {
            let d = cfg.delay_for(1);
            assert!(d >= Duration::from_millis(300) && d <= Duration::from_millis(500));
            let capped = cfg.delay_for(3);
            assert!(capped >= Duration::from_millis(750) && capped <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn profiles_are_ordered_by_effort() {
        let light = RetryConfig::light();
        let standard = RetryConfig::default();
        let aggressive = RetryConfig::aggressive();
        assert_eq!(light.max_attempts, 2);
        assert!(light.max_attempts < standard.max_attempts);
        assert!(standard.max_attempts < aggressive.max_attempts);
        assert!(light.max_delay < standard.max_delay);
        assert_eq!(RetryConfig::default().with_max_attempts(0).max_attempts, 1);
    }
}
