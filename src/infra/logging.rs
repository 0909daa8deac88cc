use std::future::Future;
use std::time::Instant;

use crate::core::error::TypedError;

pub fn init() {
    // Initialize tracing subscriber once, honoring RUST_LOG if set.
    // Default to info level; allow override via RUST_LOG (e.g., "debug").
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Record one latency sample as both a histogram and a trace line.
pub fn record_latency(operation: &str, outcome: &'static str, elapsed_ms: f64) {
    metrics::histogram!(
        "operation_duration_ms",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .record(elapsed_ms);
    tracing::debug!(operation, outcome, elapsed_ms, "operation timing");
}

/// Await `fut` and record how long it took, tagged by success or failure.
pub async fn with_timing<T, Fut>(operation: &str, fut: Fut) -> Result<T, TypedError>
where
    Fut: Future<Output = Result<T, TypedError>>,
{
    let start = Instant::now();
    let out = fut.await;
    let outcome = if out.is_ok() { "ok" } else { "error" };
    record_latency(operation, outcome, start.elapsed().as_secs_f64() * 1000.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }

    #[tokio::test]
    async fn with_timing_passes_results_through() {
        let ok = with_timing("t.ok", async { Ok::<_, TypedError>(5) }).await;
        assert_eq!(ok.unwrap(), 5);
        let err = with_timing("t.err", async { Err::<(), _>(TypedError::unknown("x")) }).await;
        assert_eq!(err.unwrap_err().message(), "x");
    }
}
