//! Deadline enforcement for async operations.
//!
//! The operation runs as its own task. When the deadline passes first the
//! caller gets a timeout error and the task is left to finish on its own;
//! whatever it eventually produces is dropped.

use std::future::Future;
use std::time::Duration;

use crate::core::error::{ErrorCategory, TypedError};

pub async fn execute<T, Fut>(op: Fut, timeout: Duration, name: &str) -> Result<T, TypedError>
where
    Fut: Future<Output = Result<T, TypedError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(op);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(TypedError::builder(
            ErrorCategory::Unknown,
            format!("operation {name} panicked"),
        )
        .code("OPERATION_PANICKED")
        .cause(join)
        .build()),
        Err(_) => {
            tracing::debug!(
                operation = name,
                timeout_ms = timeout.as_millis() as u64,
                "deadline elapsed"
            );
            Err(timed_out(name, timeout))
        }
    }
}

fn timed_out(name: &str, timeout: Duration) -> TypedError {
    TypedError::builder(
        ErrorCategory::Timeout,
        format!("operation {name} timed out after {}ms", timeout.as_millis()),
    )
    .code("OPERATION_TIMEOUT")
    .context("operation", name)
    .context("timeout_ms", timeout.as_millis() as u64)
    .build()
}
