//! Per-operation circuit breaker.
//!
//! # States
//!
//! - **Closed**: calls pass through and are counted.
//! - **Open**: calls are rejected without running the operation.
//! - **HalfOpen**: the cooldown has passed. The next success closes the
//!   circuit again.
//!
//! Counters live in a fixed monitoring window. When the window expires,
//! `requests` and `failures` are zeroed together. The state is left alone.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::core::error::TypedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window needed to open the circuit.
    pub failure_threshold: u32,
    /// Cooldown after the last failure before probing again.
    pub recovery_timeout: Duration,
    pub monitoring_period: Duration,
    /// Requests within the window before the threshold is considered.
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
            minimum_requests: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub requests: u32,
    pub failures: u32,
    /// Fraction of successful requests in the current window, 1.0 when idle.
    pub success_rate: f64,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    requests: u32,
    failures: u32,
    window_start: Instant,
    last_failure_time: Option<Instant>,
}

impl Inner {
    fn reset_window(&mut self, now: Instant) {
        self.requests = 0;
        self.failures = 0;
        self.window_start = now;
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::debug!(operation = %name, ?config, "creating circuit breaker");
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                requests: 0,
                failures: 0,
                window_start: Instant::now(),
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters are never left half-updated, so poison is ignored.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.update_state(&mut inner, Instant::now());
        inner.state
    }

    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.lock();
        self.update_state(&mut inner, Instant::now());
        let success_rate = if inner.requests == 0 {
            1.0
        } else {
            f64::from(inner.requests.saturating_sub(inner.failures)) / f64::from(inner.requests)
        };
        CircuitStats {
            state: inner.state,
            requests: inner.requests,
            failures: inner.failures,
            success_rate,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Run `op` through the breaker. Rejects without calling `op` while open.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, TypedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TypedError>>,
    {
        self.try_acquire()?;
        let out = op().await;
        self.record(&out);
        out
    }

    /// Admit one call, counting it toward the window. Fails with
    /// `CIRCUIT_OPEN` while open; the caller must then skip the operation.
    pub fn try_acquire(&self) -> Result<(), TypedError> {
        self.before_call()
    }

    /// Feed the outcome of an admitted call back into the breaker.
    pub fn record<T>(&self, outcome: &Result<T, TypedError>) {
        match outcome {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
    }

    fn update_state(&self, inner: &mut Inner, now: Instant) {
        if now.duration_since(inner.window_start) > self.config.monitoring_period {
            inner.reset_window(now);
        }
        if inner.state == CircuitState::Open {
            let cooled = inner
                .last_failure_time
                .map_or(true, |t| now.duration_since(t) > self.config.recovery_timeout);
            if cooled {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn before_call(&self) -> Result<(), TypedError> {
        let mut inner = self.lock();
        self.update_state(&mut inner, Instant::now());
        if inner.state == CircuitState::Open {
            tracing::debug!(operation = %self.name, "circuit open, rejecting call");
            metrics::counter!("circuit_rejections_total", "operation" => self.name.clone())
                .increment(1);
            return Err(TypedError::circuit_open(&self.name));
        }
        inner.requests += 1;
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            let now = Instant::now();
            inner.reset_window(now);
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.last_failure_time = Some(Instant::now());
        if inner.state != CircuitState::Open
            && inner.failures >= self.config.failure_threshold
            && inner.requests >= self.config.minimum_requests
        {
            tracing::warn!(
                operation = %self.name,
                failures = inner.failures,
                requests = inner.requests,
                "failure threshold reached"
            );
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        tracing::info!(operation = %self.name, from = %inner.state, to = %to, "circuit state change");
        metrics::counter!(
            "circuit_state_transitions_total",
            "operation" => self.name.clone(),
            "to" => to.to_string()
        )
        .increment(1);
        inner.state = to;
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
