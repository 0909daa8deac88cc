//! Coordinated graceful shutdown.
//!
//! Cleanup handlers are registered at startup. When shutdown begins they all
//! run concurrently. Each one races its own deadline and the whole batch
//! races a global one. A hung or failing handler is reported and left
//! behind. It never holds up its siblings.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

type CleanupFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Cleanup = Box<dyn FnOnce() -> CleanupFuture + Send>;

pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Sigint,
    Sigterm,
    /// A thread panicked.
    Panic,
    /// A supervised background task failed or panicked.
    TaskFailure,
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShutdownReason::Panic | ShutdownReason::TaskFailure)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownReason::Sigint => "SIGINT",
            ShutdownReason::Sigterm => "SIGTERM",
            ShutdownReason::Panic => "panic",
            ShutdownReason::TaskFailure => "task_failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("shutdown handler {0} is already registered")]
    DuplicateHandler(String),
    #[error("cannot register {0}: shutdown already in progress")]
    AlreadyShuttingDown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct HandlerReport {
    pub name: String,
    pub outcome: HandlerOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub handlers: Vec<HandlerReport>,
    /// True when the global deadline fired before every handler settled.
    pub global_timeout: bool,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }

    pub fn all_completed(&self) -> bool {
        !self.global_timeout
            && self
                .handlers
                .iter()
                .all(|h| h.outcome == HandlerOutcome::Completed)
    }
}

struct HandlerEntry {
    name: String,
    cleanup: Cleanup,
    timeout: Duration,
}

pub struct ShutdownManager {
    is_shutting_down: AtomicBool,
    handlers: Mutex<Vec<HandlerEntry>>,
    global_timeout: Duration,
}

impl ShutdownManager {
    pub fn new(global_timeout: Duration) -> Self {
        Self {
            is_shutting_down: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            global_timeout,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn handler_names(&self) -> Vec<String> {
        let handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        handlers.iter().map(|h| h.name.clone()).collect()
    }

    /// Register a cleanup step. `timeout` defaults to [`DEFAULT_HANDLER_TIMEOUT`].
    pub fn register_handler<F, Fut>(
        &self,
        name: impl Into<String>,
        cleanup: F,
        timeout: Option<Duration>,
    ) -> Result<(), ShutdownError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.is_shutting_down() {
            return Err(ShutdownError::AlreadyShuttingDown(name));
        }
        let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        if handlers.iter().any(|h| h.name == name) {
            return Err(ShutdownError::DuplicateHandler(name));
        }
        tracing::debug!(handler = %name, "registered shutdown handler");
        handlers.push(HandlerEntry {
            name,
            cleanup: Box::new(move || Box::pin(cleanup())),
            timeout: timeout.unwrap_or(DEFAULT_HANDLER_TIMEOUT),
        });
        Ok(())
    }

    /// Run every handler once. Returns `None` when a shutdown is already in
    /// progress.
    pub async fn run(&self, reason: ShutdownReason) -> Option<ShutdownReport> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%reason, "shutdown already in progress");
            return None;
        }

        let entries = {
            let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *handlers)
        };
        tracing::info!(%reason, handlers = entries.len(), "starting graceful shutdown");
        let start = Instant::now();

        let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        // One slot per handler, filled the moment that handler settles.
        let slots: Arc<Mutex<Vec<Option<HandlerReport>>>> =
            Arc::new(Mutex::new(vec![None; entries.len()]));
        let supervisors: Vec<_> = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                let slots = slots.clone();
                tokio::spawn(async move {
                    let report = run_handler(e).await;
                    lock_slots(&slots)[i] = Some(report);
                })
            })
            .collect();

        let wait_all = async {
            for (i, handle) in supervisors.into_iter().enumerate() {
                if let Err(join) = handle.await {
                    lock_slots(&slots)[i] = Some(HandlerReport {
                        name: names[i].clone(),
                        outcome: HandlerOutcome::Failed(join.to_string()),
                        elapsed: start.elapsed(),
                    });
                }
            }
        };
        let global_timeout = tokio::time::timeout(self.global_timeout, wait_all)
            .await
            .is_err();
        if global_timeout {
            tracing::error!(
                timeout_ms = self.global_timeout.as_millis() as u64,
                "global shutdown deadline reached"
            );
        }

        let settled = std::mem::take(&mut *lock_slots(&slots));
        let reports: Vec<HandlerReport> = names
            .into_iter()
            .zip(settled)
            .map(|(name, slot)| {
                slot.unwrap_or_else(|| HandlerReport {
                    name,
                    outcome: HandlerOutcome::TimedOut,
                    elapsed: start.elapsed(),
                })
            })
            .collect();

        let report = ShutdownReport {
            reason,
            handlers: reports,
            global_timeout,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            %reason,
            elapsed_ms = report.elapsed.as_millis() as u64,
            clean = report.all_completed(),
            "shutdown finished"
        );
        Some(report)
    }

    /// Run the handlers and terminate the process. A no-op when another
    /// shutdown is already running.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        if let Some(report) = self.run(reason).await {
            std::process::exit(report.exit_code());
        }
    }
}

fn lock_slots(
    slots: &Mutex<Vec<Option<HandlerReport>>>,
) -> std::sync::MutexGuard<'_, Vec<Option<HandlerReport>>> {
    slots.lock().unwrap_or_else(|p| p.into_inner())
}

async fn run_handler(entry: HandlerEntry) -> HandlerReport {
    let HandlerEntry {
        name,
        cleanup,
        timeout,
    } = entry;
    let start = Instant::now();
    // Own task so a handler that overstays its deadline keeps running in the
    // background instead of being dropped mid-cleanup.
    let task = tokio::spawn(cleanup());
    let outcome = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => HandlerOutcome::Completed,
        Ok(Ok(Err(e))) => HandlerOutcome::Failed(format!("{e:#}")),
        Ok(Err(join)) => HandlerOutcome::Failed(join.to_string()),
        Err(_) => HandlerOutcome::TimedOut,
    };
    let elapsed = start.elapsed();
    match &outcome {
        HandlerOutcome::Completed => tracing::info!(
            handler = %name,
            elapsed_ms = elapsed.as_millis() as u64,
            "handler completed"
        ),
        HandlerOutcome::Failed(reason) => tracing::error!(handler = %name, %reason, "handler failed"),
        HandlerOutcome::TimedOut => tracing::warn!(
            handler = %name,
            timeout_ms = timeout.as_millis() as u64,
            "handler exceeded its timeout"
        ),
    }
    HandlerReport {
        name,
        outcome,
        elapsed,
    }
}
