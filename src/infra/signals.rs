//! Sources that start a shutdown: OS signals, panics and failed background
//! tasks. Each feeds one [`ShutdownReason`] into a shared channel that a
//! single listener drains.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::infra::shutdown::{ShutdownManager, ShutdownReason};

#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<ShutdownReason>,
}

pub struct ShutdownListener {
    rx: mpsc::UnboundedReceiver<ShutdownReason>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ShutdownTrigger { tx }, ShutdownListener { rx })
}

impl ShutdownTrigger {
    pub fn fire(&self, reason: ShutdownReason) {
        if self.tx.send(reason).is_err() {
            tracing::debug!(%reason, "shutdown listener gone; trigger ignored");
        }
    }

    /// Spawn `fut` and report `TaskFailure` if it returns an error or panics.
    pub fn spawn_supervised<Fut>(&self, name: &'static str, fut: Fut) -> tokio::task::JoinHandle<()>
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let trigger = self.clone();
        tokio::spawn(async move {
            match tokio::spawn(fut).await {
                Ok(Ok(())) => tracing::debug!(task = name, "supervised task finished"),
                Ok(Err(e)) => {
                    tracing::error!(task = name, error = %format!("{e:#}"), "supervised task failed");
                    trigger.fire(ShutdownReason::TaskFailure);
                }
                Err(join) => {
                    tracing::error!(task = name, error = %join, "supervised task panicked");
                    trigger.fire(ShutdownReason::TaskFailure);
                }
            }
        })
    }

    /// Chain a panic hook that reports `Panic` after the previous hook ran.
    pub fn install_panic_hook(&self) {
        let trigger = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            trigger.fire(ShutdownReason::Panic);
        }));
    }

    /// Forward SIGINT and SIGTERM into the channel.
    pub fn listen_for_signals(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let trigger = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                #[cfg(unix)]
                let reason = tokio::select! {
                    r = tokio::signal::ctrl_c() => match r {
                        Ok(()) => ShutdownReason::Sigint,
                        Err(e) => {
                            tracing::error!(error = %e, "ctrl-c listener failed");
                            return;
                        }
                    },
                    _ = terminate.recv() => ShutdownReason::Sigterm,
                };
                #[cfg(not(unix))]
                let reason = match tokio::signal::ctrl_c().await {
                    Ok(()) => ShutdownReason::Sigint,
                    Err(e) => {
                        tracing::error!(error = %e, "ctrl-c listener failed");
                        return;
                    }
                };
                tracing::info!(%reason, "received termination signal");
                trigger.fire(reason);
            }
        }))
    }
}

impl ShutdownListener {
    pub async fn next(&mut self) -> Option<ShutdownReason> {
        self.rx.recv().await
    }

    /// Wait for the first trigger and shut down. Exits the process.
    pub async fn run(mut self, manager: Arc<ShutdownManager>) {
        while let Some(reason) = self.next().await {
            manager.shutdown(reason).await;
        }
    }
}
