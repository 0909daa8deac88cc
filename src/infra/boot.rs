use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::clients::upstream::UpstreamClient;
use crate::infra::config::Config;
use crate::infra::context::ResilienceContext;
use crate::infra::http_app::{build_app, AppState};
use crate::infra::shutdown::ShutdownError;
use crate::infra::signals;

pub const HTTP_SERVER_HANDLER: &str = "http-server";
pub const ERROR_METRICS_HANDLER: &str = "error-metrics";

/// Server-side halves of the drain handshake used by the `http-server` handler.
pub struct Drain {
    pub requested: oneshot::Receiver<()>,
    pub stopped: oneshot::Sender<()>,
}

/// Register the cleanup handlers every gateway process carries. Returns the
/// receiving ends the HTTP server uses to drain.
pub fn register_shutdown_handlers(ctx: &ResilienceContext) -> Result<Drain, ShutdownError> {
    let (request_tx, request_rx) = oneshot::channel::<()>();
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let handler_timeout = Some(ctx.config.shutdown.handler_timeout());

    ctx.shutdown.register_handler(
        HTTP_SERVER_HANDLER,
        move || async move {
            // The server may already be gone; nothing left to drain then.
            if request_tx.send(()).is_err() {
                return Ok(());
            }
            stopped_rx
                .await
                .map_err(|_| anyhow::anyhow!("http server dropped before draining"))
        },
        handler_timeout,
    )?;

    let errors = ctx.errors.clone();
    ctx.shutdown.register_handler(
        ERROR_METRICS_HANDLER,
        move || async move {
            let snapshot = errors.metrics();
            tracing::info!(total = errors.total(), kinds = snapshot.len(), "final error metrics");
            for e in snapshot {
                tracing::info!(key = %e.key, count = e.count, first = %e.first_occurrence, last = %e.last_occurrence, "error metric");
            }
            Ok(())
        },
        handler_timeout,
    )?;

    Ok(Drain {
        requested: request_rx,
        stopped: stopped_tx,
    })
}

pub async fn run_server() -> anyhow::Result<()> {
    let cfg = Config::from_env_and_toml()?;
    cfg.validate()?;
    tracing::info!(
        port = cfg.port,
        environment = %cfg.environment,
        upstream = %cfg.upstream.base_url,
        circuit_breaker = cfg.circuit.enabled,
        "BOOT resilient-gateway"
    );

    let ctx = Arc::new(ResilienceContext::new(cfg));
    let (trigger, listener) = signals::channel();
    trigger.install_panic_hook();
    trigger.listen_for_signals()?;

    let upstream = Arc::new(UpstreamClient::from_config(&ctx.config.upstream)?);
    let app = build_app(AppState::new(ctx.clone(), upstream));
    let drain = register_shutdown_handlers(&ctx)?;

    let addr: SocketAddr = ([0, 0, 0, 0], ctx.config.port).into();
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    trigger.spawn_supervised(HTTP_SERVER_HANDLER, async move {
        let Drain { requested, stopped } = drain;
        axum::serve(tcp, app)
            .with_graceful_shutdown(async move {
                let _ = requested.await;
            })
            .await?;
        let _ = stopped.send(());
        Ok(())
    });

    listener.run(ctx.shutdown.clone()).await;
    Ok(())
}
