use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use httpmock::prelude::*;
use resilient_gateway::clients::upstream::{Upstream, UpstreamClient};
use resilient_gateway::core::error::{ErrorCategory, TypedError};
use resilient_gateway::infra::config::UpstreamConfig;
use resilient_gateway::infra::error_metrics::ErrorCollector;
use resilient_gateway::infra::runtime::executor::{ExecuteOptions, ResilientExecutor};
use resilient_gateway::infra::runtime::retry::RetryConfig;
use resilient_gateway::infra::shutdown::{HandlerOutcome, ShutdownManager, ShutdownReason};

fn quick_retry(attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(attempts)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
        .with_jitter(false)
}

fn client(base: String) -> Arc<UpstreamClient> {
    Arc::new(
        UpstreamClient::from_config(&UpstreamConfig {
            base_url: base,
            ..UpstreamConfig::default()
        })
        .unwrap(),
    )
}

async fn fetch(
    ex: &ResilientExecutor,
    up: Arc<UpstreamClient>,
    path: &'static str,
    options: ExecuteOptions,
) -> Result<serde_json::Value, TypedError> {
    ex.execute(
        move || {
            let up = up.clone();
            async move { up.get_json(path).await }
        },
        options,
    )
    .await
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
    });
    let errors = Arc::new(ErrorCollector::new());
    let ex = ResilientExecutor::new(errors.clone());

    let err = fetch(
        &ex,
        client(server.base_url()),
        "/missing",
        ExecuteOptions::new("it.missing", Duration::from_secs(2)).with_retry(quick_retry(3)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Resource);
    m.assert_hits(1);
    assert_eq!(errors.metrics()[0].key, "RESOURCE:RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn server_errors_use_every_attempt() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET).path("/unstable");
        then.status(502).body("bad gateway");
    });
    let errors = Arc::new(ErrorCollector::new());
    let ex = ResilientExecutor::new(errors.clone());

    let err = fetch(
        &ex,
        client(server.base_url()),
        "/unstable",
        ExecuteOptions::new("it.unstable", Duration::from_secs(2))
            .with_retry(quick_retry(3))
            .without_circuit_breaker(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "UPSTREAM_SERVER_ERROR");
    m.assert_hits(3);
    assert_eq!(errors.total(), 1);
}

#[tokio::test]
async fn timeout_abandons_but_does_not_cancel() {
    let ex = ResilientExecutor::new(Arc::new(ErrorCollector::new()));
    let finished = Arc::new(AtomicBool::new(false));
    let f = finished.clone();

    let err = ex
        .execute(
            move || {
                let f = f.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    f.store(true, Ordering::SeqCst);
                    Ok::<_, TypedError>(())
                }
            },
            ExecuteOptions::new("it.slow", Duration::from_millis(30))
                .with_retry(quick_retry(1))
                .without_circuit_breaker(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert!(!finished.load(Ordering::SeqCst));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn shutdown_survives_a_hung_handler() {
    let mgr = ShutdownManager::new(Duration::from_millis(5_000));
    let completed = Arc::new(AtomicU32::new(0));
    for name in ["flush-queue", "close-pool"] {
        let completed = completed.clone();
        mgr.register_handler(
            name,
            move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        )
        .unwrap();
    }
    mgr.register_handler(
        "stuck",
        || std::future::pending::<anyhow::Result<()>>(),
        Some(Duration::from_millis(100)),
    )
    .unwrap();

    let start = Instant::now();
    let report = mgr.run(ShutdownReason::Sigterm).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert!(!report.global_timeout);
    assert_eq!(report.exit_code(), 0);

    let stuck = report.handlers.iter().find(|h| h.name == "stuck").unwrap();
    assert_eq!(stuck.outcome, HandlerOutcome::TimedOut);
    assert_eq!(
        report
            .handlers
            .iter()
            .filter(|h| h.outcome == HandlerOutcome::Completed)
            .count(),
        2
    );

    assert!(mgr.run(ShutdownReason::Sigint).await.is_none());
}

#[tokio::test]
async fn fatal_reasons_exit_non_zero() {
    let mgr = ShutdownManager::new(Duration::from_millis(500));
    mgr.register_handler("noop", || async { Ok(()) }, None).unwrap();
    let report = mgr.run(ShutdownReason::TaskFailure).await.unwrap();
    assert_eq!(report.exit_code(), 1);
    assert!(report.all_completed());
}
