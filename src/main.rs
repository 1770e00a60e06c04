//! comics-gateway server entry point.
//!
//! Picks the backend from `DATABASE_URL`, starts the store, the health
//! checker and the Axum HTTP server, and tears them down in that reverse
//! order on Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use comics_gateway::api;
use comics_gateway::app_state::AppState;
use comics_gateway::config::ServiceConfig;
use comics_gateway::context::QueryContext;
use comics_gateway::db::{OtelTracingProvider, TracingProvider};
use comics_gateway::health::{HealthChecker, Pinger};
use comics_gateway::persistence::{
    ComicBackend, ComicStore, MemoryBackend, PostgresBackend, ResilientComicStore,
};
use comics_gateway::telemetry;

/// Upper bound on waiting for checked-out connections at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    let telemetry = telemetry::init(&config.telemetry)?;
    tracing::info!(
        addr = %config.listen_addr,
        memory_backend = config.uses_memory_backend(),
        otlp = telemetry.exporting(),
        "starting comics-gateway"
    );

    let result = run(&config).await;
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "comics-gateway stopped with an error");
    }
    telemetry.shutdown();
    result
}

async fn run(config: &ServiceConfig) -> anyhow::Result<()> {
    let tracer: Arc<dyn TracingProvider> =
        Arc::new(OtelTracingProvider::global("comics-gateway"));
    let ctx = QueryContext::background();

    if config.uses_memory_backend() {
        let store =
            ResilientComicStore::connect(MemoryBackend::new(), config.pool.clone(), tracer, &ctx)
                .await?;
        return serve(Arc::new(store), config).await;
    }

    let backend = PostgresBackend::from_url(&config.database_url, config.migrations_dir.clone())?;
    let store = ResilientComicStore::connect(backend, config.pool.clone(), tracer, &ctx)
        .await
        .context("connecting to PostgreSQL")?;
    if config.run_migrations {
        store
            .backend()
            .run_migrations()
            .await
            .context("applying migrations")?;
    }
    serve(Arc::new(store), config).await
}

async fn serve<B: ComicBackend>(
    store: Arc<ResilientComicStore<B>>,
    config: &ServiceConfig,
) -> anyhow::Result<()> {
    let health = Arc::new(HealthChecker::new(
        Arc::clone(&store) as Arc<dyn Pinger>,
        config.health.clone(),
    ));
    health.start();

    let app = api::app(AppState {
        store: Arc::clone(&store) as Arc<dyn ComicStore>,
        health: Arc::clone(&health),
        request_timeout: config.request_timeout,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("draining: stopping health checker and closing the pool");
    health.stop().await;
    if let Err(err) = store.close(&QueryContext::with_timeout(CLOSE_TIMEOUT)).await {
        tracing::warn!(error = %err, "pool did not close cleanly");
    }
    let snapshot = store.metrics_snapshot();
    tracing::info!(
        total_queries = snapshot.total_queries,
        failed_queries = snapshot.failed_queries,
        total_retries = snapshot.total_retries,
        "store closed"
    );

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
