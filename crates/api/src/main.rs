use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use atrium_api::config::AppConfig;
use atrium_api::router::build_router;
use atrium_api::state::AppState;
use atrium_db::DbPool;
use atrium_events::EventBus;
use atrium_worker::{JobDispatcher, WorkerPool};

const DEFAULT_LOG_FILTER: &str = "atrium_api=debug,atrium_worker=info,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    tracing::info!(
        addr = %config.server.bind_addr,
        mode = ?config.workers.mode,
        concurrency = config.workers.concurrency,
        job_timeout_secs = config.workers.job_timeout.as_secs(),
        output_dir = %config.workers.output_dir.display(),
        "Configuration loaded",
    );

    let pool = open_database(&config.database_url).await;
    let event_bus = Arc::new(EventBus::default());

    let (workers, pool_events) = WorkerPool::from_config(&config.workers, &pool);
    let workers = Arc::new(workers);
    let dispatcher = JobDispatcher::new(
        pool.clone(),
        Arc::clone(&workers),
        Arc::clone(&event_bus),
        config.dispatcher.clone(),
    );
    let stop_dispatcher = CancellationToken::new();
    let dispatcher_task: JoinHandle<()> =
        tokio::spawn(dispatcher.run(pool_events, stop_dispatcher.clone()));

    let app = build_router(AppState::new(pool, workers, event_bus), &config.server);
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {}: {e}", config.server.bind_addr));
    tracing::info!(addr = %config.server.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // New work stops here; running jobs are failed by the dispatcher drain.
    tracing::info!("HTTP server stopped, draining dispatcher");
    stop_dispatcher.cancel();
    match tokio::time::timeout(config.server.shutdown_timeout, dispatcher_task).await {
        Ok(Ok(())) => tracing::info!("Shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "Dispatcher task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Dispatcher did not stop in time",
        ),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect, verify and migrate. Any failure aborts start-up.
async fn open_database(url: &str) -> DbPool {
    let pool = atrium_db::create_pool(url)
        .await
        .expect("Failed to connect to database");
    atrium_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    atrium_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");
    pool
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");

    #[cfg(unix)]
    let signal = tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    };

    #[cfg(not(unix))]
    let signal = tokio::signal::ctrl_c().await.map(|()| "SIGINT");

    match signal {
        Ok(name) => tracing::info!(signal = name, "Shutdown requested"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
