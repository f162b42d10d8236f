use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ghost_listmonk_connector::api::{self, AppState};
use ghost_listmonk_connector::config::AppConfig;
use ghost_listmonk_connector::executor::{ActionRunner, Dispatcher, TokioSpawner};
use ghost_listmonk_connector::listmonk::{ListmonkClient, MarketingApi};
use ghost_listmonk_connector::logs::{ActivityLog, ExecutionLogger, WebhookLogger};
use ghost_listmonk_connector::pipeline::WebhookProcessor;
use ghost_listmonk_connector::queue::{PersistentQueue, WorkerPool};
use ghost_listmonk_connector::sons::SonService;
use ghost_listmonk_connector::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "connector.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ghost-listmonk-connector");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| {
                format!("Failed to open database at {}", config.database_path.display())
            })?,
    );

    // ── Listmonk and logging ─────────────────────────────────────────────
    let listmonk: Arc<dyn MarketingApi> = Arc::new(
        ListmonkClient::new(&config.listmonk).context("Failed to build Listmonk client")?,
    );
    let executions = Arc::new(ExecutionLogger::new(db.clone(), config.stats_cache_ttl));
    let webhook_logs = Arc::new(WebhookLogger::new(db.clone()));
    let activity = Arc::new(ActivityLog::new(db.clone()));

    // ── Action queue ─────────────────────────────────────────────────────
    let queue = Arc::new(PersistentQueue::new(db.clone()));
    queue
        .recover_stale()
        .await
        .context("Failed to recover in-flight tasks")?;

    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), executions.clone()));
    let runner = Arc::new(ActionRunner::new(listmonk.clone(), executions.clone()));
    let pool = Arc::new(WorkerPool::new(queue, runner, config.queue.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = pool.spawn(shutdown_rx);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let processor = Arc::new(WebhookProcessor::new(
        db.clone(),
        dispatcher,
        Arc::new(TokioSpawner),
    ));
    let sons = Arc::new(SonService::new(db.clone(), activity.clone()));

    let state = AppState {
        db,
        processor,
        sons,
        webhook_logs,
        executions,
        activity,
        listmonk,
        http: reqwest::Client::new(),
        frontend_url: config.frontend_url.clone(),
        webhook_max_age: config.webhook_max_age,
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = workers.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }
    info!("Shutdown complete");
    Ok(())
}
