use crate::routes;
use axum::routing::get;
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use worksync_core::{
    Clock, DailySyncScheduler, SourceClient, SqliteSyncRepository, SyncConfig, SyncEngine,
    SyncGate, SyncRepository, SyncService, SystemClock,
};

#[derive(Clone)]
pub struct AppState {
    pub sync: SyncService,
    pub clock: Arc<dyn Clock>,
    /// Parent of every pass token; cancelled on shutdown.
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(sync: SyncService, clock: Arc<dyn Clock>) -> Self {
        Self {
            sync,
            clock,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Composition root: one repository, one engine, one gate shared by every trigger path.
#[tracing::instrument(level = "info", skip(repository, client, clock))]
pub fn build_state_with(
    cfg: &SyncConfig,
    repository: Arc<dyn SyncRepository>,
    client: Arc<dyn SourceClient>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let engine = SyncEngine::new(repository, client, clock.clone())
        .with_page_size(cfg.page_size)
        .with_running_freshness(cfg.running_freshness);
    let sync = SyncService::new(Arc::new(engine), SyncGate::new());
    AppState::new(sync, clock)
}

/// SQLite-backed state at `cfg.database_path` with the system clock.
#[tracing::instrument(level = "info", skip(client))]
pub async fn build_state(
    cfg: &SyncConfig,
    client: Arc<dyn SourceClient>,
) -> anyhow::Result<AppState> {
    let repository = SqliteSyncRepository::open(&cfg.database_path).await?;
    Ok(build_state_with(
        cfg,
        Arc::new(repository),
        client,
        Arc::new(SystemClock),
    ))
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .merge(routes::router())
        .route("/health", get(routes::health::get_health))
        .layer(Extension(state))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Serve HTTP and, when enabled, the daily scheduler until Ctrl-C or `state.cancel`.
#[tracing::instrument(level = "info", skip_all)]
pub async fn serve(cfg: &SyncConfig, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = cfg.http_addr.parse()?;
    let cancel = state.cancel.clone();

    let scheduler_task = if cfg.scheduler_enabled {
        let scheduler =
            DailySyncScheduler::new(state.sync.clone(), state.clock.clone(), cfg.daily_at);
        let token = cancel.child_token();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        tracing::info!("daily sync scheduler disabled (WORKSYNC_SCHEDULER_ENABLED=false)");
        None
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "worksync listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                // Keep serving until cancelled some other way.
                cancel.cancelled().await;
            }
            tracing::info!("shutdown requested");
            cancel.cancel();
        }
    }
}
