use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod handlers;
mod load;
mod marker;
mod pool;
mod probe;
mod report;
mod server;

use config::Config;
use load::LoadMetrics;
use pool::PoolRegistry;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: Config,

    /// One lazily built MySQL pool per endpoint role.
    pub pools: PoolRegistry,

    /// Flag checked by every load-driver worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-driver task so stop can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,

    /// Counters + latency histogram for the current load run.
    pub load_metrics: Arc<LoadMetrics>,

    /// Wall-clock anchor for the /health uptime field.
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rpo_harness=info,tower_http=warn")),
        )
        .init();

    let config = Config::from_env().context("reading configuration from environment")?;

    info!(
        service = %config.service_name,
        env = %config.app_env,
        allow_stress = config.allow_stress,
        primary_configured = config.db.host.is_some(),
        remote_reader_configured = config.db.remote_reader_host.is_some(),
        "starting replication-lag harness"
    );

    let state = Arc::new(AppState {
        pools: PoolRegistry::new(config.db.clone()),
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
        load_metrics: Arc::new(LoadMetrics::new()),
        started_at: Instant::now(),
        config,
    });

    let app = server::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
