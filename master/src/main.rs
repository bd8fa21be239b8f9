mod config;
mod handlers;
mod monitor;
mod state;

use crate::config::MasterConfig;
use crate::state::AppState;
use rollout_common::{ActionManager, ActionQueue, InMemoryActionDb, LoggingFsm};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const AGENT_LOST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rollout_master=debug,rollout_common=debug,tower_http=info")),
        )
        .init();

    let config = MasterConfig::from_env();
    info!(
        "cluster {}, server host {}, tick {:?}, timeout {:?}, {} intentos",
        config.cluster_name,
        config.server_host,
        config.scheduler.sleep_time,
        config.scheduler.action_timeout,
        config.scheduler.max_attempts
    );
    info!(
        "las acciones de server se encolan para {}; levantar un worker con WORKER_HOSTNAME={}",
        config.server_host, config.server_host
    );

    let manager = Arc::new(ActionManager::new(
        Arc::new(InMemoryActionDb::new()),
        Arc::new(ActionQueue::new()),
        Arc::new(LoggingFsm),
        config.scheduler.clone(),
    )?);
    manager.start();

    let state = AppState::new(manager.clone(), config.clone());

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de heartbeats en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::monitor_agents(monitor_state).await;
    });

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("no se pudo escuchar ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("cortando el master");
}
