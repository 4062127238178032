//! Wires the Store, Session Manager, and HTTP surfaces into a runnable
//! controller. Graceful shutdown closes sessions, drains HTTP, stops the
//! monitor, and closes the Store.

use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uptimemesh_core::Result;
use uptimemesh_store::Store;

use crate::config::ControllerConfig;
use crate::external_addr::ExternalAddressCache;
use crate::session::SessionManager;
use crate::{admin, http_fallback, ws};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionManager,
    pub bootstrap_key: String,
    pub config: Arc<ControllerConfig>,
    pub external_addr: ExternalAddressCache,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/session", get(ws::session_upgrade))
        .route("/health", get(http_fallback::health))
        .route("/agents/checkin", post(http_fallback::checkin))
        .route("/agents/upgrade-key", post(http_fallback::upgrade_key))
        .route("/monitoring/tasks", get(http_fallback::monitoring_tasks))
        .route("/monitoring/results", post(http_fallback::monitoring_results))
        .route("/api/resources", get(admin::list_resources).post(admin::create_resource))
        .route("/api/resources/{id}", delete(admin::delete_resource))
        .route("/api/tasks", get(admin::list_tasks))
        .route("/api/agents", get(admin::list_agents))
        .route("/api/stats", get(admin::stats))
        .route("/api/analytics", get(admin::analytics))
        .route("/api/bootstrap-key", get(admin::bootstrap_key))
        .route("/api/external-address", get(admin::external_address))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically evicts sessions that have gone quiet for longer than
/// `liveness_timeout` — no traffic since the last keepalive.
async fn liveness_sweep(store: Arc<dyn Store>, sessions: SessionManager, liveness_timeout: Duration) {
    let mut ticker = tokio::time::interval(liveness_timeout / 2);
    loop {
        ticker.tick().await;
        for agent_id in sessions.stale_sessions(liveness_timeout).await {
            tracing::info!(agent_id = %agent_id, "evicting stale session");
            sessions.remove(agent_id).await;
            if let Err(e) =
                store.touch_agent(agent_id, uptimemesh_core::AgentStatus::Offline, None, None).await
            {
                tracing::warn!(agent_id = %agent_id, error = %e, "failed to mark stale agent offline");
            }
        }
    }
}

pub async fn run(config: ControllerConfig) -> Result<()> {
    let pool = uptimemesh_store::connect(&config.database_path).await?;
    let store: Arc<dyn Store> = Arc::new(uptimemesh_store::SqliteStore::new(pool));
    let bootstrap_key = uptimemesh_store::keys::read_or_create_bootstrap_key_file(&config.bootstrap_key_path)?;
    let sessions = SessionManager::new(config.session_write_deadline);

    let liveness_timeout = config.liveness_timeout;
    let external_addr = ExternalAddressCache::new(config.remote_ip_cache_ttl);
    let config = Arc::new(config);
    let state = AppState {
        store: store.clone(),
        sessions: sessions.clone(),
        bootstrap_key,
        config: config.clone(),
        external_addr: external_addr.clone(),
    };

    let sweep_handle = tokio::spawn(liveness_sweep(store.clone(), sessions.clone(), liveness_timeout));
    let refresher_cancel = tokio_util::sync::CancellationToken::new();
    let refresher_handle = tokio::spawn(external_addr.run_refresher(refresher_cancel.clone()));

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        uptimemesh_core::MonitorError::validation(format!("invalid bind address '{}': {e}", config.bind_addr))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "controller listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(sessions.clone()));
    // Cancel HTTP listeners with a bounded drain window.
    if tokio::time::timeout(Duration::from_secs(30), serve).await.is_err() {
        tracing::warn!("HTTP drain exceeded 30s, forcing shutdown");
    }

    sweep_handle.abort();
    refresher_cancel.cancel();
    let _ = refresher_handle.await;
    Ok(())
}

async fn shutdown_signal(sessions: SessionManager) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, closing sessions");
    sessions.shutdown_all("controller shutting down").await;
}
