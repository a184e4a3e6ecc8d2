//! Router assembly and the server's run loop (spec §4.9, §5 cancellation).

use crate::api::state::AppState;
use crate::api::{middleware as mw, routes};
use crate::config::ServerConfig;
use crate::error::Result;
use axum::middleware;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
}

impl ApiConfig {
    pub fn from_server_config(config: &ServerConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| crate::error::RegistryError::Internal(format!("invalid bind address: {e}")))?;
        Ok(Self { bind_addr })
    }
}

/// Layer order (outermost first): request id, rate limit, admin allowlist,
/// auth context extraction, CORS, tracing, routes.
pub fn build_router(state: AppState) -> axum::Router {
    let cors = mw::cors_layer(&state.config.cors_allowed_origins);
    routes::build_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), mw::auth_context_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::admin_allowlist_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), mw::rate_limit_middleware))
        .layer(middleware::from_fn(mw::request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build state, bind, and serve until SIGINT, draining reaper tasks and
/// closing the metadata store's connection pool on the way out.
pub async fn run(config: ServerConfig) -> Result<()> {
    let api_config = ApiConfig::from_server_config(&config)?;
    let state = AppState::build(config).await?;
    let router = build_router(state.clone());

    let listener = TcpListener::bind(api_config.bind_addr)
        .await
        .map_err(|e| crate::error::RegistryError::Internal(format!("failed to bind {}: {e}", api_config.bind_addr)))?;

    tracing::info!(addr = %api_config.bind_addr, "registry server listening");

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight requests");
        shutdown_signal.cancel();
    })
    .await
    .map_err(|e| crate::error::RegistryError::Internal(format!("server error: {e}")))?;

    tracing::info!("registry server shut down cleanly");
    Ok(())
}
</content>
