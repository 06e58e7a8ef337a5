//! HTTP API for spawning projects and polling their progress.

pub mod api;

use std::future::Future;

use anyhow::{Context, Result};
use axum::{Router, http::Uri};
use tower_http::cors::CorsLayer;
use tracing::info;

pub use api::{AppState, SharedState, api_router};
use api::ApiError;

/// Network settings for the HTTP listener.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api_router().fallback(not_found).with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn start_server(
    config: ServerConfig,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "nativex API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}
