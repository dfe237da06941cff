use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use marquee_bus::Manager;

use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Bound on each connection's pending-event queue.
    pub queue_capacity: usize,
    /// Seconds of silence before a stream writer emits a keep-alive ping.
    pub idle_timeout_secs: u64,
    /// Token for admin subscriptions and the broadcast trigger. `None` runs
    /// the server open (development mode).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8750,
            queue_capacity: 256,
            idle_timeout_secs: 30,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub config: Arc<ServerConfig>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(handlers::subscribe))
        .route("/broadcast", post(handlers::broadcast))
        .route("/stats", get(handlers::stats))
        .route("/devices/status", post(handlers::devices_status))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Port 0 binds a random free port.
pub async fn start(config: ServerConfig, manager: Arc<Manager>) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        manager,
        config: Arc::new(config),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(port = local_addr.port(), "marquee server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the serve task alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}
