use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use mailgen_engine::admission;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, HandlerState};

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How often idle identities are dropped from admission state.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate-email", post(handlers::generate_email))
        .route("/api/send-email", post(handlers::send_email))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, start serving, and start the admission sweep.
pub async fn start(config: ServerConfig, state: HandlerState) -> Result<ServerHandle, std::io::Error> {
    let cancel = CancellationToken::new();
    let handler_state = Arc::new(state);

    let sweep = admission::start_sweep_task(
        Arc::clone(&handler_state.admission),
        config.sweep_interval,
        cancel.child_token(),
    );

    let router = build_router(AppState { handler_state });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "mailgen server started");

    let shutdown = cancel.child_token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        cancel,
        server,
        sweep,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    sweep: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, drain in-flight requests, and stop the
    /// sweep task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.server.await;
        let _ = self.sweep.await;
        tracing::info!("mailgen server stopped");
    }
}
