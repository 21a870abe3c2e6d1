use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    delete_all, delete_range, delete_samples, disable_point, enable_point, flush, health_check,
    list_points, query_history, store_state, update_state, AppState,
};
use crate::pipeline::Historian;
use crate::store::Store;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8087,
        }
    }
}

/// Build the application router
pub fn build_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Point configuration
        .route("/points", get(list_points))
        .route("/points/:id/enable", post(enable_point))
        .route("/points/:id/disable", post(disable_point))
        // Writes
        .route("/points/:id/state", post(store_state))
        .route("/points/:id/state", put(update_state))
        // Deletes
        .route("/points/:id/delete", post(delete_samples))
        .route("/points/:id/delete-range", post(delete_range))
        .route("/points/:id/history", delete(delete_all))
        // History reads
        .route("/points/:id/history/query", post(query_history))
        // Buffer control
        .route("/flush", post(flush))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server over an already-started historian.
pub async fn run_server<S: Store>(
    historian: Arc<Historian<S>>,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState {
        historian: Arc::clone(&historian),
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting historian server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    historian.shutdown().await;
    tracing::info!("Historian server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("Shutdown signal received, stopping workers...");
}
