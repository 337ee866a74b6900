//! Axum server setup and configuration.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::handler::{convert_handler, AppState};

/// Create the main router for the application.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(|| async { "ok" }))
        // Conversion endpoint
        .route("/convert", get(convert_handler))
        // Browser clients call the conversion endpoint directly
        .layer(CorsLayer::permissive())
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run_http_server(config: &Config, router: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;

    info!("Starting HTTP server on {}", config.bind);

    axum::serve(listener, router).await
}
