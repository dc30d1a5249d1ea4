//! HTTP server setup and routing

use crate::api::handlers;
use crate::domain::RequestTypeRegistry;
use crate::error::Result;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppContext {
    pub db: SqlitePool,
    /// Pipeline configuration, loaded once at startup
    pub registry: Arc<RequestTypeRegistry>,
}

pub fn build_router(context: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/submissions", post(handlers::create_submission))
        .route(
            "/submissions/:guid",
            get(handlers::get_submission).delete(handlers::delete_submission),
        )
        .route("/submissions/:guid/process", post(handlers::process_submission))
        .route("/submissions/:guid/cancel", post(handlers::cancel_submission))
        .route("/requests/:guid", get(handlers::get_request))
        .route("/requests/:guid/start", post(handlers::start_request))
        .route("/requests/:guid/pass", post(handlers::pass_request))
        .route("/requests/:guid/fail", post(handlers::fail_request))
        .route(
            "/requests/:guid/change-decision",
            post(handlers::change_decision),
        )
        .route("/requests/:guid/next", get(handlers::next_requests))
        .route("/requests/:guid/ready", get(handlers::request_ready))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}

/// Bind and serve until a shutdown signal arrives
pub async fn run_server(context: AppContext, port: u16) -> Result<()> {
    let app = build_router(context);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
