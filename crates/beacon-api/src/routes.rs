//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use beacon_core::error::BeaconError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/rules/{id}",
            get(handlers::get_rule)
                .put(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
        .route("/rules/{id}/toggle", post(handlers::toggle_rule))
        .route("/rules/{id}/test", post(handlers::test_rule))
        .route("/stats", get(handlers::stats))
        .route("/executions", get(handlers::list_executions))
        .route("/events", post(handlers::ingest_event))
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn start_server<F>(addr: &str, state: AppState, shutdown: F) -> Result<(), BeaconError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting API server on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
