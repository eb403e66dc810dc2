pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Ingress
        .route("/event", post(routes::events::process_event))
        .route("/api/events", post(routes::events::process_event_verbose))
        // Reflexes
        .route("/api/reflexes", get(routes::reflexes::list_reflexes))
        .route("/api/reflexes", post(routes::reflexes::create_reflex))
        .route(
            "/api/reflexes/validate",
            post(routes::reflexes::validate_reflex),
        )
        .route("/health", get(routes::reflexes::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the event server on `addr` and run until ctrl-c.
pub async fn serve(app_state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(app_state, listener, shutdown_signal()).await
}

/// Serve on a pre-bound listener until `shutdown` resolves. In-flight
/// requests are allowed to finish.
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(app_state);

    tracing::info!("instinct listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("instinct server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
