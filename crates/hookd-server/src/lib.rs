pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use hookd_core::config::Config;
use hookd_core::procedure::Registry;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/hooks", get(routes::hooks::list_hooks))
        .route("/hooks/{id}", post(routes::hooks::trigger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the dispatcher from a validated config.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(config, listener).await
}

/// Start the dispatcher on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so
/// the caller can read the actual port before starting (useful when the
/// configured port is 0 and the OS picks a free one).
pub async fn serve_on(config: Config, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let registry = Registry::from_procedures(config.procedures)?;

    tracing::info!(
        %addr,
        auth = config.auth.name(),
        procedures = registry.len(),
        "hookd dispatcher listening"
    );

    let app = build_router(AppState::new(config.auth, registry));
    axum::serve(listener, app).await?;
    Ok(())
}
