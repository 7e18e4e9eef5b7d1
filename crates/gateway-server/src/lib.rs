pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;

use axum::middleware;
use axum::Router;
use gateway_core::config::{AppConfig, SecurityMode};
use gateway_core::session::SessionRegistry;
use gateway_core::AgentFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

pub use auth::AuthGate;
pub use error::GatewayError;
pub use state::AppState;

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Gated routes: bearer token required in protected mode.
    let protected = Router::new()
        .merge(routes::bot_routes())
        .merge(routes::chat_routes())
        .merge(routes::session_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // Liveness, never gated.
    let public = Router::new().merge(routes::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Periodically drop idle sessions from the registry.
pub fn spawn_session_sweeper(registry: Arc<SessionRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.evict_idle();
        }
    })
}

/// Start the HTTP server.
pub async fn serve(config: AppConfig, factory: Arc<dyn AgentFactory>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, factory);

    match state.auth.mode() {
        SecurityMode::Open => {
            tracing::warn!("Running in open mode, gated endpoints are unauthenticated!")
        }
        SecurityMode::Protected if !state.auth.has_secret() => {
            tracing::error!("Protected mode without AUTH_KEY, gated endpoints will answer 500")
        }
        SecurityMode::Protected => tracing::info!("Running in protected mode"),
    }

    if state.registry.limits().idle_ttl.is_some() {
        let every = Duration::from_secs(state.config.session.sweep_interval_secs.max(1));
        spawn_session_sweeper(state.registry.clone(), every);
    }

    let router = build_router(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
