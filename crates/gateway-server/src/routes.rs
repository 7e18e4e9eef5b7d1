//! HTTP handlers.
//!
//! `POST /chat?stream=true` answers `200` with one `{"token": ...}` line per
//! token. The status is sent before the agent runs, so a stream that closes
//! without a single line means the turn failed upstream. The cause is logged
//! at `warn`.

use crate::error::GatewayError;
use crate::state::AppState;
use crate::stream;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use gateway_core::config::AgentConfig;
use gateway_core::types::ChatRequest;
use gateway_core::{AgentError, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Tokens buffered between the agent and a slow client.
const TOKEN_BUFFER: usize = 32;

// ── Liveness ────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(say_hello))
}

async fn say_hello() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Hello World" }))
}

// ── Bot name ────────────────────────────────────────────────────────────

pub fn bot_routes() -> Router<AppState> {
    Router::new().route("/botname", get(bot_name))
}

#[derive(Debug, Serialize)]
struct BotName {
    name: String,
    model: String,
}

/// Builds a throwaway agent on every call; the registry is not consulted.
/// Tools stay off so the product catalog is never loaded here.
async fn bot_name(State(state): State<AppState>) -> Result<Json<BotName>, GatewayError> {
    let config = AgentConfig {
        use_tools: false,
        ..state.agent_config()
    };
    let agent = state
        .registry
        .factory()
        .create(&config)
        .await
        .map_err(GatewayError::AgentCreation)?;

    Ok(Json(BotName {
        name: agent.name().to_string(),
        model: agent.model().to_string(),
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    #[serde(default)]
    stream: bool,
}

async fn chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    let config = state.agent_config();
    let session = state
        .registry
        .resolve(&req.session_id, &config)
        .await
        .map_err(GatewayError::AgentCreation)?;

    if query.stream {
        return Ok(stream_reply(session, req.human_say));
    }

    let _turn = session.begin_turn().await;
    let reply = session
        .agent()
        .invoke(&req.human_say)
        .await
        .map_err(GatewayError::Agent)?;
    Ok(Json(reply).into_response())
}

/// Run the turn on its own task and pipe its tokens into the response body.
fn stream_reply(session: Arc<Session>, utterance: String) -> Response {
    let (tx, rx) = mpsc::channel(TOKEN_BUFFER);

    tokio::spawn(async move {
        let _turn = session.begin_turn().await;
        match session.agent().stream_invoke(&utterance, tx).await {
            Ok(()) => debug!(session_id = session.id(), "Stream completed"),
            Err(AgentError::Cancelled) => {
                debug!(session_id = session.id(), "Client disconnected mid-stream")
            }
            Err(e) => warn!(session_id = session.id(), "Streaming turn failed: {}", e),
        }
    });

    stream::ndjson_response(rx)
}

// ── Sessions ────────────────────────────────────────────────────────────

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/sessions/{session_id}", delete(close_session))
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    if state.registry.close(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::SessionNotFound(session_id))
    }
}
