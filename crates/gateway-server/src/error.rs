use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use gateway_core::AgentError;
use thiserror::Error;

/// Errors surfaced by gateway handlers.
///
/// Server-side failures are logged in full and answered with a generic body;
/// their details never reach the client.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Agent creation failed: {0}")]
    AgentCreation(#[source] AgentError),

    #[error("Agent failed: {0}")]
    Agent(#[source] AgentError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Configuration(_)
            | GatewayError::AgentCreation(_)
            | GatewayError::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            GatewayError::Unauthorized => "Unauthorized".to_string(),
            GatewayError::SessionNotFound(_) => self.to_string(),
            _ => {
                tracing::error!("{}", self);
                "Internal Server Error".to_string()
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
