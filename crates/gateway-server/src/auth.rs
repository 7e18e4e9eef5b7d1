use crate::error::GatewayError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use gateway_core::config::{SecurityMode, ServerConfig};
use subtle::ConstantTimeEq;

/// Bearer-token gate for protected endpoints.
#[derive(Debug, Clone)]
pub struct AuthGate {
    mode: SecurityMode,
    secret: Option<String>,
}

impl AuthGate {
    pub fn new(mode: SecurityMode, secret: Option<String>) -> Self {
        // An empty secret counts as not configured.
        let secret = secret.filter(|s| !s.is_empty());
        Self { mode, secret }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.mode, config.auth_key.clone())
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Check a request's `Authorization` header. Open mode lets everything through.
    pub fn check(&self, presented: Option<&str>) -> Result<(), GatewayError> {
        match self.mode {
            SecurityMode::Open => Ok(()),
            SecurityMode::Protected => authorize(self.secret.as_deref(), presented),
        }
    }
}

/// Require `presented` to equal `Bearer <secret>` exactly.
///
/// A missing secret is an operator error; a missing or different header is
/// the client's. The comparison is constant-time over the full value.
pub fn authorize(secret: Option<&str>, presented: Option<&str>) -> Result<(), GatewayError> {
    let secret =
        secret.ok_or_else(|| GatewayError::Configuration("AUTH_KEY not configured".into()))?;
    let presented = presented.ok_or(GatewayError::Unauthorized)?;

    let expected = format!("Bearer {}", secret);
    if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// Middleware guarding protected routes; runs before any extractor so a
/// rejected request never reaches the session registry.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.auth.check(header) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            if matches!(e, GatewayError::Unauthorized) {
                tracing::debug!("Rejected request to {}", req.uri().path());
            }
            e.into_response()
        }
    }
}
