use crate::auth::AuthGate;
use gateway_core::config::{AgentConfig, AppConfig};
use gateway_core::session::{SessionLimits, SessionRegistry};
use gateway_core::AgentFactory;
use std::sync::Arc;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthGate>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, factory: Arc<dyn AgentFactory>) -> Self {
        let auth = AuthGate::from_config(&config.server);
        let registry = SessionRegistry::new(factory, SessionLimits::from(&config.session));

        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            registry: Arc::new(registry),
        }
    }

    /// Agent settings for a session created now.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::resolve(&self.config.agent)
    }
}
