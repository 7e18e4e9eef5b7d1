use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable selecting the deployment environment.
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
/// Shared bearer secret checked in protected mode.
pub const ENV_AUTH_KEY: &str = "AUTH_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
pub const ENV_PRODUCT_CATALOG: &str = "PRODUCT_CATALOG";
pub const ENV_GPT_MODEL: &str = "GPT_MODEL";
pub const ENV_USE_TOOLS: &str = "USE_TOOLS_IN_API";

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentDefaults,
    pub provider: ProviderConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration from default path (~/.config/sales-gateway/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sales-gateway")
            .join("config.toml")
    }

    /// Apply process-wide environment overrides. Called once at startup.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// `ENVIRONMENT=production` forces protected mode; `AUTH_KEY` and
    /// `OPENAI_API_KEY` replace the file values when present.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if is_production(&lookup) {
            self.server.mode = SecurityMode::Protected;
        }
        if let Some(key) = lookup(ENV_AUTH_KEY) {
            self.server.auth_key = Some(key);
        }
        if let Some(key) = lookup(ENV_OPENAI_API_KEY) {
            self.provider.api_key = Some(key);
        }
    }
}

/// Whether `ENVIRONMENT` names a production deployment.
pub fn is_production(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup(ENV_ENVIRONMENT).as_deref() == Some("production")
}

/// Parse a boolean flag the way `USE_TOOLS_IN_API` is interpreted.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "t")
}

/// Security posture of the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Gated endpoints are served without credentials (local/dev).
    #[default]
    Open,
    /// Gated endpoints require `Authorization: Bearer <auth_key>`.
    Protected,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    pub mode: SecurityMode,
    /// Shared bearer secret. Required in protected mode.
    pub auth_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            mode: SecurityMode::Open,
            auth_key: None,
        }
    }
}

/// Defaults for new agents. Environment variables override each field at
/// the moment a session's agent is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Persona/setup JSON file.
    pub config_path: PathBuf,
    pub product_catalog: PathBuf,
    pub model: String,
    pub use_tools: bool,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("demos/example_agent_setup.json"),
            product_catalog: PathBuf::from("demos/sample_product_catalog.txt"),
            model: "gpt-3.5-turbo-0613".into(),
            use_tools: true,
        }
    }
}

/// LLM provider configuration shared by every agent in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    pub api_key: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Session registry limits. Leaving both limits unset keeps every session
/// for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Evict sessions idle for longer than this many seconds.
    pub idle_ttl_secs: Option<u64>,
    /// Maximum number of live sessions; the least recently used is evicted.
    pub max_sessions: Option<usize>,
    /// How often the idle sweeper runs.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: None,
            max_sessions: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Immutable configuration captured when a session's agent is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub config_path: PathBuf,
    pub product_catalog_path: PathBuf,
    pub model_name: String,
    pub use_tools: bool,
}

impl AgentConfig {
    /// Resolve from the defaults and the current process environment.
    pub fn resolve(defaults: &AgentDefaults) -> Self {
        Self::resolve_with(defaults, |key| std::env::var(key).ok())
    }

    /// Resolve from the defaults, letting `lookup` override individual fields.
    pub fn resolve_with(defaults: &AgentDefaults, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            config_path: lookup(ENV_CONFIG_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| defaults.config_path.clone()),
            product_catalog_path: lookup(ENV_PRODUCT_CATALOG)
                .map(PathBuf::from)
                .unwrap_or_else(|| defaults.product_catalog.clone()),
            model_name: lookup(ENV_GPT_MODEL).unwrap_or_else(|| defaults.model.clone()),
            use_tools: lookup(ENV_USE_TOOLS)
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.use_tools),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("gpt-3.5-turbo-0613"));
        assert!(toml_str.contains("mode = \"open\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = AppConfig::default();
        config.session.max_sessions = Some(10);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.model, config.agent.model);
        assert_eq!(parsed.session.max_sessions, Some(10));
        assert_eq!(parsed.server.mode, SecurityMode::Open);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[server]\nmode = \"protected\"\n").unwrap();
        assert_eq!(parsed.server.mode, SecurityMode::Protected);
        assert_eq!(parsed.server.port, 8000);
        assert!(parsed.agent.use_tools);
    }

    #[test]
    fn test_production_environment_forces_protected_mode() {
        let mut config = AppConfig::default();
        config.apply_env_with(lookup_from(&[("ENVIRONMENT", "production"), ("AUTH_KEY", "s3cret")]));
        assert_eq!(config.server.mode, SecurityMode::Protected);
        assert_eq!(config.server.auth_key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_non_production_environment_keeps_file_mode() {
        let mut config = AppConfig::default();
        config.apply_env_with(lookup_from(&[("ENVIRONMENT", "staging")]));
        assert_eq!(config.server.mode, SecurityMode::Open);
    }

    #[test]
    fn test_agent_config_env_overrides() {
        let defaults = AgentDefaults::default();
        let config = AgentConfig::resolve_with(
            &defaults,
            lookup_from(&[
                ("GPT_MODEL", "gpt-4o-mini"),
                ("USE_TOOLS_IN_API", "False"),
                ("PRODUCT_CATALOG", "/data/catalog.txt"),
            ]),
        );
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert!(!config.use_tools);
        assert_eq!(config.product_catalog_path, PathBuf::from("/data/catalog.txt"));
        assert_eq!(config.config_path, defaults.config_path);
    }

    #[test]
    fn test_agent_config_defaults_without_env() {
        let defaults = AgentDefaults::default();
        let config = AgentConfig::resolve_with(&defaults, |_| None);
        assert_eq!(config.model_name, "gpt-3.5-turbo-0613");
        assert!(config.use_tools);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True"));
        assert!(parse_flag("1"));
        assert!(parse_flag("t"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("0"));
    }
}
