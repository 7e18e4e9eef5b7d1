use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid agent setup in {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Schema build error: {0}")]
    Schema(String),

    #[error("Cancelled by client")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
