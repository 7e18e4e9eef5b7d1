pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod sales_agent;
pub mod session;
pub mod tool_registry;
pub mod types;

pub use agent::{Agent, AgentFactory, AgentSetup};
pub use config::{AgentConfig, AppConfig, SecurityMode};
pub use error::AgentError;
pub use sales_agent::{OpenAiAgentFactory, SalesAgent};
pub use session::{Session, SessionLimits, SessionRegistry};
pub use tool_registry::ToolRegistry;
