use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::types::Reply;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A conversational agent bound to one conversation.
///
/// Implementations keep their own conversation history; callers hand over
/// one utterance per turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name of the persona.
    fn name(&self) -> &str;

    /// Model backing this agent.
    fn model(&self) -> &str;

    /// Run one turn and return the complete reply.
    async fn invoke(&self, utterance: &str) -> Result<Reply, AgentError>;

    /// Run one turn, sending reply tokens to `tokens` as they are produced.
    ///
    /// Returns once the reply is complete or as soon as the receiving side
    /// of `tokens` has been dropped.
    async fn stream_invoke(
        &self,
        utterance: &str,
        tokens: mpsc::Sender<String>,
    ) -> Result<(), AgentError>;
}

/// Builds agents from configuration. Errors propagate unmodified.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, config: &AgentConfig) -> Result<Arc<dyn Agent>, AgentError>;
}

/// Persona definition read from `AgentConfig::config_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSetup {
    pub salesperson_name: String,
    pub salesperson_role: String,
    pub company_name: String,
    pub company_business: String,
    pub company_values: String,
    pub conversation_purpose: String,
    pub conversation_type: String,
}

impl Default for AgentSetup {
    fn default() -> Self {
        Self {
            salesperson_name: "Ted Lasso".into(),
            salesperson_role: "Business Development Representative".into(),
            company_name: "Sleep Haven".into(),
            company_business: "Sleep Haven is a premium mattress company that provides \
                customers with the most comfortable and supportive sleeping experience possible."
                .into(),
            company_values: "Our mission at Sleep Haven is to help people achieve a better \
                night's sleep by providing them with the best possible sleep solutions."
                .into(),
            conversation_purpose: "find out whether they are looking to achieve better sleep \
                via buying a premier mattress."
                .into(),
            conversation_type: "call".into(),
        }
    }
}

impl AgentSetup {
    /// Read a setup file. Missing fields fall back to the defaults.
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AgentError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&json).map_err(|source| AgentError::Setup {
            path: path.to_path_buf(),
            source,
        })
    }

    /// System prompt describing the persona.
    pub fn system_prompt(&self, use_tools: bool) -> String {
        let mut prompt = format!(
            "Never forget your name is {name}. You work as a {role}.\n\
             You work at a company named {company}. {company}'s business is the following: {business}\n\
             Company values are the following: {values}\n\
             You are contacting a potential prospect in order to {purpose}\n\
             Your means of contacting the prospect is {kind}.\n\
             Keep your responses short to retain the user's attention. \
             Never produce lists, just answers. Respond in the language the prospect uses.",
            name = self.salesperson_name,
            role = self.salesperson_role,
            company = self.company_name,
            business = self.company_business,
            values = self.company_values,
            purpose = self.conversation_purpose,
            kind = self.conversation_type,
        );
        if use_tools {
            prompt.push_str(
                "\nWhen the prospect asks about products, prices, or availability, \
                 use the product_search tool instead of guessing.",
            );
        }
        prompt
    }
}
