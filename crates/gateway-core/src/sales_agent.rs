use crate::agent::{Agent, AgentFactory, AgentSetup};
use crate::catalog::{ProductCatalog, ProductSearchTool};
use crate::config::{AgentConfig, ProviderConfig};
use crate::error::AgentError;
use crate::tool_registry::ToolRegistry;
use crate::types::{Message, Reply, Role, ToolCall, ToolOutput, ToolSchema};

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Maximum number of tool-calling iterations before we force a text response.
const MAX_TOOL_ITERATIONS: usize = 5;

/// An OpenAI-backed sales agent holding one conversation.
pub struct SalesAgent {
    client: Client<OpenAIConfig>,
    setup: AgentSetup,
    model_name: String,
    use_tools: bool,
    provider: ProviderConfig,
    tools: ToolRegistry,
    history: Mutex<Vec<Message>>,
}

impl SalesAgent {
    pub fn new(
        setup: AgentSetup,
        model_name: impl Into<String>,
        provider: ProviderConfig,
        tools: ToolRegistry,
    ) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&provider.api_base)
            .with_api_key(
                provider
                    .api_key
                    .clone()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );

        Self {
            client: Client::with_config(openai_config),
            setup,
            model_name: model_name.into(),
            use_tools: !tools.is_empty(),
            provider,
            tools,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Number of messages recorded so far.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    fn reply(&self, response: String, last_tool: Option<(ToolCall, ToolOutput)>) -> Reply {
        let (tool, tool_input, action_output) = match last_tool {
            Some((call, output)) => (Some(call.name), Some(call.arguments), Some(output.content)),
            None => (None, None, None),
        };
        Reply {
            bot_name: self.setup.salesperson_name.clone(),
            response,
            tool,
            tool_input,
            action_output,
            model_name: self.model_name.clone(),
        }
    }

    /// Convert the persona prompt plus history to async-openai request messages.
    fn build_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.setup.system_prompt(self.use_tools))
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut result = vec![ChatCompletionRequestMessage::System(system)];
        for msg in messages {
            result.push(to_openai_message(msg)?);
        }
        Ok(result)
    }

    fn openai_tools(schemas: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, AgentError> {
        schemas
            .iter()
            .map(|s| {
                let func = FunctionObjectArgs::default()
                    .name(&s.name)
                    .description(&s.description)
                    .parameters(s.parameters.clone())
                    .build()
                    .map_err(|e| AgentError::Schema(format!("function '{}': {}", s.name, e)))?;
                ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(func)
                    .build()
                    .map_err(|e| AgentError::Schema(format!("tool '{}': {}", s.name, e)))
            })
            .collect()
    }

    /// Run one tool call, turning bad arguments into an error output for the model.
    async fn run_tool(&self, tc: &ToolCall) -> ToolOutput {
        if !self.tools.contains(&tc.name) {
            return ToolOutput {
                tool_call_id: tc.id.clone(),
                content: format!("Tool not allowed: {}", tc.name),
                is_error: true,
            };
        }
        match serde_json::from_str(&tc.arguments) {
            Ok(args) => self.tools.execute(&tc.name, &tc.id, args).await,
            Err(e) => ToolOutput {
                tool_call_id: tc.id.clone(),
                content: format!("Invalid JSON arguments: {}", e),
                is_error: true,
            },
        }
    }
}

#[async_trait]
impl Agent for SalesAgent {
    fn name(&self) -> &str {
        &self.setup.salesperson_name
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    async fn invoke(&self, utterance: &str) -> Result<Reply, AgentError> {
        let mut history = self.history.lock().await;
        let user_msg = Message::user(utterance);

        let mut running_messages = self.build_openai_messages(&history)?;
        running_messages.push(to_openai_message(&user_msg)?);

        let tools = Self::openai_tools(&self.tools.schemas())?;
        // Tool exchange of this turn; committed to history only on success.
        let mut turn = vec![user_msg];
        let mut last_tool = None;

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            debug!("Agent turn iteration {}", iteration);

            let mut request_builder = CreateChatCompletionRequestArgs::default();
            request_builder
                .model(&self.model_name)
                .messages(running_messages.clone())
                .temperature(self.provider.temperature)
                .max_completion_tokens(self.provider.max_tokens);
            if !tools.is_empty() {
                request_builder.tools(tools.clone());
            }
            let request = request_builder
                .build()
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            let choice = response
                .choices
                .first()
                .ok_or_else(|| AgentError::Provider("No choices in response".into()))?;
            let content = choice.message.content.clone().unwrap_or_default();

            if let Some(tool_calls) = &choice.message.tool_calls {
                if !tool_calls.is_empty() {
                    let assistant_openai = ChatCompletionRequestAssistantMessageArgs::default()
                        .content(&*content)
                        .tool_calls(tool_calls.clone())
                        .build()
                        .map_err(|e| AgentError::Provider(e.to_string()))?;
                    running_messages.push(ChatCompletionRequestMessage::Assistant(assistant_openai));

                    let our_tool_calls: Vec<ToolCall> = tool_calls
                        .iter()
                        .map(|tc| ToolCall {
                            id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        })
                        .collect();
                    turn.push(Message::assistant_with_tool_calls(&content, our_tool_calls.clone()));

                    for tc in our_tool_calls {
                        info!(tool = %tc.name, "Agent invoked tool");
                        let output = self.run_tool(&tc).await;

                        let tool_msg = Message::tool_result(&tc.id, &output.content);
                        running_messages.push(to_openai_message(&tool_msg)?);
                        turn.push(tool_msg);
                        last_tool = Some((tc, output));
                    }
                    continue;
                }
            }

            history.extend(turn);
            history.push(Message::assistant(&content));
            return Ok(self.reply(content, last_tool));
        }

        warn!("Hit max tool iterations ({}), giving up on this turn", MAX_TOOL_ITERATIONS);
        let fallback = "Sorry, I could not find an answer to that.".to_string();
        history.extend(turn);
        history.push(Message::assistant(&fallback));
        Ok(self.reply(fallback, last_tool))
    }

    async fn stream_invoke(
        &self,
        utterance: &str,
        tokens: mpsc::Sender<String>,
    ) -> Result<(), AgentError> {
        let mut history = self.history.lock().await;
        let user_msg = Message::user(utterance);

        let mut messages = self.build_openai_messages(&history)?;
        messages.push(to_openai_message(&user_msg)?);

        // Tools are not offered on the streaming path.
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.provider.temperature)
            .max_completion_tokens(self.provider.max_tokens)
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut produced = String::new();
        let outcome = 'stream: loop {
            let next = tokio::select! {
                _ = tokens.closed() => break 'stream Err(AgentError::Cancelled),
                next = stream.next() => next,
            };
            let chunk = match next {
                None => break 'stream Ok(()),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break 'stream Err(AgentError::Provider(e.to_string())),
            };
            for choice in chunk.choices {
                let Some(text) = choice.delta.content else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                produced.push_str(&text);
                if tokens.send(text).await.is_err() {
                    break 'stream Err(AgentError::Cancelled);
                }
            }
        };

        // Keep whatever the client saw so the next turn has context.
        if outcome.is_ok() || !produced.is_empty() {
            history.push(user_msg);
            history.push(Message::assistant(produced));
        }
        outcome
    }
}

fn to_openai_message(msg: &Message) -> Result<ChatCompletionRequestMessage, AgentError> {
    let message = match msg.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(|e| AgentError::Provider(e.to_string()))?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(|e| AgentError::Provider(e.to_string()))?,
        ),
        Role::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(msg.content.as_str());
            if let Some(tool_calls) = &msg.tool_calls {
                let tc_openai: Vec<ChatCompletionMessageToolCall> = tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: async_openai::types::FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();
                builder.tool_calls(tc_openai);
            }
            ChatCompletionRequestMessage::Assistant(
                builder
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?,
            )
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.as_deref().unwrap_or(""))
                .content(msg.content.as_str())
                .build()
                .map_err(|e| AgentError::Provider(e.to_string()))?,
        ),
    };
    Ok(message)
}

/// Builds [`SalesAgent`]s against an OpenAI-compatible endpoint.
pub struct OpenAiAgentFactory {
    provider: ProviderConfig,
}

impl OpenAiAgentFactory {
    pub fn new(provider: ProviderConfig) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AgentFactory for OpenAiAgentFactory {
    async fn create(&self, config: &AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
        if config.model_name.trim().is_empty() {
            return Err(AgentError::Config("model name must not be empty".into()));
        }

        let setup = AgentSetup::load(&config.config_path).await?;

        let mut tools = ToolRegistry::new();
        if config.use_tools {
            let catalog = ProductCatalog::load(&config.product_catalog_path).await?;
            debug!(
                "Loaded {} catalog entries from {}",
                catalog.len(),
                config.product_catalog_path.display()
            );
            tools.register(Arc::new(ProductSearchTool::new(Arc::new(catalog))));
        }

        info!(
            name = %setup.salesperson_name,
            model = %config.model_name,
            tools = tools.len(),
            "Created sales agent"
        );
        Ok(Arc::new(SalesAgent::new(
            setup,
            config.model_name.clone(),
            self.provider.clone(),
            tools,
        )))
    }
}
