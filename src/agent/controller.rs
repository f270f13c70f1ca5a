//! Agent - one conversational unit bound to a prompt, a model and tools
//!
//! An agent invocation runs the model ↔ tool sub-loop: call the model, execute
//! every requested tool call in order, feed the results back, and repeat until
//! the model answers without tool calls. The finished turn is then handed to
//! the lifecycle hook together with Shared State.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use crate::durable::{StepError, StepRunner};
use crate::metrics::LLM_CALL_TIME;
use crate::ollama::{
    parse_tool_calls_from_text, ChatMessage, ChatRequest, ModelBackend, ReasoningEffort,
};
use crate::state::SharedState;
use crate::tools::{ToolExecutor, TOOL_NAMES};

use super::completion::LifecycleHook;

/// Default system prompt for the coding agent
pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = r#"You are a senior software engineer working in a sandboxed environment.

Tools:
- terminal: run shell commands (install packages, inspect the project)
- createOrUpdateFiles: write files; paths are relative to the project root
- readFiles: read files back

Guidelines:
- Always write files with createOrUpdateFiles, never by echoing into the terminal
- Read a file before changing it if you are unsure of its contents
- If a command fails, read the error and fix it

When the task is fully complete, reply exactly once with:

<task_summary>
A short, high-level summary of what was created or changed.
</task_summary>"#;

/// Default ceiling on model calls within one turn
pub const DEFAULT_MAX_MODEL_CALLS: usize = 50;

/// Configuration for an agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name the router uses to select this agent
    pub name: String,
    /// Model to use (e.g., "gpt-oss:20b")
    pub model: String,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Reasoning effort forwarded to the backend
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Auxiliary tool-discovery endpoint forwarded to the backend
    pub tool_discovery_url: Option<String>,
    /// Model calls allowed in one turn before it is ended
    pub max_model_calls: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "code-agent".to_string(),
            model: "gpt-oss:20b".to_string(),
            system_prompt: None,
            reasoning_effort: Some(ReasoningEffort::Medium),
            tool_discovery_url: None,
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }
}

/// Everything one agent invocation produced
#[derive(Debug, Clone, Default)]
pub struct AgentTurn {
    /// Name of the agent that produced the turn
    pub agent: String,
    /// Assistant and tool messages in the order they were produced
    pub messages: Vec<ChatMessage>,
    /// Number of model calls made
    pub model_calls: usize,
    /// Number of tool calls executed
    pub tool_calls: usize,
}

impl AgentTurn {
    /// Last assistant message that carries text and no tool calls
    pub fn last_text_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant() && !m.has_tool_calls() && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }
}

/// Error type for agent operations
#[derive(Debug)]
pub enum AgentError {
    /// A durable step (model call or tool call) failed for good
    Step(StepError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Step(e) => write!(f, "Agent step failed: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<StepError> for AgentError {
    fn from(e: StepError) -> Self {
        AgentError::Step(e)
    }
}

/// An agent bound to a model backend and the sandbox tools
pub struct Agent {
    config: AgentConfig,
    backend: Arc<dyn ModelBackend>,
    tools: ToolExecutor,
    hook: Option<Box<dyn LifecycleHook>>,
}

impl Agent {
    /// Create a new agent
    ///
    /// # Arguments
    /// * `config` - Agent configuration
    /// * `backend` - Model backend used for every model call
    /// * `tools` - Tool executor bound to the run's sandbox
    pub fn new(config: AgentConfig, backend: Arc<dyn ModelBackend>, tools: ToolExecutor) -> Self {
        Self {
            config,
            backend,
            tools,
            hook: None,
        }
    }

    /// Install the hook invoked after every finished turn
    pub fn with_hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_SYSTEM_PROMPT)
    }

    /// Run one full turn
    ///
    /// # Arguments
    /// * `conversation` - Prior conversation, starting with the user prompt
    /// * `state` - Shared State of the run
    /// * `steps` - Step runner of the run
    ///
    /// # Returns
    /// The turn's messages after the lifecycle hook has seen them
    pub async fn run(
        &self,
        conversation: &[ChatMessage],
        state: &mut SharedState,
        steps: &mut StepRunner,
    ) -> Result<AgentTurn, AgentError> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt()));
        messages.extend_from_slice(conversation);

        let mut turn = AgentTurn {
            agent: self.config.name.clone(),
            ..AgentTurn::default()
        };
        let step_name = format!("model:{}", self.config.name);

        // The iteration cap only counts turns, so a model that keeps asking for
        // tools is stopped here. A turn ended this way has no final text
        // message and the hook sees no summary.
        loop {
            if turn.model_calls >= self.config.max_model_calls {
                warn!(
                    run_id = %state.run_id,
                    agent = %self.config.name,
                    max_model_calls = self.config.max_model_calls,
                    "Ending turn at model call ceiling"
                );
                break;
            }
            turn.model_calls += 1;

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: ToolExecutor::tools(),
                reasoning_effort: self.config.reasoning_effort,
                tool_discovery: self.config.tool_discovery_url.clone(),
                stream: false,
            };

            let llm_span = info_span!(
                "llm_call",
                run_id = %state.run_id,
                agent = %self.config.name,
                call = turn.model_calls,
                model = %self.config.model,
                otel.name = "llm_call"
            );

            let call_start = Instant::now();
            let response = steps
                .run(&step_name, || {
                    let backend = self.backend.clone();
                    let request = request.clone();
                    async move { backend.chat(&request).await }
                })
                .instrument(llm_span)
                .await?;

            let call_duration_secs = call_start.elapsed().as_secs_f64();
            LLM_CALL_TIME
                .with_label_values(&[&self.config.model])
                .observe(call_duration_secs);
            info!(
                run_id = %state.run_id,
                call = turn.model_calls,
                duration_ms = call_duration_secs * 1000.0,
                "LLM call completed"
            );

            let mut message = response.message;

            // Check for tool calls - try native format first, then fallback to text parsing
            let tool_calls = message
                .tool_calls
                .clone()
                .filter(|tc| !tc.is_empty())
                .unwrap_or_else(|| parse_tool_calls_from_text(&message.content, TOOL_NAMES));

            if tool_calls.is_empty() {
                // No tool calls - turn is done
                message.tool_calls = None;
                messages.push(message.clone());
                turn.messages.push(message);
                break;
            }

            message.tool_calls = Some(tool_calls.clone());
            messages.push(message.clone());
            turn.messages.push(message);

            for tool_call in &tool_calls {
                turn.tool_calls += 1;
                let result = self.tools.execute(tool_call, state, steps).await?;
                let tool_message = ChatMessage::tool(tool_call.function.name.clone(), result);
                messages.push(tool_message.clone());
                turn.messages.push(tool_message);
            }
        }

        info!(
            run_id = %state.run_id,
            agent = %self.config.name,
            model_calls = turn.model_calls,
            tool_calls = turn.tool_calls,
            "Agent turn completed"
        );

        Ok(match &self.hook {
            Some(hook) => hook.on_finish(turn, state),
            None => turn,
        })
    }
}
