//! Run workflow - one end-to-end execution for a single user request
//!
//! A run is a sequence of durable steps around the agent network:
//!
//! ```text
//! get-sandbox-id → network loop (model + tool steps) → get-sandbox-url → save-result
//! ```
//!
//! After the loop the result is classified: a run without a summary or without
//! files is an error, whatever the network's terminal status was. Error runs
//! persist only the generic message; diagnostics stay in the log.

use std::path::{Component, Path};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::{Agent, AgentConfig, CompletionDetector};
use crate::config::{RunConfig, SandboxBackend};
use crate::durable::{FileJournal, JournalStore, MemoryJournal, StepError, StepRunner};
use crate::metrics::RUNS_TOTAL;
use crate::network::{Network, NetworkError, NetworkStatus, SingleAgentRouter};
use crate::ollama::{ChatClient, ModelBackend};
use crate::sandbox::local::LocalSandboxProvider;
use crate::sandbox::remote::RemoteSandboxProvider;
use crate::sandbox::SandboxProvider;
use crate::state::{FileSet, SharedState};
use crate::store::{FileMessageStore, Fragment, MessageRecord, MessageStore, StoreError};
use crate::tools::ToolExecutor;

/// Message persisted for every failed run
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Title of the fragment attached to successful results
pub const FRAGMENT_TITLE: &str = "Fragment";

/// Event that triggers a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// User prompt seeding the conversation
    pub value: String,
    pub project_id: String,
}

impl RunEvent {
    pub fn new(value: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            project_id: project_id.into(),
        }
    }
}

/// What a finished run returns to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: FileSet,
    pub summary: Option<String>,
    /// Terminal status of the network loop
    pub halted_by_limit: bool,
    /// Whether the persisted message was the error message
    pub is_error: bool,
}

/// Error type for a run
#[derive(Debug)]
pub enum RunError {
    /// Run id unusable as a journal name
    InvalidRunId(String),
    /// Project id unusable as a store directory name
    InvalidProjectId(String),
    /// Step journal could not be opened
    Journal(std::io::Error),
    /// A workflow-level step failed for good
    Step(StepError),
    /// The network loop failed
    Network(NetworkError),
    /// The message store could not be opened
    Store(StoreError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::InvalidRunId(id) => write!(f, "Invalid run id: {}", id),
            RunError::InvalidProjectId(id) => write!(f, "Invalid project id: {}", id),
            RunError::Journal(e) => write!(f, "Failed to open step journal: {}", e),
            RunError::Step(e) => write!(f, "{}", e),
            RunError::Network(e) => write!(f, "{}", e),
            RunError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<StepError> for RunError {
    fn from(e: StepError) -> Self {
        RunError::Step(e)
    }
}

impl From<NetworkError> for RunError {
    fn from(e: NetworkError) -> Self {
        RunError::Network(e)
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Store(e)
    }
}

/// Everything a run needs: sandbox provisioning, model backend, persistence
pub struct Workflow {
    provider: Arc<dyn SandboxProvider>,
    backend: Arc<dyn ModelBackend>,
    store: Arc<dyn MessageStore>,
    config: RunConfig,
}

impl Workflow {
    /// Create a workflow from explicit collaborators
    ///
    /// # Arguments
    /// * `provider` - Sandbox provisioning
    /// * `backend` - Model backend shared by every agent
    /// * `store` - Where the final message is persisted
    /// * `config` - Run configuration
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn MessageStore>,
        config: RunConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            store,
            config,
        }
    }

    /// Create a workflow with the concrete collaborators named by `config`
    pub fn from_config(config: RunConfig) -> Result<Self, RunError> {
        let provider: Arc<dyn SandboxProvider> = match &config.sandbox {
            SandboxBackend::Local { root, templates_dir } => {
                let provider = LocalSandboxProvider::new(root.clone(), config.command_timeout);
                match templates_dir {
                    Some(dir) => Arc::new(provider.with_templates(dir.clone())),
                    None => Arc::new(provider),
                }
            }
            SandboxBackend::Remote { base_url, domain } => {
                Arc::new(RemoteSandboxProvider::new(base_url.clone(), domain.clone()))
            }
        };
        let backend = Arc::new(ChatClient::new(config.ollama_url.clone()));
        let store = Arc::new(FileMessageStore::new(&config.store_dir).map_err(StoreError::from)?);

        Ok(Self::new(provider, backend, store, config))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Build the single-agent network bound to one sandbox
    pub fn network(&self, sandbox_id: &str) -> Network {
        let agent_config = AgentConfig {
            name: self.config.agent_name.clone(),
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            reasoning_effort: self.config.reasoning_effort,
            tool_discovery_url: self.config.tool_discovery_url.clone(),
            max_model_calls: self.config.max_model_calls_per_turn,
        };
        let tools = ToolExecutor::new(self.provider.clone(), sandbox_id);
        let agent = Agent::new(agent_config, self.backend.clone(), tools)
            .with_hook(CompletionDetector::default());

        Network::new(
            vec![agent],
            SingleAgentRouter::new(self.config.agent_name.clone()),
            self.config.max_iterations,
        )
    }

    /// Run (or resume) a run
    ///
    /// # Arguments
    /// * `event` - Prompt and project
    /// * `run_id` - Existing run to resume; a fresh id is generated if None
    pub async fn run(&self, event: RunEvent, run_id: Option<String>) -> Result<RunOutput, RunError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        if !is_single_component(&run_id) {
            return Err(RunError::InvalidRunId(run_id));
        }
        if !is_single_component(&event.project_id) {
            return Err(RunError::InvalidProjectId(event.project_id));
        }

        let journal: Box<dyn JournalStore> = match &self.config.journal_dir {
            Some(dir) => Box::new(FileJournal::open(dir, &run_id).map_err(RunError::Journal)?),
            None => Box::new(MemoryJournal::new()),
        };
        let mut steps = StepRunner::new(run_id, journal, self.config.retry_policy());

        self.execute(event, &mut steps).await
    }

    /// Run every workflow step through `steps`
    ///
    /// Steps already in the runner's journal are replayed instead of executed.
    /// A project id that is not a single path component is rejected before
    /// any step runs.
    pub async fn execute(&self, event: RunEvent, steps: &mut StepRunner) -> Result<RunOutput, RunError> {
        if !is_single_component(&event.project_id) {
            return Err(RunError::InvalidProjectId(event.project_id));
        }
        let run_id = steps.run_id().to_string();
        let span = info_span!(
            "run",
            run_id = %run_id,
            project_id = %event.project_id,
            otel.name = "run"
        );

        let result = self.execute_steps(&event, steps).instrument(span).await;

        match &result {
            Ok(output) => {
                let outcome = if output.is_error { "error" } else { "result" };
                RUNS_TOTAL.with_label_values(&[outcome]).inc();
            }
            Err(e) => {
                RUNS_TOTAL.with_label_values(&["failed"]).inc();
                error!(run_id = %run_id, error = %e, "Run failed");
            }
        }
        result
    }

    async fn execute_steps(&self, event: &RunEvent, steps: &mut StepRunner) -> Result<RunOutput, RunError> {
        let run_id = steps.run_id().to_string();
        println!("[RUN] {} started for project {}", run_id, event.project_id);

        let sandbox_id: String = steps
            .run("get-sandbox-id", || {
                let provider = self.provider.clone();
                let template_id = self.config.template_id.clone();
                async move { provider.create(&template_id).await }
            })
            .await?;
        info!(run_id = %run_id, sandbox_id = %sandbox_id, "Sandbox ready");

        let outcome = self
            .network(&sandbox_id)
            .run(&event.value, SharedState::new(run_id.clone()), steps)
            .await?;

        let sandbox_url: String = steps
            .run("get-sandbox-url", || {
                let provider = self.provider.clone();
                let sandbox_id = sandbox_id.clone();
                let port = self.config.app_port;
                async move {
                    let sandbox = provider.connect(&sandbox_id).await?;
                    let host = sandbox.exposed_host(port).await?;
                    Ok::<_, crate::sandbox::SandboxError>(format!("https://{}", host))
                }
            })
            .await?;

        let halted_by_limit = outcome.status == NetworkStatus::HaltedByLimit;
        let (files, summary) = outcome.state.into_parts();
        let is_error = summary.as_deref().map_or(true, str::is_empty) || files.is_empty();

        let record = if is_error {
            warn!(
                run_id = %run_id,
                has_summary = summary.is_some(),
                files = files.len(),
                halted_by_limit,
                "Run finished without a usable result"
            );
            MessageRecord::error(run_id.clone(), event.project_id.clone(), GENERIC_ERROR_MESSAGE)
        } else {
            MessageRecord::result(
                run_id.clone(),
                event.project_id.clone(),
                summary.clone().unwrap_or_default(),
                Fragment {
                    sandbox_url: sandbox_url.clone(),
                    title: FRAGMENT_TITLE.to_string(),
                    files: files.clone(),
                },
            )
        };

        let _saved: MessageRecord = steps
            .run("save-result", || {
                let store = self.store.clone();
                let record = record.clone();
                async move { store.save(&record).map(|_| record) }
            })
            .await?;

        println!(
            "[RUN] {} finished: {} ({} files, {} iterations)",
            run_id,
            if is_error { "ERROR" } else { "RESULT" },
            files.len(),
            outcome.iterations
        );

        Ok(RunOutput {
            run_id,
            sandbox_url,
            title: FRAGMENT_TITLE.to_string(),
            files,
            summary,
            halted_by_limit,
            is_error,
        })
    }
}

fn is_single_component(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
