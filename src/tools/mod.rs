//! Tool Executor - the agent's hands inside the sandbox
//!
//! Three tools are exposed to the model:
//!
//! - `terminal` - run a shell command, returns stdout
//! - `createOrUpdateFiles` - write a batch of files, records them in Shared State
//! - `readFiles` - read files back as JSON
//!
//! Every call runs inside its own durable step, so a re-executed run replays
//! finished tool calls instead of repeating them. Failures never escape as
//! errors: they become the tool's string result so the model can react.
//! The only error surfaced to the caller is a [`StepError`] from the journal.
//!
//! ```text
//! ToolCall ──► parse args ──► StepRunner.run(name) ──► provider.connect(id)
//!                                                         │
//!                               string result ◄── sandbox op (+ Shared State)
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::durable::{StepError, StepRunner};
use crate::metrics::TOOL_CALLS;
use crate::ollama::{Tool, ToolCall};
use crate::sandbox::{OutputChunk, SandboxError, SandboxProvider};
use crate::state::{FileSet, SharedState};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// Names of every tool the executor understands
pub const TOOL_NAMES: &[&str] = &[TERMINAL, CREATE_OR_UPDATE_FILES, READ_FILES];

/// A file to write, or a file that was read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

#[derive(Deserialize)]
struct TerminalArgs {
    command: String,
}

#[derive(Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

/// Journaled outcome of a write batch
#[derive(Debug, Serialize, Deserialize)]
enum WriteOutcome {
    /// Every file was written; the complete updated file-set
    Written(FileSet),
    Failed(String),
}

/// Executes tool calls against one run's sandbox
#[derive(Clone)]
pub struct ToolExecutor {
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: String,
}

impl ToolExecutor {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox_id: impl Into<String>) -> Self {
        Self {
            provider,
            sandbox_id: sandbox_id.into(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Tool schemas advertised to the model
    pub fn tools() -> Vec<Tool> {
        vec![
            Tool::function(
                TERMINAL,
                "Use the terminal to run commands",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" }
                    },
                    "required": ["command"]
                }),
            ),
            Tool::function(
                CREATE_OR_UPDATE_FILES,
                "Create or update files in the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": { "type": "string" },
                                    "content": { "type": "string" }
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["files"]
                }),
            ),
            Tool::function(
                READ_FILES,
                "Read files from the sandbox",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["files"]
                }),
            ),
        ]
    }

    /// Execute one tool call and return its result text
    pub async fn execute(
        &self,
        call: &ToolCall,
        state: &mut SharedState,
        steps: &mut StepRunner,
    ) -> Result<String, StepError> {
        let name = call.function.name.as_str();
        let args = call.function.arguments.clone();
        let span = info_span!("tool_call", run_id = %state.run_id, tool = %name, otel.name = "tool_call");

        let result = async {
            match name {
                TERMINAL => match serde_json::from_value::<TerminalArgs>(args) {
                    Ok(a) if a.command.trim().is_empty() => {
                        warn!("Rejecting empty command from model");
                        Ok("Error: command is empty. Please provide a command to run.".to_string())
                    }
                    Ok(a) => self.run_command(&a.command, steps).await,
                    Err(e) => Ok(invalid_arguments(name, e)),
                },
                CREATE_OR_UPDATE_FILES => match serde_json::from_value::<WriteFilesArgs>(args) {
                    Ok(a) => self.write_files(a.files, state, steps).await,
                    Err(e) => Ok(invalid_arguments(name, e)),
                },
                READ_FILES => match serde_json::from_value::<ReadFilesArgs>(args) {
                    Ok(a) => self.read_files(a.files, steps).await,
                    Err(e) => Ok(invalid_arguments(name, e)),
                },
                other => Ok(format!(
                    "Error: unknown tool '{}'. Available tools: {}",
                    other,
                    TOOL_NAMES.join(", ")
                )),
            }
        }
        .instrument(span)
        .await?;

        let status = if is_error_result(&result) { "error" } else { "ok" };
        TOOL_CALLS.with_label_values(&[name, status]).inc();
        Ok(result)
    }

    /// Run a shell command inside the `terminal` step
    pub async fn run_command(&self, command: &str, steps: &mut StepRunner) -> Result<String, StepError> {
        info!(command, "Running command");
        println!("[TOOL] $ {}", command);

        steps
            .run(TERMINAL, || {
                let provider = self.provider.clone();
                let sandbox_id = self.sandbox_id.clone();
                let command = command.to_string();
                async move { Ok::<_, Infallible>(run_command_once(provider, &sandbox_id, &command).await) }
            })
            .await
    }

    /// Write a batch of files inside the `createOrUpdateFiles` step.
    ///
    /// Shared State only takes the new file-set if the whole batch was
    /// written. The returned text is the updated file-set as JSON, or the
    /// error string.
    pub async fn write_files(
        &self,
        files: Vec<FileEntry>,
        state: &mut SharedState,
        steps: &mut StepRunner,
    ) -> Result<String, StepError> {
        info!(count = files.len(), "Writing files");
        for file in &files {
            println!("[TOOL] write {}", file.path);
        }

        let current = state.files().clone();
        let outcome = steps
            .run(CREATE_OR_UPDATE_FILES, || {
                let provider = self.provider.clone();
                let sandbox_id = self.sandbox_id.clone();
                let files = files.clone();
                let current = current.clone();
                async move {
                    let outcome = match write_batch(provider, &sandbox_id, files, current).await {
                        Ok(updated) => WriteOutcome::Written(updated),
                        Err(e) => {
                            warn!(error = %e, "File batch failed");
                            WriteOutcome::Failed(format!("Error: {}", e))
                        }
                    };
                    Ok::<_, Infallible>(outcome)
                }
            })
            .await?;

        match outcome {
            WriteOutcome::Written(updated) => {
                let text = serde_json::to_string(&updated).unwrap_or_default();
                state.replace_files(updated);
                Ok(text)
            }
            WriteOutcome::Failed(message) => Ok(message),
        }
    }

    /// Read files inside the `readFiles` step, returned as a JSON array
    pub async fn read_files(&self, paths: Vec<String>, steps: &mut StepRunner) -> Result<String, StepError> {
        info!(count = paths.len(), "Reading files");

        steps
            .run(READ_FILES, || {
                let provider = self.provider.clone();
                let sandbox_id = self.sandbox_id.clone();
                let paths = paths.clone();
                async move {
                    let text = match read_batch(provider, &sandbox_id, paths).await {
                        Ok(json) => json,
                        Err(e) => format!("Error: {}", e),
                    };
                    Ok::<_, Infallible>(text)
                }
            })
            .await
    }
}

fn invalid_arguments(tool: &str, e: serde_json::Error) -> String {
    format!("Error: invalid arguments for {}: {}", tool, e)
}

fn is_error_result(text: &str) -> bool {
    text.starts_with("Error:") || text.starts_with("Command failed:")
}

/// Execute a command, folding any failure into the returned text
async fn run_command_once(provider: Arc<dyn SandboxProvider>, sandbox_id: &str, command: &str) -> String {
    let mut stdout = String::new();
    let mut stderr = String::new();

    let result = match provider.connect(sandbox_id).await {
        Ok(sandbox) => {
            sandbox
                .run_command(command, &mut |chunk| match chunk {
                    OutputChunk::Stdout(s) => stdout.push_str(&s),
                    OutputChunk::Stderr(s) => stderr.push_str(&s),
                })
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => stdout,
        Err(e) => {
            warn!(error = %e, "Command failed");
            println!("[TOOL] ❌ Command failed: {}", e);
            format!("Command failed: {} \nstdout: {}\nstderr: {}", e, stdout, stderr)
        }
    }
}

/// Write every file, returning `current` merged with the batch
async fn write_batch(
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: &str,
    files: Vec<FileEntry>,
    mut current: FileSet,
) -> Result<FileSet, SandboxError> {
    let sandbox = provider.connect(sandbox_id).await?;
    for file in files {
        sandbox.write_file(&file.path, &file.content).await?;
        current.insert(file.path, file.content);
    }
    Ok(current)
}

async fn read_batch(
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: &str,
    paths: Vec<String>,
) -> Result<String, SandboxError> {
    let sandbox = provider.connect(sandbox_id).await?;
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        let content = sandbox.read_file(&path).await?;
        contents.push(FileEntry { path, content });
    }
    serde_json::to_string(&contents)
        .map_err(|e| SandboxError::Transport(format!("could not encode file contents: {}", e)))
}
