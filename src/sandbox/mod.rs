//! Sandbox provisioning and access
//!
//! A sandbox is a stateful environment with a filesystem, command execution
//! and network host exposure, owned by exactly one run. The run only keeps the
//! sandbox id; every tool call reconnects through the provider with it.
//!
//! # Backends
//!
//! - [`LocalSandboxProvider`] - a directory per sandbox, commands via `/bin/sh`
//! - [`RemoteSandboxProvider`] - HTTP client for a remote sandbox service

use async_trait::async_trait;

pub mod local;
pub mod remote;

pub use local::{LocalSandbox, LocalSandboxProvider};
pub use remote::{RemoteSandbox, RemoteSandboxProvider};

/// A chunk of streaming output from a command
#[derive(Debug, Clone, PartialEq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Result of a command that exited with status 0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Error type for sandbox operations
#[derive(Debug)]
pub enum SandboxError {
    /// No sandbox exists with this id
    UnknownSandbox(String),
    /// The command ran but exited with a non-zero status
    CommandExit { exit_code: i32 },
    /// The command did not finish within the timeout
    Timeout(std::time::Duration),
    /// The path does not exist in the sandbox
    NotFound(String),
    /// The path escapes the sandbox root or is otherwise unusable
    InvalidPath(String),
    /// Local I/O failure
    Io(std::io::Error),
    /// Transport failure talking to a remote sandbox
    Transport(String),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::UnknownSandbox(id) => write!(f, "Sandbox {} not found", id),
            SandboxError::CommandExit { exit_code } => {
                write!(f, "Command exited with code {}", exit_code)
            }
            SandboxError::Timeout(limit) => write!(f, "Command timed out after {:?}", limit),
            SandboxError::NotFound(path) => write!(f, "File not found: {}", path),
            SandboxError::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            SandboxError::Io(e) => write!(f, "I/O error: {}", e),
            SandboxError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e)
    }
}

impl From<reqwest::Error> for SandboxError {
    fn from(e: reqwest::Error) -> Self {
        SandboxError::Transport(e.to_string())
    }
}

/// Creates sandboxes and reconnects to them by id
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a new sandbox from a template, returning its id
    async fn create(&self, template_id: &str) -> Result<String, SandboxError>;

    /// Connect to an existing sandbox
    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// Handle to one live sandbox
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Run a shell command, streaming output chunks to `on_output` as they
    /// arrive. A non-zero exit is reported as [`SandboxError::CommandExit`]
    /// after all output has been streamed.
    async fn run_command(
        &self,
        command: &str,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> Result<CommandOutput, SandboxError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Public host name under which `port` inside the sandbox is reachable
    async fn exposed_host(&self, port: u16) -> Result<String, SandboxError>;
}
