//! forgeloop - durable agent orchestration against remote sandboxes
//!
//! This library runs a coding agent to completion inside a sandbox and
//! returns the file-set it produced together with a completion summary.
//!
//! # Modules
//!
//! - `state` - Shared State (`files` + `summary`) threaded through one run
//! - `durable` - Step journal giving at-most-once effects across retries
//! - `sandbox` - Sandbox provisioning traits plus local and HTTP backends
//! - `ollama` - Chat client with tool calling (the model backend)
//! - `tools` - Tool Executor: `terminal`, `createOrUpdateFiles`, `readFiles`
//! - `agent` - Agent sub-loop and the completion detector hook
//! - `network` - Router and the iteration driver
//! - `store` - Persistence of the final chat message/fragment
//! - `workflow` - The end-to-end run: sandbox, loop, URL, persistence
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use forgeloop::{RunConfig, RunEvent, Workflow};
//!
//! let workflow = Workflow::from_config(RunConfig::from_env())?;
//! let output = workflow
//!     .run(RunEvent::new("create a hello-world page", "project-1"), None)
//!     .await?;
//! println!("{}", output.sandbox_url);
//! ```

pub mod agent;
pub mod config;
pub mod durable;
pub mod metrics;
pub mod network;
pub mod ollama;
pub mod sandbox;
pub mod state;
pub mod store;
pub mod tools;
pub mod tracing;
pub mod workflow;

// Re-export commonly used types at crate root for convenience
pub use config::RunConfig;
pub use state::SharedState;
pub use workflow::{RunError, RunEvent, RunOutput, Workflow};
