//! Agent module for LLM-driven work inside a sandbox
//!
//! This module provides the agent sub-loop and the lifecycle hook that
//! detects task completion:
//! - Ollama LLM with tool calling (/api/chat)
//! - Tool Executor bound to the run's sandbox
//! - Completion detection on the final text of each turn
//!
//! # Architecture
//!
//! ```text
//! Conversation → Agent → Model backend (with tools)
//!                  ↓
//!           Tool Call: terminal / createOrUpdateFiles / readFiles
//!                  ↓
//!           ToolExecutor → durable step → Sandbox
//!                  ↓
//!           Feed result back to the model → Loop or finish turn
//!                  ↓
//!           LifecycleHook (CompletionDetector) → Shared State summary
//! ```

pub mod completion;
pub mod controller;

pub use completion::{CompletionDetector, LifecycleHook, TASK_SUMMARY_SENTINEL};
pub use controller::{
    Agent, AgentConfig, AgentError, AgentTurn, DEFAULT_AGENT_SYSTEM_PROMPT, DEFAULT_MAX_MODEL_CALLS,
};
