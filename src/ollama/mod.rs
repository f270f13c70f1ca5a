//! Ollama LLM integration module
//!
//! This module provides the model backend for agents: a client for Ollama's
//! `/api/chat` endpoint with tool calling, plus the message and tool types
//! shared with the rest of the crate.

pub mod tool_use;

// Re-export public types from the tool_use module
// This lets other modules do `use crate::ollama::ChatMessage` instead of
// `use crate::ollama::tool_use::ChatMessage`
pub use tool_use::{
    parse_tool_calls_from_text, ChatClient, ChatError, ChatMessage, ChatRequest, ChatResponse,
    FunctionCall, ModelBackend, ReasoningEffort, Tool, ToolCall, ToolFunction,
};
