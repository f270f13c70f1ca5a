//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use forgeloop::config::SandboxBackend;
use forgeloop::ollama::{ChatError, ChatMessage, ChatRequest, ChatResponse, ModelBackend, ToolCall};
use forgeloop::sandbox::local::LocalSandboxProvider;
use forgeloop::store::FileMessageStore;
use forgeloop::{RunConfig, Workflow};

/// Model backend that plays back a script, then repeats a fallback reply
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<ChatMessage, String>>>,
    fallback: Result<ChatMessage, String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<ChatMessage>, fallback: ChatMessage) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            fallback: Ok(fallback),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Backend whose every call fails with a transport-style error
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map(ChatResponse::from_message)
            .map_err(|e| ChatError::Status(503, e))
    }
}

/// Assistant message asking for one `createOrUpdateFiles` call
pub fn write_files(files: &[(&str, &str)]) -> ChatMessage {
    let files: Vec<_> = files
        .iter()
        .map(|(path, content)| serde_json::json!({"path": path, "content": content}))
        .collect();
    ChatMessage::assistant_tool_calls(
        "",
        vec![ToolCall::new("createOrUpdateFiles", serde_json::json!({ "files": files }))],
    )
}

/// Assistant message asking for one `terminal` call
pub fn terminal(command: &str) -> ChatMessage {
    ChatMessage::assistant_tool_calls(
        "",
        vec![ToolCall::new("terminal", serde_json::json!({ "command": command }))],
    )
}

/// Test configuration rooted in `dir`, with an in-memory journal
pub fn test_config(dir: &Path) -> RunConfig {
    RunConfig {
        sandbox: SandboxBackend::Local {
            root: dir.join("sandboxes"),
            templates_dir: None,
        },
        journal_dir: None,
        store_dir: dir.join("messages"),
        step_delay: Duration::from_millis(1),
        ..RunConfig::default()
    }
}

/// Workflow over the local sandbox and a file store under `dir`
pub fn workflow(dir: &Path, backend: Arc<ScriptedBackend>, config: RunConfig) -> Workflow {
    let provider = Arc::new(LocalSandboxProvider::new(
        dir.join("sandboxes"),
        Duration::from_secs(10),
    ));
    let store = Arc::new(FileMessageStore::new(dir.join("messages")).unwrap());
    Workflow::new(provider, backend, store, config)
}
