//! Persistent result messages
//!
//! Every run ends by saving exactly one assistant message for its project:
//! either the generic error message or the result with its fragment (sandbox
//! URL, title and files). Messages are JSON files under
//! `<root>/<project_id>/<message_id>.json`.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::state::FileSet;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Outcome a message reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Result,
    Error,
}

/// Artifact attached to a successful result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileSet,
}

/// A persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Present only on `Result` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

impl MessageRecord {
    /// Assistant error message
    pub fn error(id: impl Into<String>, project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            kind: MessageKind::Error,
            fragment: None,
            created_at: now_millis(),
        }
    }

    /// Assistant result message carrying a fragment
    pub fn result(
        id: impl Into<String>,
        project_id: impl Into<String>,
        content: impl Into<String>,
        fragment: Fragment,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            kind: MessageKind::Result,
            fragment: Some(fragment),
            created_at: now_millis(),
        }
    }
}

/// Error type for message persistence
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem error
    Io(std::io::Error),
    /// Record could not be encoded or decoded
    Codec(serde_json::Error),
    /// Id that cannot name a single path component
    InvalidId(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Codec(e) => write!(f, "Store codec error: {}", e),
            StoreError::InvalidId(id) => write!(f, "Invalid store id: {}", id),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e)
    }
}

/// Where run results are persisted
pub trait MessageStore: Send + Sync {
    /// Save (or overwrite) a message
    fn save(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Load one message
    fn load(&self, project_id: &str, message_id: &str) -> Result<MessageRecord, StoreError>;

    /// All messages of a project, oldest first
    fn list(&self, project_id: &str) -> Result<Vec<MessageRecord>, StoreError>;
}

/// JSON-file message store
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    /// Base directory for message files
    base_dir: PathBuf,
}

impl FileMessageStore {
    /// Create a new store, creating the base directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create with default directory (~/.forgeloop/messages)
    pub fn default_store() -> std::io::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(PathBuf::from(home).join(".forgeloop").join("messages"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.base_dir.join(checked_id(project_id)?))
    }

    fn message_path(&self, project_id: &str, message_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .project_dir(project_id)?
            .join(format!("{}.json", checked_id(message_id)?)))
    }
}

impl MessageStore for FileMessageStore {
    fn save(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let path = self.message_path(&record.project_id, &record.id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load(&self, project_id: &str, message_id: &str) -> Result<MessageRecord, StoreError> {
        let json = std::fs::read_to_string(self.message_path(project_id, message_id)?)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn list(&self, project_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let dir = self.project_dir(project_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match std::fs::read_to_string(&path)
                    .map_err(StoreError::from)
                    .and_then(|json| Ok(serde_json::from_str::<MessageRecord>(&json)?))
                {
                    Ok(record) => messages.push(record),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable message"),
                }
            }
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }
}

fn checked_id(id: &str) -> Result<&str, StoreError> {
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(id),
        _ => Err(StoreError::InvalidId(id.to_string())),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
