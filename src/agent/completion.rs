//! Completion detection
//!
//! The only way a run is marked complete: after a turn, the last plain-text
//! assistant message is checked for the sentinel marker and, when present,
//! stored verbatim as the run's summary.

use tracing::info;

use super::controller::AgentTurn;
use crate::state::SharedState;

/// Marker whose presence in an assistant message signals task completion
pub const TASK_SUMMARY_SENTINEL: &str = "<task_summary>";

/// Hook invoked with every finished agent turn
pub trait LifecycleHook: Send + Sync {
    /// Inspect the turn and return it (possibly changed) to the caller
    fn on_finish(&self, turn: AgentTurn, state: &mut SharedState) -> AgentTurn;
}

/// Sets the summary when the agent's final text contains the sentinel
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    sentinel: String,
}

impl CompletionDetector {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::new(TASK_SUMMARY_SENTINEL)
    }
}

impl LifecycleHook for CompletionDetector {
    fn on_finish(&self, turn: AgentTurn, state: &mut SharedState) -> AgentTurn {
        if let Some(text) = turn.last_text_message() {
            if text.contains(&self.sentinel) && state.set_summary(text) {
                info!(run_id = %state.run_id, agent = %turn.agent, "Task summary detected");
                println!("[AGENT] ✅ Task summary received from {}", turn.agent);
            }
        }
        turn
    }
}
