//! Routing decisions between agent turns

use crate::state::StateSnapshot;

/// What the network should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Invoke the named agent
    Continue(String),
    /// Stop the loop
    Halt,
}

/// Chooses which agent (if any) acts next
///
/// Called once per iteration, before each agent invocation. Implementations
/// must be pure functions of the snapshot.
pub trait Router: Send + Sync {
    fn route(&self, state: StateSnapshot<'_>) -> RouteDecision;
}

/// Router for a single-agent roster: halt once a summary exists
#[derive(Debug, Clone)]
pub struct SingleAgentRouter {
    agent: String,
}

impl SingleAgentRouter {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl Router for SingleAgentRouter {
    fn route(&self, state: StateSnapshot<'_>) -> RouteDecision {
        if state.is_complete() {
            RouteDecision::Halt
        } else {
            RouteDecision::Continue(self.agent.clone())
        }
    }
}
