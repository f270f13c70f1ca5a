//! Network - the iteration driver
//!
//! Holds the agent roster, the router and the iteration cap, and drives the
//! loop until the router halts or the cap is reached. Shared State is owned by
//! the loop for its whole duration and lent to each agent turn.

use tracing::{info, info_span, warn, Instrument};

use crate::agent::{Agent, AgentError, AgentTurn};
use crate::durable::StepRunner;
use crate::metrics::{NETWORK_HALTS, NETWORK_ITERATIONS};
use crate::ollama::ChatMessage;
use crate::state::SharedState;

use super::router::{RouteDecision, Router};

/// Default iteration cap
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// State of the network loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Running,
    /// The router returned `Halt`
    HaltedByRouter,
    /// The iteration cap was reached without a halt decision
    HaltedByLimit,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Running => "running",
            NetworkStatus::HaltedByRouter => "router",
            NetworkStatus::HaltedByLimit => "limit",
        }
    }
}

/// Error type for the network loop
#[derive(Debug)]
pub enum NetworkError {
    /// The router named an agent missing from the roster
    UnknownAgent(String),
    /// An agent turn failed for good
    Agent(AgentError),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::UnknownAgent(name) => write!(f, "Router selected unknown agent '{}'", name),
            NetworkError::Agent(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<AgentError> for NetworkError {
    fn from(e: AgentError) -> Self {
        NetworkError::Agent(e)
    }
}

/// Final result of a network run
#[derive(Debug, Clone)]
pub struct NetworkOutcome {
    pub state: SharedState,
    /// One entry per agent invocation, in order
    pub transcript: Vec<AgentTurn>,
    pub status: NetworkStatus,
    pub iterations: usize,
}

/// Agent roster plus the router that schedules it
pub struct Network {
    agents: Vec<Agent>,
    router: Box<dyn Router>,
    max_iterations: usize,
}

impl Network {
    /// Create a network
    ///
    /// # Arguments
    /// * `agents` - Roster the router may select from
    /// * `router` - Routing decision function
    /// * `max_iterations` - Cap on agent invocations
    pub fn new(agents: Vec<Agent>, router: impl Router + 'static, max_iterations: usize) -> Self {
        Self {
            agents,
            router: Box::new(router),
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    /// Drive the loop to a terminal state
    ///
    /// # Arguments
    /// * `prompt` - User prompt seeding the conversation
    /// * `state` - Initial Shared State
    /// * `steps` - Step runner of the run
    pub async fn run(
        &self,
        prompt: &str,
        mut state: SharedState,
        steps: &mut StepRunner,
    ) -> Result<NetworkOutcome, NetworkError> {
        let mut conversation = vec![ChatMessage::user(prompt)];
        let mut transcript = Vec::new();
        let mut iterations = 0;
        let mut status = NetworkStatus::Running;

        while status == NetworkStatus::Running {
            if iterations >= self.max_iterations {
                status = NetworkStatus::HaltedByLimit;
                break;
            }

            let agent = match self.router.route(state.snapshot()) {
                RouteDecision::Halt => {
                    status = NetworkStatus::HaltedByRouter;
                    break;
                }
                RouteDecision::Continue(name) => self
                    .agent(&name)
                    .ok_or(NetworkError::UnknownAgent(name))?,
            };

            iterations += 1;
            println!(
                "[NETWORK] Iteration {}/{} → {}",
                iterations,
                self.max_iterations,
                agent.name()
            );

            let span = info_span!(
                "network_iteration",
                run_id = %state.run_id,
                iteration = iterations,
                agent = %agent.name(),
                otel.name = "network_iteration"
            );
            let turn = agent
                .run(&conversation, &mut state, steps)
                .instrument(span)
                .await?;

            conversation.extend(turn.messages.iter().cloned());
            transcript.push(turn);
        }

        NETWORK_ITERATIONS.observe(iterations as f64);
        NETWORK_HALTS.with_label_values(&[status.as_str()]).inc();

        match status {
            NetworkStatus::HaltedByLimit => warn!(
                run_id = %state.run_id,
                iterations,
                "Iteration cap reached without completion"
            ),
            _ => info!(run_id = %state.run_id, iterations, "Router halted the network"),
        }

        Ok(NetworkOutcome {
            state,
            transcript,
            status,
            iterations,
        })
    }
}
