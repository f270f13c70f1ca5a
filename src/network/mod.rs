//! Agent network: router plus iteration driver

pub mod orchestrator;
pub mod router;

pub use orchestrator::{
    Network, NetworkError, NetworkOutcome, NetworkStatus, DEFAULT_MAX_ITERATIONS,
};
pub use router::{RouteDecision, Router, SingleAgentRouter};
