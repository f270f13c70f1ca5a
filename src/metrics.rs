//! Prometheus metrics for observability
//!
//! All metrics live in one global registry so they can be rendered together
//! with [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, Encoder, Histogram, HistogramVec, IntCounterVec,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global registry for all forgeloop metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Completed runs by outcome ("result", "error", "failed")
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "forgeloop_runs_total",
        "Completed runs by outcome",
        &["outcome"],
        REGISTRY
    ).expect("metric can be registered");

    /// Network iterations per run
    pub static ref NETWORK_ITERATIONS: Histogram = register_histogram_with_registry!(
        "forgeloop_network_iterations",
        "Agent invocations per run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0],
        REGISTRY
    ).expect("metric can be registered");

    /// Network terminations by terminal state ("router", "limit")
    pub static ref NETWORK_HALTS: IntCounterVec = register_int_counter_vec_with_registry!(
        "forgeloop_network_halts_total",
        "Network terminations by terminal state",
        &["reason"],
        REGISTRY
    ).expect("metric can be registered");

    /// Tool calls by tool name and status ("ok", "error")
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec_with_registry!(
        "forgeloop_tool_calls_total",
        "Tool calls issued by agents",
        &["tool", "status"],
        REGISTRY
    ).expect("metric can be registered");

    /// LLM call latency in seconds
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec_with_registry!(
        "forgeloop_llm_call_seconds",
        "Model backend call latency",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        REGISTRY
    ).expect("metric can be registered");

    /// Steps answered from the journal instead of being executed
    pub static ref STEP_REPLAYS: IntCounterVec = register_int_counter_vec_with_registry!(
        "forgeloop_step_replays_total",
        "Durable steps replayed from the journal",
        &["step"],
        REGISTRY
    ).expect("metric can be registered");

    /// Step body re-invocations after a failure
    pub static ref STEP_RETRIES: IntCounterVec = register_int_counter_vec_with_registry!(
        "forgeloop_step_retries_total",
        "Durable step retries",
        &["step"],
        REGISTRY
    ).expect("metric can be registered");
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
