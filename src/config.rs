//! Run configuration
//!
//! [`RunConfig::default`] gives a setup that works against a local Ollama and
//! directory-backed sandboxes. Every field can be overridden through a
//! `FORGELOOP_*` environment variable, see [`RunConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::durable::RetryPolicy;
use crate::agent::DEFAULT_MAX_MODEL_CALLS;
use crate::network::DEFAULT_MAX_ITERATIONS;
use crate::ollama::ReasoningEffort;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Port the generated application listens on inside the sandbox
pub const DEFAULT_APP_PORT: u16 = 3000;

/// Which sandbox implementation a run uses
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxBackend {
    /// Directory-backed sandboxes on this host
    Local {
        root: PathBuf,
        /// Directory with one sub-directory per template
        templates_dir: Option<PathBuf>,
    },
    /// HTTP sandbox service
    Remote { base_url: String, domain: String },
}

/// Configuration for a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Name of the single agent in the roster
    pub agent_name: String,
    /// Model to use (e.g., "gpt-oss:20b")
    pub model: String,
    pub ollama_url: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Auxiliary tool-discovery endpoint handed to the model backend
    pub tool_discovery_url: Option<String>,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Template the sandbox is created from
    pub template_id: String,
    pub app_port: u16,
    /// Maximum agent invocations per run
    pub max_iterations: usize,
    /// Maximum model calls within one agent invocation
    pub max_model_calls_per_turn: usize,
    /// Attempts per durable step before the run fails
    pub step_attempts: u32,
    pub step_delay: Duration,
    pub command_timeout: Duration,
    pub sandbox: SandboxBackend,
    /// Step journal directory; in-memory journal if None
    pub journal_dir: Option<PathBuf>,
    /// Message store directory
    pub store_dir: PathBuf,
    /// OTLP collector endpoint; spans are exported only when set
    pub otlp_endpoint: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let base = PathBuf::from(home).join(".forgeloop");
        Self {
            agent_name: "code-agent".to_string(),
            model: "gpt-oss:20b".to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            reasoning_effort: Some(ReasoningEffort::Medium),
            tool_discovery_url: None,
            system_prompt: None,
            template_id: "default".to_string(),
            app_port: DEFAULT_APP_PORT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_model_calls_per_turn: DEFAULT_MAX_MODEL_CALLS,
            step_attempts: 3,
            step_delay: Duration::from_millis(500),
            command_timeout: Duration::from_secs(120),
            sandbox: SandboxBackend::Local {
                root: base.join("sandboxes"),
                templates_dir: None,
            },
            journal_dir: Some(base.join("journal")),
            store_dir: base.join("messages"),
            otlp_endpoint: None,
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `FORGELOOP_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FORGELOOP_AGENT_NAME") {
            config.agent_name = v;
        }
        if let Some(v) = get("FORGELOOP_MODEL") {
            config.model = v;
        }
        if let Some(v) = get("FORGELOOP_OLLAMA_URL") {
            config.ollama_url = v;
        }
        if let Some(v) = get("FORGELOOP_REASONING_EFFORT") {
            if v.eq_ignore_ascii_case("none") {
                config.reasoning_effort = None;
            } else if let Some(effort) = parse_or_warn("FORGELOOP_REASONING_EFFORT", &v) {
                config.reasoning_effort = Some(effort);
            }
        }
        if let Some(v) = get("FORGELOOP_TOOL_DISCOVERY_URL") {
            config.tool_discovery_url = Some(v);
        }
        if let Some(v) = get("FORGELOOP_SYSTEM_PROMPT") {
            config.system_prompt = Some(v);
        }
        if let Some(v) = get("FORGELOOP_TEMPLATE") {
            config.template_id = v;
        }
        if let Some(port) = get("FORGELOOP_APP_PORT").and_then(|v| parse_or_warn("FORGELOOP_APP_PORT", &v)) {
            config.app_port = port;
        }
        if let Some(n) = get("FORGELOOP_MAX_ITERATIONS")
            .and_then(|v| parse_or_warn("FORGELOOP_MAX_ITERATIONS", &v))
        {
            config.max_iterations = n;
        }
        if let Some(n) = get("FORGELOOP_MAX_MODEL_CALLS")
            .and_then(|v| parse_or_warn::<usize>("FORGELOOP_MAX_MODEL_CALLS", &v))
        {
            config.max_model_calls_per_turn = n.max(1);
        }
        if let Some(n) = get("FORGELOOP_STEP_ATTEMPTS")
            .and_then(|v| parse_or_warn::<u32>("FORGELOOP_STEP_ATTEMPTS", &v))
        {
            config.step_attempts = n.max(1);
        }
        if let Some(ms) = get("FORGELOOP_STEP_DELAY_MS")
            .and_then(|v| parse_or_warn("FORGELOOP_STEP_DELAY_MS", &v))
        {
            config.step_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = get("FORGELOOP_COMMAND_TIMEOUT_SECS")
            .and_then(|v| parse_or_warn("FORGELOOP_COMMAND_TIMEOUT_SECS", &v))
        {
            config.command_timeout = Duration::from_secs(secs);
        }

        // A sandbox service URL switches to the remote backend
        if let Some(base_url) = get("FORGELOOP_SANDBOX_URL") {
            config.sandbox = SandboxBackend::Remote {
                base_url,
                domain: get("FORGELOOP_SANDBOX_DOMAIN").unwrap_or_else(|| "localhost".to_string()),
            };
        } else if let SandboxBackend::Local { root, templates_dir } = &mut config.sandbox {
            if let Some(v) = get("FORGELOOP_SANDBOX_ROOT") {
                *root = PathBuf::from(v);
            }
            if let Some(v) = get("FORGELOOP_TEMPLATES_DIR") {
                *templates_dir = Some(PathBuf::from(v));
            }
        }

        if let Some(v) = get("FORGELOOP_JOURNAL_DIR") {
            config.journal_dir = if v == "memory" { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = get("FORGELOOP_STORE_DIR") {
            config.store_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FORGELOOP_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(v);
        }

        config
    }

    /// Retry policy for durable steps
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.step_attempts,
            delay: self.step_delay,
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.app_port, 3000);
        assert_eq!(config.step_attempts, 3);
        assert_eq!(config.max_model_calls_per_turn, 50);
        assert!(matches!(config.sandbox, SandboxBackend::Local { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = RunConfig::from_lookup(lookup(&[
            ("FORGELOOP_MODEL", "qwen3:8b"),
            ("FORGELOOP_MAX_ITERATIONS", "5"),
            ("FORGELOOP_REASONING_EFFORT", "high"),
            ("FORGELOOP_STEP_DELAY_MS", "10"),
            ("FORGELOOP_JOURNAL_DIR", "memory"),
            ("FORGELOOP_MAX_MODEL_CALLS", "8"),
        ]));

        assert_eq!(config.model, "qwen3:8b");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.reasoning_effort, Some(ReasoningEffort::High));
        assert_eq!(config.retry_policy().delay, Duration::from_millis(10));
        assert!(config.journal_dir.is_none());
        assert_eq!(config.max_model_calls_per_turn, 8);
    }

    #[test]
    fn test_remote_sandbox() {
        let config = RunConfig::from_lookup(lookup(&[
            ("FORGELOOP_SANDBOX_URL", "http://sandboxes:8080"),
            ("FORGELOOP_SANDBOX_DOMAIN", "sbx.example.dev"),
        ]));

        assert_eq!(
            config.sandbox,
            SandboxBackend::Remote {
                base_url: "http://sandboxes:8080".to_string(),
                domain: "sbx.example.dev".to_string(),
            }
        );
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = RunConfig::from_lookup(lookup(&[
            ("FORGELOOP_APP_PORT", "not-a-port"),
            ("FORGELOOP_STEP_ATTEMPTS", "0"),
        ]));

        assert_eq!(config.app_port, 3000);
        assert_eq!(config.step_attempts, 1);
    }
}
