//! Step runner - executes named steps at most once per run
//!
//! Each call to [`StepRunner::run`] is assigned the next ordinal for its name,
//! so the n-th `terminal` step of a run always has the same identity no matter
//! how many times the run is re-executed. Step bodies are retried on error
//! according to the [`RetryPolicy`]; only successful outputs are journaled.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info_span, warn, Instrument};

use super::journal::{JournalStore, StepKey};
use crate::metrics::{STEP_REPLAYS, STEP_RETRIES};

/// How often a failing step body is re-invoked before the step fails
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Error type for step execution
#[derive(Debug)]
pub enum StepError {
    /// The step body failed on every attempt
    Exhausted {
        step: String,
        attempts: u32,
        message: String,
    },
    /// The journal could not be written
    Journal(std::io::Error),
    /// A step output could not be (de)serialized
    Codec { step: String, source: serde_json::Error },
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Exhausted {
                step,
                attempts,
                message,
            } => write!(f, "Step {} failed after {} attempts: {}", step, attempts, message),
            StepError::Journal(e) => write!(f, "Journal error: {}", e),
            StepError::Codec { step, source } => {
                write!(f, "Step {} output could not be encoded: {}", step, source)
            }
        }
    }
}

impl std::error::Error for StepError {}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Journal(e)
    }
}

/// Runs the durable steps of one run against its journal
pub struct StepRunner {
    run_id: String,
    journal: Box<dyn JournalStore>,
    ordinals: HashMap<String, u32>,
    policy: RetryPolicy,
    executed: usize,
    replayed: usize,
}

impl StepRunner {
    pub fn new(run_id: impl Into<String>, journal: Box<dyn JournalStore>, policy: RetryPolicy) -> Self {
        Self {
            run_id: run_id.into(),
            journal,
            ordinals: HashMap::new(),
            policy,
            executed: 0,
            replayed: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Steps whose body actually ran during this execution
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Steps answered from the journal during this execution
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    fn next_key(&mut self, name: &str) -> StepKey {
        let ordinal = self.ordinals.entry(name.to_string()).or_insert(0);
        let key = StepKey::new(self.run_id.clone(), name, *ordinal);
        *ordinal += 1;
        key
    }

    /// Run a named step.
    ///
    /// If the journal already holds an output for this step identity it is
    /// returned without invoking `body`. Otherwise `body` is invoked until it
    /// succeeds or the retry policy is exhausted; the successful output is
    /// journaled before it is returned.
    pub async fn run<T, E, F, Fut>(&mut self, name: &str, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.next_key(name);
        let span = info_span!("step", run_id = %self.run_id, step = %key, otel.name = "step");
        self.run_keyed(key, name, body).instrument(span).await
    }

    async fn run_keyed<T, E, F, Fut>(&mut self, key: StepKey, name: &str, mut body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(recorded) = self.journal.lookup(&key) {
            debug!(step = %key, "Replaying step from journal");
            STEP_REPLAYS.with_label_values(&[name]).inc();
            self.replayed += 1;
            return serde_json::from_value(recorded).map_err(|source| StepError::Codec {
                step: key.to_string(),
                source,
            });
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match body().await {
                Ok(output) => {
                    let value = serde_json::to_value(&output).map_err(|source| StepError::Codec {
                        step: key.to_string(),
                        source,
                    })?;
                    self.journal.record(&key, &value)?;
                    self.executed += 1;
                    debug!(step = %key, attempt, "Step completed");
                    return Ok(output);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(step = %key, attempt, error = %e, "Step failed, retrying");
                    STEP_RETRIES.with_label_values(&[name]).inc();
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    return Err(StepError::Exhausted {
                        step: key.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryJournal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_ordinals_are_per_name() {
        let mut runner = StepRunner::new("run-1", Box::new(MemoryJournal::new()), fast_policy(1));
        assert_eq!(runner.next_key("terminal").ordinal, 0);
        assert_eq!(runner.next_key("read-files").ordinal, 0);
        assert_eq!(runner.next_key("terminal").ordinal, 1);
    }

    #[tokio::test]
    async fn test_step_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut runner = StepRunner::new("run-1", Box::new(MemoryJournal::new()), fast_policy(3));

        let counter = calls.clone();
        let out: String = runner
            .run("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient")
                    } else {
                        Ok("done".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_step_exhaustion_is_an_error() {
        let mut runner = StepRunner::new("run-1", Box::new(MemoryJournal::new()), fast_policy(2));
        let result: Result<String, _> = runner
            .run("broken", || async { Err::<String, _>("backend down") })
            .await;

        match result {
            Err(StepError::Exhausted { attempts, message, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(message, "backend down");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_completed_step_is_replayed() {
        let mut journal = MemoryJournal::new();
        journal
            .record(&StepKey::new("run-1", "get-sandbox-id", 0), &serde_json::json!("sbx-42"))
            .unwrap();
        let mut runner = StepRunner::new("run-1", Box::new(journal), fast_policy(1));

        let id: String = runner
            .run("get-sandbox-id", || async {
                Err::<String, _>("body must not run on replay")
            })
            .await
            .unwrap();

        assert_eq!(id, "sbx-42");
        assert_eq!(runner.replayed(), 1);
        assert_eq!(runner.executed(), 0);
    }

    #[tokio::test]
    async fn test_each_step_runs_in_a_step_span() {
        use std::sync::Mutex;
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::Layer;

        struct SpanNames(Arc<Mutex<Vec<String>>>);

        impl<S: tracing::Subscriber> Layer<S> for SpanNames {
            fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, _id: &tracing::span::Id, _ctx: Context<'_, S>) {
                self.0.lock().unwrap().push(attrs.metadata().name().to_string());
            }
        }

        let names = Arc::new(Mutex::new(Vec::new()));
        let _guard = tracing_subscriber::registry()
            .with(SpanNames(names.clone()))
            .set_default();

        let mut runner = StepRunner::new("run-1", Box::new(MemoryJournal::new()), fast_policy(1));
        runner.run("terminal", || async { Ok::<_, String>(1) }).await.unwrap();
        runner.run("readFiles", || async { Ok::<_, String>(2) }).await.unwrap();

        let names = names.lock().unwrap();
        assert_eq!(names.iter().filter(|n| n.as_str() == "step").count(), 2);
    }
}
