//! End-to-end runs of the workflow
//!
//! Every test drives a real local sandbox in a temp directory with a scripted
//! model backend, so no external service is needed.

mod common;

use common::{terminal, test_config, workflow, write_files, ScriptedBackend};

use forgeloop::durable::{FileJournal, MemoryJournal, RetryPolicy, StepRunner};
use forgeloop::network::NetworkError;
use forgeloop::ollama::ChatMessage;
use forgeloop::store::{MessageKind, MessageRole};
use forgeloop::workflow::{FRAGMENT_TITLE, GENERIC_ERROR_MESSAGE};
use forgeloop::{RunError, RunEvent};

const SUMMARY: &str = "<task_summary>Created hello-world page</task_summary>";

#[tokio::test]
async fn test_hello_world_run_persists_result() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![write_files(&[("index.html", "<h1>Hello</h1>")])],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let output = workflow
        .run(RunEvent::new("create a hello-world page", "proj-1"), Some("run-hello".to_string()))
        .await
        .unwrap();

    assert!(!output.is_error);
    assert!(!output.halted_by_limit);
    assert_eq!(output.summary.as_deref(), Some(SUMMARY));
    assert_eq!(output.files.len(), 1);
    assert_eq!(output.files["index.html"], "<h1>Hello</h1>");
    assert_eq!(output.sandbox_url, "https://localhost:3000");
    assert_eq!(output.title, FRAGMENT_TITLE);
    assert_eq!(backend.calls(), 2);

    let saved = workflow.store().load("proj-1", "run-hello").unwrap();
    assert_eq!(saved.role, MessageRole::Assistant);
    assert_eq!(saved.kind, MessageKind::Result);
    assert_eq!(saved.content, SUMMARY);
    let fragment = saved.fragment.unwrap();
    assert_eq!(fragment.title, "Fragment");
    assert_eq!(fragment.sandbox_url, "https://localhost:3000");
    assert_eq!(fragment.files, output.files);
}

#[tokio::test]
async fn test_no_sentinel_for_fifteen_iterations_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![write_files(&[("index.html", "<h1>Hello</h1>")])],
        ChatMessage::assistant("Still working on it."),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let output = workflow
        .run(RunEvent::new("build something", "proj-2"), Some("run-limit".to_string()))
        .await
        .unwrap();

    assert!(output.is_error);
    assert!(output.halted_by_limit);
    assert!(output.summary.is_none());
    // Files were produced, the run still failed
    assert_eq!(output.files.len(), 1);
    // One tool round-trip in the first iteration, one call in each of the other 14
    assert_eq!(backend.calls(), 16);

    let saved = workflow.store().load("proj-2", "run-limit").unwrap();
    assert_eq!(saved.kind, MessageKind::Error);
    assert_eq!(saved.content, GENERIC_ERROR_MESSAGE);
    assert!(saved.fragment.is_none());
}

#[tokio::test]
async fn test_router_halt_without_files_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![], ChatMessage::assistant(SUMMARY));
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let output = workflow
        .run(RunEvent::new("do nothing", "proj-3"), Some("run-empty".to_string()))
        .await
        .unwrap();

    assert!(!output.halted_by_limit);
    assert_eq!(output.summary.as_deref(), Some(SUMMARY));
    assert!(output.files.is_empty());
    assert!(output.is_error);
    assert_eq!(backend.calls(), 1);

    let saved = workflow.store().load("proj-3", "run-empty").unwrap();
    assert_eq!(saved.kind, MessageKind::Error);
    assert_eq!(saved.content, GENERIC_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_failed_write_batch_leaves_files_and_conversation_continues() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![
            write_files(&[("ok.txt", "written first"), ("../escape.txt", "nope")]),
            write_files(&[("index.html", "<h1>Hello</h1>")]),
        ],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let output = workflow
        .run(RunEvent::new("write files", "proj-4"), Some("run-partial".to_string()))
        .await
        .unwrap();

    assert!(!output.is_error);
    assert_eq!(output.files.keys().collect::<Vec<_>>(), vec!["index.html"]);

    // The second model call saw the failure as a tool result
    let requests = backend.requests();
    let tool_result = requests[1].messages.last().unwrap();
    assert_eq!(tool_result.role, "tool");
    assert!(tool_result.content.starts_with("Error:"));
}

#[tokio::test]
async fn test_terminal_output_reaches_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![
            terminal("echo from-sandbox"),
            terminal("exit 3"),
            write_files(&[("index.html", "<h1>Hello</h1>")]),
        ],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    workflow
        .run(RunEvent::new("run commands", "proj-5"), None)
        .await
        .unwrap();

    let requests = backend.requests();
    assert_eq!(requests[1].messages.last().unwrap().content, "from-sandbox\n");
    assert!(requests[2]
        .messages
        .last()
        .unwrap()
        .content
        .starts_with("Command failed:"));
}

#[tokio::test]
async fn test_text_encoded_tool_calls_are_executed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![ChatMessage::assistant(
            r#"Writing the page now.
{"name": "createOrUpdateFiles", "arguments": {"files": [{"path": "index.html", "content": "<h1>Hi</h1>"}]}}"#,
        )],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let output = workflow
        .run(RunEvent::new("write a page", "proj-6"), None)
        .await
        .unwrap();

    assert!(!output.is_error);
    assert_eq!(output.files["index.html"], "<h1>Hi</h1>");
}

#[tokio::test]
async fn test_custom_iteration_cap() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![], ChatMessage::assistant("thinking"));
    let mut config = test_config(dir.path());
    config.max_iterations = 3;
    let workflow = workflow(dir.path(), backend.clone(), config);

    let output = workflow
        .run(RunEvent::new("loop", "proj-7"), None)
        .await
        .unwrap();

    assert!(output.halted_by_limit);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_model_failure_exhausts_retries() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::failing("model unavailable");
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let err = workflow
        .run(RunEvent::new("anything", "proj-8"), Some("run-down".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Network(NetworkError::Agent(_))));
    assert!(err.to_string().contains("model unavailable"));
    // Default policy: three attempts
    assert_eq!(backend.calls(), 3);
    assert!(workflow.store().list("proj-8").unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_executes_no_completed_step() {
    let dir = tempfile::tempdir().unwrap();
    let journal_dir = dir.path().join("journal");
    let event = RunEvent::new("create a hello-world page", "proj-9");

    let first_backend = ScriptedBackend::new(
        vec![
            terminal("echo hi"),
            write_files(&[("index.html", "<h1>Hello</h1>")]),
        ],
        ChatMessage::assistant(SUMMARY),
    );
    let first = workflow(dir.path(), first_backend.clone(), test_config(dir.path()));
    let mut steps = StepRunner::new(
        "run-replay",
        Box::new(FileJournal::open(&journal_dir, "run-replay").unwrap()),
        RetryPolicy::default(),
    );
    let original = first.execute(event.clone(), &mut steps).await.unwrap();
    let executed = steps.executed();
    assert!(executed >= 7);

    // Remove the saved message: a replayed save-result must not write it again
    let message = dir.path().join("messages").join("proj-9").join("run-replay.json");
    std::fs::remove_file(&message).unwrap();

    let replay_backend = ScriptedBackend::new(vec![], ChatMessage::assistant("never called"));
    let second = workflow(dir.path(), replay_backend.clone(), test_config(dir.path()));
    let mut steps = StepRunner::new(
        "run-replay",
        Box::new(FileJournal::open(&journal_dir, "run-replay").unwrap()),
        RetryPolicy::default(),
    );
    let replayed = second.execute(event, &mut steps).await.unwrap();

    assert_eq!(replayed, original);
    assert_eq!(steps.executed(), 0);
    assert_eq!(steps.replayed(), executed);
    assert_eq!(replay_backend.calls(), 0);
    assert!(!message.exists());
}

#[tokio::test]
async fn test_memory_journal_run_ids_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![
            write_files(&[("a.txt", "a")]),
            ChatMessage::assistant(SUMMARY),
            write_files(&[("b.txt", "b")]),
        ],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let mut steps = StepRunner::new("run-a", Box::new(MemoryJournal::new()), RetryPolicy::default());
    let a = workflow
        .execute(RunEvent::new("first", "proj-10"), &mut steps)
        .await
        .unwrap();
    let mut steps = StepRunner::new("run-b", Box::new(MemoryJournal::new()), RetryPolicy::default());
    let b = workflow
        .execute(RunEvent::new("second", "proj-10"), &mut steps)
        .await
        .unwrap();

    assert_eq!(a.files.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    assert_eq!(b.files.keys().collect::<Vec<_>>(), vec!["b.txt"]);
    assert_eq!(workflow.store().list("proj-10").unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_run_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![], ChatMessage::assistant(SUMMARY));
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let err = workflow
        .run(RunEvent::new("x", "proj"), Some("../outside".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::InvalidRunId(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_invalid_project_id_is_rejected_before_any_step() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(
        vec![write_files(&[("index.html", "<h1>Hello</h1>")])],
        ChatMessage::assistant(SUMMARY),
    );
    let workflow = workflow(dir.path(), backend.clone(), test_config(dir.path()));

    let err = workflow
        .run(RunEvent::new("x", "a/b"), Some("run-bad-project".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::InvalidProjectId(ref id) if id == "a/b"));

    // Resume entry point with a caller-built runner
    let mut steps = StepRunner::new("run-bad-project", Box::new(MemoryJournal::new()), RetryPolicy::default());
    let err = workflow
        .execute(RunEvent::new("x", ".."), &mut steps)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::InvalidProjectId(_)));

    assert_eq!(steps.executed(), 0);
    assert_eq!(backend.calls(), 0);
    assert!(workflow.store().list("a").unwrap().is_empty());
}
