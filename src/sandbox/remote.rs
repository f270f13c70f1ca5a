//! HTTP client for a remote sandbox service
//!
//! # Endpoints
//!
//! ```text
//! POST /sandboxes                      {"template_id"}  → {"sandbox_id"}
//! GET  /sandboxes/{id}                                  → 200 | 404
//! POST /sandboxes/{id}/commands        {"cmd"}          → NDJSON frames
//! PUT  /sandboxes/{id}/files?path=...  body = content
//! GET  /sandboxes/{id}/files?path=...                   → content | 404
//! ```
//!
//! Command output is streamed back as newline-delimited JSON frames, one of
//! `{"stdout": ".."}`, `{"stderr": ".."}`, `{"exit_code": n}` or
//! `{"error": ".."}`. Exposed hosts follow the `{port}-{sandbox_id}.{domain}`
//! scheme and need no round trip.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CommandOutput, OutputChunk, Sandbox, SandboxError, SandboxProvider};

#[derive(Serialize)]
struct CreateRequest<'a> {
    template_id: &'a str,
}

#[derive(Deserialize)]
struct CreateResponse {
    sandbox_id: String,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    cmd: &'a str,
}

/// One NDJSON frame of command output
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum CommandFrame {
    Stdout(String),
    Stderr(String),
    ExitCode(i32),
    Error(String),
}

/// Provisions sandboxes through the remote service
#[derive(Clone)]
pub struct RemoteSandboxProvider {
    base_url: String,
    domain: String,
    client: reqwest::Client,
}

impl RemoteSandboxProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the sandbox service (e.g., "http://localhost:49982")
    /// * `domain` - Domain under which sandbox ports are exposed
    pub fn new(base_url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            domain: domain.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn create(&self, template_id: &str) -> Result<String, SandboxError> {
        let endpoint = format!("{}/sandboxes", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&CreateRequest { template_id })
            .send()
            .await?
            .error_for_status()?;

        let created: CreateResponse = response.json().await?;
        info!(sandbox_id = %created.sandbox_id, template_id, "Remote sandbox created");
        Ok(created.sandbox_id)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn Sandbox>, SandboxError> {
        let endpoint = format!("{}/sandboxes/{}", self.base_url, sandbox_id);
        let response = self.client.get(&endpoint).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SandboxError::UnknownSandbox(sandbox_id.to_string()));
        }
        response.error_for_status()?;

        Ok(Box::new(RemoteSandbox {
            id: sandbox_id.to_string(),
            base_url: self.base_url.clone(),
            domain: self.domain.clone(),
            client: self.client.clone(),
        }))
    }
}

/// A connected remote sandbox
pub struct RemoteSandbox {
    id: String,
    base_url: String,
    domain: String,
    client: reqwest::Client,
}

impl RemoteSandbox {
    fn files_endpoint(&self) -> String {
        format!("{}/sandboxes/{}/files", self.base_url, self.id)
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> Result<CommandOutput, SandboxError> {
        let endpoint = format!("{}/sandboxes/{}/commands", self.base_url, self.id);
        debug!(sandbox_id = %self.id, command, "Running remote command");

        let mut bytes_stream = self
            .client
            .post(&endpoint)
            .json(&CommandRequest { cmd: command })
            .send()
            .await?
            .error_for_status()?
            .bytes_stream();

        let mut output = CommandOutput::default();
        let mut exit_code = None;
        let mut pending = Vec::new();

        // Frames may be split across (or packed into) network chunks, so
        // buffer until a full line is available.
        while let Some(chunk) = bytes_stream.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                if let Some(code) = apply_frame(&line, &mut output, on_output)? {
                    exit_code = Some(code);
                }
            }
        }
        if !pending.is_empty() {
            if let Some(code) = apply_frame(&pending, &mut output, on_output)? {
                exit_code = Some(code);
            }
        }

        let exit_code = exit_code.ok_or_else(|| {
            SandboxError::Transport("command stream ended without an exit code".to_string())
        })?;
        output.exit_code = exit_code;
        if exit_code != 0 {
            return Err(SandboxError::CommandExit { exit_code });
        }
        Ok(output)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.client
            .put(self.files_endpoint())
            .query(&[("path", path)])
            .body(content.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let response = self
            .client
            .get(self.files_endpoint())
            .query(&[("path", path)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SandboxError::NotFound(path.to_string()));
        }
        Ok(response.error_for_status()?.text().await?)
    }

    async fn exposed_host(&self, port: u16) -> Result<String, SandboxError> {
        Ok(format!("{}-{}.{}", port, self.id, self.domain))
    }
}

/// Decode one NDJSON line, forwarding output and returning the exit code frame
fn apply_frame(
    line: &[u8],
    output: &mut CommandOutput,
    on_output: &mut (dyn FnMut(OutputChunk) + Send),
) -> Result<Option<i32>, SandboxError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let frame: CommandFrame = serde_json::from_str(text)
        .map_err(|e| SandboxError::Transport(format!("bad command frame: {}", e)))?;

    match frame {
        CommandFrame::Stdout(s) => {
            output.stdout.push_str(&s);
            on_output(OutputChunk::Stdout(s));
            Ok(None)
        }
        CommandFrame::Stderr(s) => {
            output.stderr.push_str(&s);
            on_output(OutputChunk::Stderr(s));
            Ok(None)
        }
        CommandFrame::ExitCode(code) => Ok(Some(code)),
        CommandFrame::Error(msg) => Err(SandboxError::Transport(msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connected(server: &MockServer) -> Box<dyn Sandbox> {
        Mock::given(method("GET"))
            .and(path("/sandboxes/sbx-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        RemoteSandboxProvider::new(server.uri(), "sandbox.test")
            .connect("sbx-1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_returns_sandbox_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .and(body_json(serde_json::json!({"template_id": "nextjs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sandbox_id": "sbx-1"})))
            .mount(&server)
            .await;

        let provider = RemoteSandboxProvider::new(server.uri(), "sandbox.test");
        assert_eq!(provider.create("nextjs").await.unwrap(), "sbx-1");
    }

    #[tokio::test]
    async fn test_connect_unknown_sandbox() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sandboxes/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = RemoteSandboxProvider::new(server.uri(), "sandbox.test");
        assert!(matches!(
            provider.connect("nope").await,
            Err(SandboxError::UnknownSandbox(_))
        ));
    }

    #[tokio::test]
    async fn test_run_command_decodes_frames() {
        let server = MockServer::start().await;
        let sandbox = connected(&server).await;
        let body = "{\"stdout\":\"hello\\n\"}\n{\"stderr\":\"warn\\n\"}\n{\"exit_code\":0}\n";
        Mock::given(method("POST"))
            .and(path("/sandboxes/sbx-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut chunks = Vec::new();
        let output = sandbox
            .run_command("echo hello", &mut |chunk| chunks.push(chunk))
            .await
            .unwrap();

        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "warn\n");
        assert_eq!(chunks[0], OutputChunk::Stdout("hello\n".to_string()));
    }

    #[tokio::test]
    async fn test_run_command_non_zero_exit() {
        let server = MockServer::start().await;
        let sandbox = connected(&server).await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sbx-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"stdout\":\"x\"}\n{\"exit_code\":2}"))
            .mount(&server)
            .await;

        let mut seen = 0;
        let result = sandbox.run_command("false", &mut |_| seen += 1).await;
        assert!(matches!(result, Err(SandboxError::CommandExit { exit_code: 2 })));
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let server = MockServer::start().await;
        let sandbox = connected(&server).await;
        Mock::given(method("GET"))
            .and(path("/sandboxes/sbx-1/files"))
            .and(query_param("path", "missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(matches!(
            sandbox.read_file("missing.txt").await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_exposed_host_scheme() {
        let server = MockServer::start().await;
        let sandbox = connected(&server).await;
        assert_eq!(
            sandbox.exposed_host(3000).await.unwrap(),
            "3000-sbx-1.sandbox.test"
        );
    }
}
