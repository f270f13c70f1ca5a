//! Local sandbox backend
//!
//! Each sandbox is a directory `{root}/{sandbox_id}`. Commands run through
//! `/bin/sh -c` inside that directory with stdout/stderr streamed line by
//! line, and file paths are confined to it. Useful for development and for
//! running the whole workflow without a remote sandbox service.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommandOutput, OutputChunk, Sandbox, SandboxError, SandboxProvider};

/// Provisions directory-backed sandboxes
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    root: PathBuf,
    /// Directory holding one sub-directory per template, copied on create
    templates_dir: Option<PathBuf>,
    command_timeout: Duration,
}

impl LocalSandboxProvider {
    pub fn new(root: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            templates_dir: None,
            command_timeout,
        }
    }

    /// Seed new sandboxes from `{templates_dir}/{template_id}` when it exists
    pub fn with_templates(mut self, templates_dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(templates_dir.into());
        self
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> Result<PathBuf, SandboxError> {
        let mut components = Path::new(sandbox_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(sandbox_id)),
            _ => Err(SandboxError::UnknownSandbox(sandbox_id.to_string())),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template_id: &str) -> Result<String, SandboxError> {
        let sandbox_id = format!("sbx-{}", Uuid::now_v7().simple());
        let dir = self.sandbox_dir(&sandbox_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        if let Some(templates) = &self.templates_dir {
            let template = templates.join(template_id);
            if template.is_dir() {
                let dest = dir.clone();
                tokio::task::spawn_blocking(move || copy_dir(&template, &dest))
                    .await
                    .map_err(|e| SandboxError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
            } else {
                debug!(template_id, "Template directory not found, starting empty");
            }
        }

        info!(sandbox_id = %sandbox_id, template_id, "Local sandbox created");
        Ok(sandbox_id)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn Sandbox>, SandboxError> {
        let dir = self.sandbox_dir(sandbox_id)?;
        if !dir.is_dir() {
            return Err(SandboxError::UnknownSandbox(sandbox_id.to_string()));
        }
        Ok(Box::new(LocalSandbox {
            id: sandbox_id.to_string(),
            dir,
            command_timeout: self.command_timeout,
        }))
    }
}

/// A connected directory-backed sandbox
#[derive(Debug)]
pub struct LocalSandbox {
    id: String,
    dir: PathBuf,
    command_timeout: Duration,
}

impl LocalSandbox {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a sandbox path onto the host, rejecting anything outside the root.
    /// Absolute paths are taken relative to the sandbox root.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let mut resolved = self.dir.clone();
        let mut pushed = false;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    pushed = true;
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(path.to_string()));
                }
            }
        }
        if !pushed {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> Result<CommandOutput, SandboxError> {
        debug!(sandbox_id = %self.id, command, "Running command");

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Transport("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Transport("stderr was not captured".to_string()))?;

        let (tx, mut rx) = mpsc::channel(100);
        tokio::spawn(forward_lines(stdout, tx.clone(), OutputChunk::Stdout));
        tokio::spawn(forward_lines(stderr, tx, OutputChunk::Stderr));

        let mut output = CommandOutput::default();
        let collect = async {
            while let Some(chunk) = rx.recv().await {
                match &chunk {
                    OutputChunk::Stdout(s) => output.stdout.push_str(s),
                    OutputChunk::Stderr(s) => output.stderr.push_str(s),
                }
                on_output(chunk);
            }
            child.wait().await
        };

        let status = match timeout(self.command_timeout, collect).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(SandboxError::Timeout(self.command_timeout));
            }
        };

        output.exit_code = status.code().unwrap_or(-1);
        if output.exit_code != 0 {
            return Err(SandboxError::CommandExit {
                exit_code: output.exit_code,
            });
        }
        Ok(output)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let target = self.resolve(path)?;
        match tokio::fs::read_to_string(&target).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exposed_host(&self, port: u16) -> Result<String, SandboxError> {
        Ok(format!("localhost:{}", port))
    }
}

/// Forward each line read from `reader` as an output chunk.
///
/// Bytes that are not valid UTF-8 are replaced, and reading continues until
/// EOF. Only an I/O error stops the stream early.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<OutputChunk>, wrap: fn(String) -> OutputChunk)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read command output");
                break;
            }
        }
    }
}

/// Recursively copy a template directory into a fresh sandbox
fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}
