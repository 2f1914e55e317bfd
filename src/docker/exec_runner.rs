// ABOUTME: Runs shell commands inside containers and tracks each invocation through a pid file
// The wrapper shell records its own pid so later liveness checks and kills target the same process

use super::container_manager::ContainerError;
use crate::logs::sink::{CollectingSink, OutputSink};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PID_FILE_PREFIX: &str = "/tmp/machine-exec-";
pub const PID_FILE_SUFFIX: &str = ".pid";

/// What the runtime hands back when an exec session starts.
pub enum ExecOutput {
    Detached,
    /// Raw output chunks; chunk boundaries need not align with lines.
    Attached(BoxStream<'static, Result<Vec<u8>, ContainerError>>),
}

/// The remote container runtime's exec API.
pub trait ExecBackend: Send + Sync {
    /// Create an exec session and return its id
    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        attach_output: bool,
        argv: Vec<String>,
    ) -> BoxFuture<'a, Result<String, ContainerError>>;

    fn start_exec<'a>(
        &'a self,
        exec_id: &'a str,
        detach: bool,
    ) -> BoxFuture<'a, Result<ExecOutput, ContainerError>>;
}

/// One command launched inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    container_id: String,
    /// The caller's command line, before pid-file wrapping
    command: String,
    pid_file_path: Option<String>,
}

impl ExecHandle {
    /// A handle for a command that was never started; liveness checks and
    /// kills on it do nothing.
    pub fn unstarted(container_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            command: command.into(),
            pid_file_path: None,
        }
    }

    /// Re-attach to a process launched earlier, given its pid file
    pub fn from_pid_file(container_id: impl Into<String>, pid_file_path: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            command: String::new(),
            pid_file_path: Some(pid_file_path.into()),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid_file_path(&self) -> Option<&str> {
        self.pid_file_path.as_deref()
    }
}

/// Splits raw output chunks into lines.
///
/// Decoding is lossy UTF-8, a trailing `\r` is dropped, and a final line
/// without a newline is returned by [`LineAssembler::finish`].
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(Self::format(&self.partial));
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = Self::format(&self.partial);
        self.partial.clear();
        Some(line)
    }

    fn format(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

fn generate_pid_file_path() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}{}", PID_FILE_PREFIX, &suffix[..8], PID_FILE_SUFFIX)
}

/// The shell fragment that records its pid, cleans up on exit, then runs `command`.
pub fn wrap_command(pid_file: &str, command: &str) -> String {
    format!(
        "trap '[ -z \"$(jobs -p)\" ] || kill $(jobs -p); [ -e {pid} ] && rm {pid}' EXIT; echo $$>{pid}; {command}",
        pid = pid_file,
    )
}

fn liveness_probe(pid_file: &str) -> String {
    format!(
        "if [ -r {pid} ]; then kill -0 $(cat {pid}) 2>&1; else echo \"no pid file {pid}\"; fi",
        pid = pid_file,
    )
}

fn kill_command(pid_file: &str) -> String {
    format!("[ -r {pid} ] && kill $(cat {pid})", pid = pid_file)
}

fn shell_argv(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

pub struct ExecRunner<B> {
    backend: B,
}

impl<B: ExecBackend> ExecRunner<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Launch `command` inside the container.
    ///
    /// Without a sink the exec is detached and this returns as soon as the
    /// runtime accepted it. With a sink it waits for the output stream to end,
    /// writing every line to the sink.
    pub async fn start(
        &self,
        container_id: &str,
        command: &str,
        sink: Option<&dyn OutputSink>,
    ) -> Result<ExecHandle, ContainerError> {
        let pid_file = generate_pid_file_path();
        let argv = shell_argv(wrap_command(&pid_file, command));

        info!(
            "Starting exec in container {} (pid file {})",
            container_id, pid_file
        );
        self.run(container_id, argv, sink).await?;

        Ok(ExecHandle {
            container_id: container_id.to_string(),
            command: command.to_string(),
            pid_file_path: Some(pid_file),
        })
    }

    /// Whether the process behind `handle` is still running
    pub async fn is_alive(&self, handle: &ExecHandle) -> Result<bool, ContainerError> {
        let Some(pid_file) = handle.pid_file_path() else {
            return Ok(false);
        };

        let output = CollectingSink::new();
        self.run(
            handle.container_id(),
            shell_argv(liveness_probe(pid_file)),
            Some(&output),
        )
        .await?;

        let lines = output.take();
        let alive = lines.iter().all(|line| line.trim().is_empty());
        if !alive {
            debug!("Liveness probe for {}: {}", pid_file, lines.join(" "));
        }
        Ok(alive)
    }

    /// Send a termination signal to the process behind `handle`. Does not wait.
    pub async fn kill(&self, handle: &ExecHandle) -> Result<(), ContainerError> {
        let Some(pid_file) = handle.pid_file_path() else {
            return Ok(());
        };

        info!(
            "Killing exec in container {} (pid file {})",
            handle.container_id(),
            pid_file
        );
        self.run(handle.container_id(), shell_argv(kill_command(pid_file)), None)
            .await
    }

    async fn run(
        &self,
        container_id: &str,
        argv: Vec<String>,
        sink: Option<&dyn OutputSink>,
    ) -> Result<(), ContainerError> {
        let attach = sink.is_some();
        let exec_id = self.backend.create_exec(container_id, attach, argv).await?;
        let output = self.backend.start_exec(&exec_id, !attach).await?;

        match (sink, output) {
            (Some(sink), ExecOutput::Attached(mut stream)) => {
                let mut lines = LineAssembler::default();
                while let Some(chunk) = stream.next().await {
                    for line in lines.push(&chunk?) {
                        sink.write_line(&line);
                    }
                }
                if let Some(line) = lines.finish() {
                    sink.write_line(&line);
                }
            }
            (Some(_), ExecOutput::Detached) => {
                warn!("Exec {} was started detached; no output to forward", exec_id);
            }
            (None, _) => debug!("Exec {} started detached", exec_id),
        }
        Ok(())
    }
}
