use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::Invocation;
use crate::{ClaudeQueryError, Result};

// ─── ClaudeProcess ────────────────────────────────────────────────────────

/// A running `claude --print` subprocess with all three standard streams
/// piped.
///
/// Each stream has a single owner: stdin goes to the prompt-writer task,
/// stdout to whoever decodes, and stderr to a background drain task whose
/// output ends up in [`ClaudeQueryError::Process`] or, after a decode
/// failure, in the log.
///
/// The child is killed when the handle is dropped before it exits.
pub(crate) struct ClaudeProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl ClaudeProcess {
    /// Spawn the agent described by `invocation`.
    ///
    /// The environment from the invocation is applied to the child only.
    pub(crate) fn start(invocation: &Invocation) -> Result<Self> {
        let mut cmd = Command::new(&invocation.executable);
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ClaudeQueryError::connection("failed to start Claude CLI", e))?;
        debug!(pid = ?child.id(), "claude process started");

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        // Drain stderr from the start so a chatty agent cannot block on a
        // full pipe while we are still reading stdout.
        let stderr = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = BufReader::new(stderr).read_to_end(&mut buf).await {
                debug!(error = %e, "stderr drain stopped early");
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
        })
    }

    /// Spawn an arbitrary command in place of the agent.
    /// Used in unit tests to inject a command that emits fixed JSON lines.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    /// Write the prompt on its own task, then close stdin.
    ///
    /// Closing stdin is how the agent learns the prompt is complete. The
    /// returned handle must be joined; a failed write is a `Connection` error.
    pub(crate) fn write_input(&mut self, prompt: String) -> Result<JoinHandle<Result<()>>> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| connection_error("stdin already closed"))?;

        Ok(tokio::spawn(async move {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ClaudeQueryError::connection("failed to write prompt to stdin", e))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| ClaudeQueryError::connection("failed to close stdin", e))?;
            Ok(())
        }))
    }

    /// Stdout as a line source. Can be taken once.
    pub(crate) fn take_lines(&mut self) -> Result<OutputLines> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| connection_error("stdout already taken"))?;
        Ok(OutputLines {
            reader: BufReader::new(stdout),
            buf: Vec::new(),
        })
    }

    /// Read stdout until EOF. Invalid UTF-8 becomes U+FFFD.
    pub(crate) async fn read_to_end(&mut self) -> Result<String> {
        let mut stdout = self
            .stdout
            .take()
            .ok_or_else(|| connection_error("stdout already taken"))?;
        let mut buf = Vec::new();
        stdout
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ClaudeQueryError::connection("error reading CLI output", e))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Wait for the child to exit.
    ///
    /// A non-zero exit becomes [`ClaudeQueryError::Process`] carrying the
    /// complete stderr text. Termination by signal reports exit code `-1`.
    pub(crate) async fn wait(&mut self) -> Result<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ClaudeQueryError::connection("CLI process failed", e))?;

        if status.success() {
            debug!("claude process exited successfully");
            return Ok(());
        }

        let stderr = match self.stderr.take() {
            Some(drain) => drain.await.unwrap_or_else(|e| {
                debug!(error = %e, "stderr drain task failed");
                String::new()
            }),
            None => String::new(),
        };
        let exit_code = status.code().unwrap_or(-1);
        warn!(exit_code, stderr = %stderr.trim_end(), "claude process exited with an error");

        Err(ClaudeQueryError::Process { exit_code, stderr })
    }

    /// Kill the agent after a fatal protocol error and return the stderr it
    /// wrote so far.
    ///
    /// Waits at most [`STDERR_GRACE`] for the drain: a grandchild holding
    /// the pipe open must not stall error reporting.
    pub(crate) async fn abort(&mut self) -> String {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "failed to kill claude process");
        }
        let Some(drain) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_GRACE, drain).await {
            Ok(Ok(stderr)) => stderr,
            Ok(Err(e)) => {
                debug!(error = %e, "stderr drain task failed");
                String::new()
            }
            Err(_) => String::new(),
        }
    }
}

/// How long [`ClaudeProcess::abort`] waits for stderr after the kill.
const STDERR_GRACE: Duration = Duration::from_millis(500);

// ─── OutputLines ──────────────────────────────────────────────────────────

/// Newline-delimited reader over the agent's stdout.
///
/// Lines are split on raw bytes, so a line that is not valid UTF-8 still
/// reaches the decoder, with the bad bytes replaced by U+FFFD.
pub(crate) struct OutputLines {
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl OutputLines {
    /// The next line without its terminator, or `None` at EOF.
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| ClaudeQueryError::connection("error reading CLI output", e))?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

fn missing_pipe(name: &str) -> ClaudeQueryError {
    connection_error(&format!("failed to create {name} pipe"))
}

fn connection_error(message: &str) -> ClaudeQueryError {
    ClaudeQueryError::Connection {
        message: message.to_owned(),
        source: None,
    }
}

/// Join a prompt-writer task, folding a panic into a `Connection` error.
pub(crate) async fn join_writer(writer: JoinHandle<Result<()>>) -> Result<()> {
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(ClaudeQueryError::connection(
            "prompt writer task failed",
            std::io::Error::other(e),
        )),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
