//! Runs one script invocation as a child process.
//!
//! Standard output (and standard error when the command asks for it) is
//! read line by line while the process is alive. Under
//! [`OutputPolicy::Stream`] every line is delivered as soon as it is read;
//! under [`OutputPolicy::Collect`] lines are buffered and delivered as a
//! single message once the process exits, even when the buffer is empty.

use std::future;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::executor::{Invocation, ScriptError};
use super::status::ExecutionStatus;
use crate::command::OutputPolicy;
use crate::outbox::{Outbox, ReplyTarget};

/// Terminator appended to each collected line.
pub const LINE_TERMINATOR: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// Reads newline-terminated lines as bytes and decodes them lossily.
///
/// Partial lines stay in `buf` when a read is dropped inside `select!`,
/// so the next call picks up where the last one stopped.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Launches processes and delivers their output through an [`Outbox`].
#[derive(Clone)]
pub struct ProcessRunner {
    outbox: Outbox,
}

impl ProcessRunner {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }

    /// Run `invocation` to completion.
    ///
    /// Never fails: launch and I/O errors, timeouts and cancellation are
    /// logged, reported to the caller where appropriate, and mapped to an
    /// [`ExecutionStatus`].
    pub async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> ExecutionStatus {
        let name = invocation.command_name();
        let start = Instant::now();

        match self.execute(invocation, cancel, start).await {
            Ok(status) => {
                tracing::info!(
                    command = %name,
                    invocation_id = %invocation.id,
                    exit_code = ?status_code(&status),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Script finished",
                );
                status
            }
            Err(ScriptError::Timeout { elapsed_ms }) => {
                tracing::warn!(
                    command = %name,
                    invocation_id = %invocation.id,
                    elapsed_ms,
                    "Script timed out and was killed",
                );
                let notice = format!(
                    "The command {name} timed out after {}s and was stopped.",
                    elapsed_ms / 1000
                );
                self.outbox.deliver(&invocation.reply_to, &notice).await;
                ExecutionStatus::TimedOut
            }
            Err(ScriptError::Cancelled) => {
                tracing::info!(
                    command = %name,
                    invocation_id = %invocation.id,
                    "Script killed by shutdown",
                );
                ExecutionStatus::Cancelled
            }
            Err(e) => {
                tracing::error!(
                    command = %name,
                    invocation_id = %invocation.id,
                    error = %e,
                    "Script execution failed",
                );
                let notice = format!("Failed to execute the command {name}\nPlease try it again.");
                self.outbox.deliver(&invocation.reply_to, &notice).await;
                ExecutionStatus::Failed
            }
        }
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<ExecutionStatus, ScriptError> {
        let spec = &invocation.spec;
        let argv = invocation.argv();
        let (program, args) = argv.split_first().ok_or_else(|| {
            ScriptError::LaunchFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argument vector",
            ))
        })?;

        // `kill_on_drop(true)` ensures the child never outlives its worker.
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if spec.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ScriptError::LaunchFailed)?;

        tracing::info!(
            command = %spec.name,
            invocation_id = %invocation.id,
            reply_to = %invocation.reply_to,
            pid = ?child.id(),
            queued_ms = (chrono::Utc::now() - invocation.requested_at).num_milliseconds(),
            "Script started",
        );

        let mut stdout = child.stdout.take().map(LineReader::new);
        let mut stderr = child.stderr.take().map(LineReader::new);
        let mut collected = String::new();

        let timeout = spec.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Ok(Some(line)) => self.emit(invocation, &mut collected, line).await,
                    Ok(None) => stdout = None,
                    Err(e) => {
                        kill(&mut child, &spec.name).await;
                        return Err(ScriptError::Io(e));
                    }
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Ok(Some(line)) => self.emit(invocation, &mut collected, line).await,
                    Ok(None) => stderr = None,
                    Err(e) => {
                        kill(&mut child, &spec.name).await;
                        return Err(ScriptError::Io(e));
                    }
                },
                _ = cancel.cancelled() => {
                    kill(&mut child, &spec.name).await;
                    return Err(ScriptError::Cancelled);
                }
                _ = &mut deadline => {
                    kill(&mut child, &spec.name).await;
                    return Err(ScriptError::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        // Output closed; the process may still be running.
        let exit = tokio::select! {
            exit = child.wait() => exit.map_err(ScriptError::Io)?,
            _ = cancel.cancelled() => {
                kill(&mut child, &spec.name).await;
                return Err(ScriptError::Cancelled);
            }
            _ = &mut deadline => {
                kill(&mut child, &spec.name).await;
                return Err(ScriptError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        };

        if spec.output == OutputPolicy::Collect {
            match &invocation.reply_to {
                ReplyTarget::Remote(_) => {
                    self.outbox.deliver(&invocation.reply_to, &collected).await;
                }
                ReplyTarget::Console if !collected.is_empty() => {
                    self.outbox.print(&collected);
                }
                ReplyTarget::Console => {}
            }
        }

        Ok(ExecutionStatus::Completed {
            exit_code: exit.code(),
        })
    }

    async fn emit(&self, invocation: &Invocation, collected: &mut String, line: String) {
        match invocation.spec.output {
            OutputPolicy::Stream => self.outbox.deliver(&invocation.reply_to, &line).await,
            OutputPolicy::Collect => {
                collected.push_str(&line);
                collected.push_str(LINE_TERMINATOR);
            }
        }
    }
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut Option<LineReader<R>>,
) -> std::io::Result<Option<String>> {
    match reader {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

/// Request termination and reap the child.
async fn kill(child: &mut Child, command: &str) {
    tracing::info!(command = %command, pid = ?child.id(), "Killing script process");
    if let Err(e) = child.start_kill() {
        tracing::warn!(command = %command, error = %e, "Failed to signal script process");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(command = %command, error = %e, "Failed to reap script process");
    }
}

fn status_code(status: &ExecutionStatus) -> Option<i32> {
    match status {
        ExecutionStatus::Completed { exit_code } => *exit_code,
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
