use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_protocol::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, instrument, warn};

use crate::commands::CommandLine;

const LINE_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Receives a running command's output, one line at a time, in arrival order.
#[async_trait]
pub trait LineSink: Send {
    async fn line(&mut self, line: OutputLine);
}

#[async_trait]
impl LineSink for Vec<OutputLine> {
    async fn line(&mut self, line: OutputLine) {
        self.push(line);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub exit_code: i32,
}

/// Runs shell command lines in a directory, streaming output as it arrives.
///
/// A non-zero exit is `CommandFailed`; exceeding the timeout kills the
/// command's whole process group and is `CommandTimeout`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[instrument(skip(self, command, cwd, sink), fields(command = %command, cwd = %cwd.display()))]
    pub async fn run(
        &self,
        command: &CommandLine,
        cwd: &Path,
        sink: &mut dyn LineSink,
    ) -> ForgeResult<CommandOutcome> {
        let started_at = Utc::now();
        let mut child = shell(command.as_str())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let mut group = GroupGuard { pid: child.id() };

        let (sender, mut receiver) = mpsc::channel(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                OutputStream::Stdout,
                sender.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                OutputStream::Stderr,
                sender.clone(),
            )));
        }
        drop(sender);

        let drive = async {
            while let Some(line) = receiver.recv().await {
                sink.line(line).await;
            }
            child.wait().await
        };
        let waited = match self.timeout {
            Some(limit) => timeout(limit, drive).await.ok(),
            None => Some(drive.await),
        };

        let Some(status) = waited else {
            let timeout_secs = self.timeout.map_or(0, |limit| limit.as_secs());
            warn!(timeout_secs, "command timed out; killing process group");
            group.kill();
            if let Err(error) = child.kill().await {
                warn!(%error, "failed killing timed out command");
            }
            for reader in &readers {
                reader.abort();
            }
            return Err(ForgeError::CommandTimeout {
                command: command.to_string(),
                timeout_secs,
            });
        };

        let status = status?;
        group.disarm();
        let ended_at = Utc::now();
        let exit_code = status.code().unwrap_or(-1);
        debug!(
            exit_code,
            duration_ms = (ended_at - started_at).num_milliseconds(),
            "command finished"
        );
        if !status.success() {
            return Err(ForgeError::CommandFailed {
                command: command.to_string(),
                exit_code,
            });
        }

        Ok(CommandOutcome {
            command: command.to_string(),
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_milliseconds(),
            exit_code,
        })
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.args(["/C", command]);
    shell
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.args(["-c", command]);
    #[cfg(unix)]
    shell.process_group(0);
    shell
}

/// The command leads its own process group; anything it forked is killed
/// with it unless the run completed.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_group(pid);
        }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(error) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, %error, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

async fn forward_lines<R>(reader: R, stream: OutputStream, sender: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\r')
                    .to_owned();
                if sender.send(OutputLine { stream, text }).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                debug!(%error, "output pipe closed with error");
                break;
            }
        }
    }
}
