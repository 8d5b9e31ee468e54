use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use forge_protocol::{DirectoryNode, ForgeResult, OutputChannel};
use forge_workspace::{WorkspaceFs, copy_tree, remove_tree};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::commands::{BuildCommands, CommandLine, build_commands};
use crate::runner::{LineSink, OutputLine, ProcessRunner};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Directories checked, in order, for build output after a successful compile.
pub const OUTPUT_DIRS: [&str; 3] = ["dist", "build", "out"];

/// Relative path to file content.
pub type FileTree = BTreeMap<String, String>;

pub fn data_frame(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

fn marker(token: &str, command: &CommandLine) -> String {
    format!("<{token}>{command}<{token}>")
}

/// Where a compile runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "files", rename_all = "snake_case")]
pub enum CompileMode {
    /// Directly in the live workspace.
    #[default]
    InPlace,
    /// In a throwaway copy of the workspace.
    ScratchCopy,
    /// In a throwaway directory holding exactly these files.
    Materialized(FileTree),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded { exit_code: i32, duration_ms: i64 },
    Failed { reason: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub command: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileReport {
    pub succeeded: bool,
    pub steps: Vec<StepReport>,
    /// Every emitted payload (output lines and command markers), newline-joined.
    pub transcript: String,
    /// Structure of the first of [`OUTPUT_DIRS`] present after a successful build.
    pub output_tree: Option<DirectoryNode>,
    /// `false` if the channel consumer went away mid-stream.
    pub consumer_connected: bool,
}

/// Runs `install` then `build`, framing everything onto an [`OutputChannel`].
#[derive(Debug, Clone)]
pub struct CompileStreamer {
    runner: ProcessRunner,
    workspace: WorkspaceFs,
    scratch_root: PathBuf,
}

impl CompileStreamer {
    pub fn new(scratch_root: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            runner: ProcessRunner::new(Some(command_timeout)),
            workspace: WorkspaceFs::default(),
            scratch_root: scratch_root.into(),
        }
    }

    pub fn with_workspace(mut self, workspace: WorkspaceFs) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.runner.timeout()
    }

    pub async fn compile(
        &self,
        workspace: &Path,
        mode: CompileMode,
        channel: &mut dyn OutputChannel,
    ) -> CompileReport {
        self.compile_with(workspace, mode, None, channel).await
    }

    /// Like [`compile`](Self::compile), with explicit commands instead of ones
    /// resolved from the target's `package.json`.
    ///
    /// Never fails: every problem becomes a frame. The stream always ends with
    /// [`DONE_FRAME`] and the channel is closed exactly once.
    #[instrument(skip(self, workspace, mode, commands, channel), fields(workspace = %workspace.display()))]
    pub async fn compile_with(
        &self,
        workspace: &Path,
        mode: CompileMode,
        commands: Option<BuildCommands>,
        channel: &mut dyn OutputChannel,
    ) -> CompileReport {
        let mut frames = FrameWriter {
            channel,
            transcript: Vec::new(),
            connected: true,
        };
        let mut report = CompileReport::default();

        match self.prepare(workspace, &mode).await {
            Ok(target) => {
                self.run_steps(&target.dir, commands, &mut frames, &mut report)
                    .await;
                if target.scratch
                    && let Err(error) = remove_tree(&target.dir).await
                {
                    warn!(dir = %target.dir.display(), %error, "failed removing compile scratch directory");
                }
            }
            Err(error) => {
                warn!(%error, "failed preparing compile directory");
                frames.emit(format!("error: {error}")).await;
            }
        }

        report.consumer_connected = frames.finish().await;
        report.transcript = frames.transcript.join("\n");
        info!(succeeded = report.succeeded, "compile finished");
        report
    }

    async fn run_steps(
        &self,
        dir: &Path,
        commands: Option<BuildCommands>,
        frames: &mut FrameWriter<'_>,
        report: &mut CompileReport,
    ) {
        let commands = match commands {
            Some(commands) => commands,
            None => match build_commands(dir).await {
                Ok(commands) => commands,
                Err(error) => {
                    warn!(%error, "no build commands for compile target");
                    frames.emit(format!("error: {error}")).await;
                    return;
                }
            },
        };

        let mut failed = false;
        for (name, command) in commands.steps() {
            if failed {
                report.steps.push(StepReport {
                    name: name.to_owned(),
                    command: command.to_string(),
                    status: StepStatus::Skipped,
                });
                continue;
            }

            frames.emit(marker("COMMAND-START", command)).await;
            let status = match self.runner.run(command, dir, frames).await {
                Ok(outcome) => {
                    frames.emit(marker("COMMAND-END", command)).await;
                    StepStatus::Succeeded {
                        exit_code: outcome.exit_code,
                        duration_ms: outcome.duration_ms,
                    }
                }
                Err(error) => {
                    warn!(step = name, %error, "compile step failed");
                    frames.emit(marker("COMMAND-FAILED", command)).await;
                    failed = true;
                    StepStatus::Failed {
                        reason: error.to_string(),
                    }
                }
            };
            report.steps.push(StepReport {
                name: name.to_owned(),
                command: command.to_string(),
                status,
            });
        }

        if !failed {
            report.succeeded = true;
            report.output_tree = self.output_tree(dir).await;
        }
    }

    async fn output_tree(&self, dir: &Path) -> Option<DirectoryNode> {
        for name in OUTPUT_DIRS {
            let candidate = dir.join(name);
            let is_dir = fs::metadata(&candidate)
                .await
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            return match self.workspace.directory_structure(&candidate).await {
                Ok(tree) => Some(tree),
                Err(error) => {
                    warn!(dir = %candidate.display(), %error, "failed reading build output");
                    None
                }
            };
        }
        None
    }

    async fn prepare(&self, workspace: &Path, mode: &CompileMode) -> ForgeResult<CompileTarget> {
        let files = match mode {
            CompileMode::InPlace => {
                return Ok(CompileTarget {
                    dir: workspace.to_path_buf(),
                    scratch: false,
                });
            }
            CompileMode::ScratchCopy => None,
            CompileMode::Materialized(files) => Some(files),
        };

        let dir = self
            .scratch_root
            .join(format!("compile-{}", uuid::Uuid::new_v4()));
        let filled = match files {
            None => copy_tree(workspace, &dir).await.map(|_| ()),
            Some(files) => self.materialize(&dir, files).await,
        };
        if let Err(error) = filled {
            if let Err(cleanup_error) = remove_tree(&dir).await {
                warn!(error = %cleanup_error, "failed removing compile scratch directory");
            }
            return Err(error);
        }

        debug!(dir = %dir.display(), "compile scratch directory prepared");
        Ok(CompileTarget { dir, scratch: true })
    }

    async fn materialize(&self, dir: &Path, files: &FileTree) -> ForgeResult<()> {
        fs::create_dir_all(dir).await?;
        for (path, content) in files {
            self.workspace
                .write_file(dir, path, content.as_bytes())
                .await?;
        }
        Ok(())
    }
}

struct CompileTarget {
    dir: PathBuf,
    scratch: bool,
}

struct FrameWriter<'a> {
    channel: &'a mut dyn OutputChannel,
    transcript: Vec<String>,
    connected: bool,
}

impl FrameWriter<'_> {
    async fn emit(&mut self, payload: String) {
        if self.connected && !self.channel.push(data_frame(&payload)).await {
            debug!("compile stream consumer disconnected");
            self.connected = false;
        }
        self.transcript.push(payload);
    }

    async fn finish(&mut self) -> bool {
        if self.connected && !self.channel.push(DONE_FRAME.to_owned()).await {
            self.connected = false;
        }
        self.channel.close().await;
        self.connected
    }
}

#[async_trait]
impl LineSink for FrameWriter<'_> {
    async fn line(&mut self, line: OutputLine) {
        if line.text.trim().is_empty() {
            return;
        }
        self.emit(line.text).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use tokio::fs;
    use tokio::sync::mpsc;

    use super::*;
    use crate::sink::ChannelSink;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn drain(mut receiver: mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }

    async fn compile_in(
        root: &Path,
        streamer: &CompileStreamer,
        mode: CompileMode,
        commands: Option<BuildCommands>,
    ) -> (CompileReport, Vec<String>) {
        let (mut sink, receiver) = ChannelSink::new(1024);
        let report = streamer
            .compile_with(&root.join("development"), mode, commands, &mut sink)
            .await;
        assert!(sink.is_closed());
        (report, drain(receiver))
    }

    async fn fixture(name: &str) -> Result<(PathBuf, CompileStreamer)> {
        let root = unique_test_root(name);
        fs::create_dir_all(root.join("development")).await?;
        let streamer = CompileStreamer::new(root.join("scratch"), DEFAULT_COMMAND_TIMEOUT);
        Ok((root, streamer))
    }

    #[tokio::test]
    async fn failing_build_is_framed_and_install_stays_successful() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-fail").await?;
        let commands = BuildCommands::custom("echo; echo installing", "echo building; exit 1");

        let (report, frames) =
            compile_in(&root, &streamer, CompileMode::InPlace, Some(commands)).await;

        assert_eq!(
            frames,
            vec![
                "data: <COMMAND-START>echo; echo installing<COMMAND-START>\n\n",
                "data: installing\n\n",
                "data: <COMMAND-END>echo; echo installing<COMMAND-END>\n\n",
                "data: <COMMAND-START>echo building; exit 1<COMMAND-START>\n\n",
                "data: building\n\n",
                "data: <COMMAND-FAILED>echo building; exit 1<COMMAND-FAILED>\n\n",
                DONE_FRAME,
            ]
        );
        assert!(!report.succeeded);
        assert!(matches!(report.steps[0].status, StepStatus::Succeeded { exit_code: 0, .. }));
        assert!(matches!(report.steps[1].status, StepStatus::Failed { .. }));
        assert!(report.transcript.contains("installing\n"));
        assert!(report.consumer_connected);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_install_skips_build() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-install").await?;
        let (report, frames) = compile_in(
            &root,
            &streamer,
            CompileMode::InPlace,
            Some(BuildCommands::custom("exit 7", "echo never")),
        )
        .await;

        assert_eq!(frames.len(), 3);
        assert!(frames[1].contains("<COMMAND-FAILED>exit 7<COMMAND-FAILED>"));
        assert_eq!(frames[2], DONE_FRAME);
        assert!(matches!(report.steps[1].status, StepStatus::Skipped));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_command_is_a_failure() -> Result<()> {
        let root = unique_test_root("forge-compile-timeout");
        fs::create_dir_all(root.join("development")).await?;
        let streamer = CompileStreamer::new(root.join("scratch"), Duration::from_millis(200));

        let (report, frames) = compile_in(
            &root,
            &streamer,
            CompileMode::InPlace,
            Some(BuildCommands::custom("sleep 5", "echo never")),
        )
        .await;

        assert!(frames.iter().any(|f| f.contains("<COMMAND-FAILED>sleep 5<COMMAND-FAILED>")));
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
        assert!(!report.succeeded);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn scratch_copy_leaves_workspace_untouched_and_reports_output() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-scratch").await?;
        fs::write(root.join("development/index.html"), "<h1>hi</h1>").await?;

        let (report, _) = compile_in(
            &root,
            &streamer,
            CompileMode::ScratchCopy,
            Some(BuildCommands::custom("true", "mkdir -p dist && cp index.html dist/")),
        )
        .await;

        assert!(report.succeeded);
        let tree = report.output_tree.expect("dist should be reported");
        assert_eq!(tree.name, "dist");
        assert!(tree.find("index.html").is_some());
        assert!(!fs::try_exists(root.join("development/dist")).await?);
        let mut leftovers = fs::read_dir(root.join("scratch")).await?;
        assert!(leftovers.next_entry().await?.is_none());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn materialized_tree_is_compiled_alone() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-materialized").await?;
        fs::write(root.join("development/stale.txt"), "old").await?;
        let files = FileTree::from([("src/index.html".to_owned(), "<p/>".to_owned())]);

        let (report, _) = compile_in(
            &root,
            &streamer,
            CompileMode::Materialized(files),
            Some(BuildCommands::custom("test -f src/index.html", "test ! -e stale.txt")),
        )
        .await;

        assert!(report.succeeded);
        assert!(report.output_tree.is_none());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_manifest_still_ends_with_done() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-unsupported").await?;
        let (report, frames) = compile_in(&root, &streamer, CompileMode::InPlace, None).await;

        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("data: error: unsupported project"));
        assert_eq!(frames[1], DONE_FRAME);
        assert!(report.steps.is_empty());
        assert!(!report.succeeded);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn departed_consumer_does_not_stop_the_compile() -> Result<()> {
        let (root, streamer) = fixture("forge-compile-departed").await?;
        let (mut sink, receiver) = ChannelSink::new(1);
        drop(receiver);

        let report = streamer
            .compile_with(
                &root.join("development"),
                CompileMode::InPlace,
                Some(BuildCommands::custom("echo a", "touch built.txt")),
                &mut sink,
            )
            .await;

        assert!(report.succeeded);
        assert!(!report.consumer_connected);
        assert!(fs::try_exists(root.join("development/built.txt")).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
