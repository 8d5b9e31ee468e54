use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use forge_protocol::{
    BuildId, BuildStatus, BuildTask, ForgeResult, LogEntry, LogLevel, Message, MessageRole,
    OutputChannel, ProjectId, ProjectStore, QueueStatus,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::commands::BuildCommands;
use crate::executor::{BUILD_COMPLETED, BUILD_STARTED, BuildExecutor};
use crate::logger::BuildLogger;
use crate::queue::{BuildQueue, QueuedBuild};
use crate::streamer::{CompileMode, CompileReport, CompileStreamer, DONE_FRAME, data_frame};

/// Message `type` used for recorded compile transcripts.
pub const BUILD_OUTPUT_KIND: &str = "build_output";

/// What happened to a foreground compile's transcript. Recording failures
/// never fail the compile itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TranscriptRecord {
    Recorded { message: Message },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ForegroundReport {
    pub compile: CompileReport,
    pub transcript: TranscriptRecord,
}

/// Both build modes over one command resolver and process runner:
/// `background` goes through the [`BuildQueue`] and writes a build log,
/// `foreground` streams frames to the caller and records a transcript.
#[derive(Clone)]
pub struct BuildPipeline {
    queue: BuildQueue,
    executor: BuildExecutor,
    streamer: CompileStreamer,
    store: Arc<dyn ProjectStore>,
}

impl BuildPipeline {
    pub fn new(
        queue: BuildQueue,
        executor: BuildExecutor,
        streamer: CompileStreamer,
        store: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            queue,
            executor,
            streamer,
            store,
        }
    }

    pub fn logger(&self) -> &BuildLogger {
        self.executor.logger()
    }

    pub fn streamer(&self) -> &CompileStreamer {
        &self.streamer
    }

    pub async fn background(&self, build_dir: impl Into<PathBuf>) -> Result<QueuedBuild> {
        self.background_with(build_dir, None).await
    }

    #[instrument(skip(self, build_dir, commands))]
    pub async fn background_with(
        &self,
        build_dir: impl Into<PathBuf>,
        commands: Option<BuildCommands>,
    ) -> Result<QueuedBuild> {
        let build_dir = build_dir.into();
        let build_id = BuildId::new_uuid();
        self.logger()
            .record(
                &build_id,
                LogLevel::Info,
                "build queued",
                json!({ "dir": build_dir.display().to_string() }),
            )
            .await;

        let executor = self.executor.clone();
        let job_id = build_id.clone();
        let enqueued = self
            .queue
            .enqueue(build_id.clone(), async move {
                match commands {
                    Some(commands) => executor.execute_with(&build_dir, &job_id, &commands).await,
                    None => executor.execute(&build_dir, &job_id).await,
                }
            })
            .await;
        let queued = match enqueued {
            Ok(queued) => queued,
            Err(error) => {
                self.logger().release(&build_id);
                return Err(error);
            }
        };
        info!(build_id = %queued.build_id(), "background build queued");
        Ok(queued)
    }

    pub async fn foreground(
        &self,
        project_id: &ProjectId,
        mode: CompileMode,
        channel: &mut dyn OutputChannel,
    ) -> ForgeResult<ForegroundReport> {
        self.foreground_with(project_id, mode, None, channel).await
    }

    /// Compile a project's workspace, streaming frames to `channel`, then
    /// append the transcript as a system message.
    #[instrument(skip(self, mode, commands, channel), fields(project_id = %project_id))]
    pub async fn foreground_with(
        &self,
        project_id: &ProjectId,
        mode: CompileMode,
        commands: Option<BuildCommands>,
        channel: &mut dyn OutputChannel,
    ) -> ForgeResult<ForegroundReport> {
        let project = match self.store.project(project_id).await {
            Ok(project) => project,
            Err(error) => {
                channel.push(data_frame(&format!("error: {error}"))).await;
                channel.push(DONE_FRAME.to_owned()).await;
                channel.close().await;
                return Err(error);
            }
        };

        let compile = self
            .streamer
            .compile_with(&project.development_path, mode, commands, channel)
            .await;

        let record = Message::new(
            None,
            MessageRole::System,
            compile.transcript.clone(),
            BUILD_OUTPUT_KIND,
        );
        let transcript = match self.store.append_messages(project_id, vec![record]).await {
            Ok(mut appended) if !appended.is_empty() => TranscriptRecord::Recorded {
                message: appended.remove(0),
            },
            Ok(_) => TranscriptRecord::Failed {
                error: "store appended no message".to_owned(),
            },
            Err(error) => {
                warn!(%error, "failed recording compile transcript");
                TranscriptRecord::Failed {
                    error: error.to_string(),
                }
            }
        };

        Ok(ForegroundReport {
            compile,
            transcript,
        })
    }

    /// Queue state merged with the persisted log. Builds the queue no longer
    /// tracks are rebuilt from their log alone; `None` when there is no log.
    pub async fn task(&self, build_id: &BuildId) -> ForgeResult<Option<BuildTask>> {
        let logs = self.logger().logs(build_id).await?;
        match self.queue.task(build_id) {
            Some(mut task) => {
                task.logs = logs;
                Ok(Some(task))
            }
            None => Ok(task_from_log(build_id, logs)),
        }
    }

    pub async fn logs(&self, build_id: &BuildId) -> ForgeResult<Vec<LogEntry>> {
        self.logger().logs(build_id).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }
}

/// A logged build that is not tracked anymore has finished, or its process
/// went away mid-build; only a `build completed` record without errors counts
/// as success.
fn task_from_log(build_id: &BuildId, logs: Vec<LogEntry>) -> Option<BuildTask> {
    let last = logs.last()?;
    let failed = logs.iter().any(|entry| entry.level == LogLevel::Error);
    let status = if !failed && last.message == BUILD_COMPLETED {
        BuildStatus::Success
    } else {
        BuildStatus::Failed
    };
    let start_time = logs
        .iter()
        .find(|entry| entry.message == BUILD_STARTED)
        .map(|entry| entry.timestamp);
    let end_time = Some(last.timestamp);

    let mut task = BuildTask::pending(build_id.clone());
    task.status = status;
    task.start_time = start_time;
    task.end_time = end_time;
    task.logs = logs;
    Some(task)
}
