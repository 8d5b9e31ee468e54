use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use forge_protocol::{BuildId, LogLevel};
use serde_json::json;
use tracing::{info, instrument};

use crate::commands::{BuildCommands, build_commands};
use crate::logger::BuildLogger;
use crate::runner::{LineSink, OutputLine, OutputStream, ProcessRunner};

pub(crate) const BUILD_STARTED: &str = "build started";
pub(crate) const BUILD_COMPLETED: &str = "build completed";

/// Runs install and build for a queued build, writing everything to its log.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    runner: ProcessRunner,
    logger: BuildLogger,
}

impl BuildExecutor {
    pub fn new(runner: ProcessRunner, logger: BuildLogger) -> Self {
        Self { runner, logger }
    }

    pub fn logger(&self) -> &BuildLogger {
        &self.logger
    }

    #[instrument(skip(self, build_dir), fields(build_id = %build_id, dir = %build_dir.display()))]
    pub async fn execute(&self, build_dir: &Path, build_id: &BuildId) -> Result<()> {
        self.logger
            .record(
                build_id,
                LogLevel::Info,
                BUILD_STARTED,
                json!({ "dir": build_dir.display().to_string() }),
            )
            .await;

        let commands = match build_commands(build_dir).await {
            Ok(commands) => commands,
            Err(error) => {
                self.logger
                    .record(build_id, LogLevel::Error, error.to_string(), json!({}))
                    .await;
                self.logger.release(build_id);
                return Err(error).context("failed resolving build commands");
            }
        };
        self.execute_with(build_dir, build_id, &commands).await
    }

    /// Run explicit commands; `execute` resolves them from `package.json`.
    pub async fn execute_with(
        &self,
        build_dir: &Path,
        build_id: &BuildId,
        commands: &BuildCommands,
    ) -> Result<()> {
        let result = self.run_steps(build_dir, build_id, commands).await;
        self.logger.release(build_id);
        result
    }

    async fn run_steps(
        &self,
        build_dir: &Path,
        build_id: &BuildId,
        commands: &BuildCommands,
    ) -> Result<()> {
        for (step, command) in commands.steps() {
            self.logger
                .record(
                    build_id,
                    LogLevel::Info,
                    format!("running {command}"),
                    json!({ "step": step }),
                )
                .await;

            let mut sink = LogSink {
                logger: &self.logger,
                build_id,
                step,
            };
            match self.runner.run(command, build_dir, &mut sink).await {
                Ok(outcome) => {
                    self.logger
                        .record(
                            build_id,
                            LogLevel::Info,
                            format!("{step} finished"),
                            json!({ "exit_code": outcome.exit_code, "duration_ms": outcome.duration_ms }),
                        )
                        .await;
                }
                Err(error) => {
                    self.logger
                        .record(
                            build_id,
                            LogLevel::Error,
                            format!("{step} failed: {error}"),
                            json!({ "step": step, "command": command.as_str() }),
                        )
                        .await;
                    return Err(error).with_context(|| format!("{step} step failed"));
                }
            }
        }

        self.logger
            .record(build_id, LogLevel::Info, BUILD_COMPLETED, json!({}))
            .await;
        info!("build completed");
        Ok(())
    }
}

struct LogSink<'a> {
    logger: &'a BuildLogger,
    build_id: &'a BuildId,
    step: &'static str,
}

#[async_trait]
impl LineSink for LogSink<'_> {
    async fn line(&mut self, line: OutputLine) {
        if line.text.trim().is_empty() {
            return;
        }
        let level = match line.stream {
            OutputStream::Stdout => LogLevel::Info,
            OutputStream::Stderr => LogLevel::Warning,
        };
        self.logger
            .record(
                self.build_id,
                level,
                line.text,
                json!({ "step": self.step, "stream": line.stream }),
            )
            .await;
    }
}
