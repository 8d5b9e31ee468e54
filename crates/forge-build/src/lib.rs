//! Build orchestration for project workspaces.
//!
//! Two ways to build share one command resolver ([`commands`]) and one
//! process runner ([`runner`]):
//!
//! - background: [`BuildQueue`] runs [`BuildExecutor`] jobs one at a time,
//!   each writing a JSON-lines log through [`BuildLogger`];
//! - foreground: [`CompileStreamer`] frames output onto an
//!   [`forge_protocol::OutputChannel`] as server-sent-event `data:` lines.
//!
//! [`BuildPipeline`] ties both together with the project store.

pub mod commands;
pub mod executor;
pub mod logger;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod sink;
pub mod streamer;

pub use commands::{BuildCommands, CommandLine, PackageManager, build_commands, detect_package_manager};
pub use executor::BuildExecutor;
pub use logger::BuildLogger;
pub use pipeline::{BUILD_OUTPUT_KIND, BuildPipeline, ForegroundReport, TranscriptRecord};
pub use queue::{BuildJob, BuildQueue, QueuedBuild};
pub use runner::{CommandOutcome, LineSink, OutputLine, OutputStream, ProcessRunner};
pub use sink::ChannelSink;
pub use streamer::{
    CompileMode, CompileReport, CompileStreamer, DEFAULT_COMMAND_TIMEOUT, DONE_FRAME, FileTree,
    StepReport, StepStatus,
};
