//! # forge-protocol: shared contract for message-versioned workspaces
//!
//! This crate defines the types, error taxonomy, and collaborator ports that
//! the workspace, history, and build crates agree on.
//!
//! It has no runtime dependencies (no tokio, no axum) so adapters can depend
//! on it without pulling the engine in.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (ProjectId, MessageId, BuildId)
//! - [`operation`]: FileOperation, the AI-proposed edit sum type
//! - [`file`]: FileRecord, FileContent, DirectoryNode (derived workspace views)
//! - [`message`]: Message, MessageRole, ProjectRecord
//! - [`build`]: BuildTask, BuildStatus, LogEntry, LogLevel
//! - [`ports`]: ProjectStore and OutputChannel collaborator traits
//! - [`error`]: ForgeError, ForgeResult

pub mod build;
pub mod error;
pub mod file;
pub mod ids;
pub mod message;
pub mod operation;
pub mod ports;

pub use build::{BuildStatus, BuildTask, LogEntry, LogLevel, QueueStatus};
pub use error::{ForgeError, ForgeResult};
pub use file::{DirectoryNode, FileContent, FileRecord, FileStatus, NodeKind};
pub use ids::{BuildId, MessageId, ProjectId};
pub use message::{Message, MessageRole, ProjectRecord};
pub use operation::FileOperation;
pub use ports::{OutputChannel, ProjectStore};
