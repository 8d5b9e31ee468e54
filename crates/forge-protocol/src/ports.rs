//! Collaborator ports.
//!
//! These traits are the only boundary between the engine and its external
//! collaborators: the store that owns projects and messages, and the live
//! channel a streaming compile writes to.
//!
//! Object-safety note: traits use `async-trait` for async dyn-dispatch.

use crate::error::ForgeResult;
use crate::ids::ProjectId;
use crate::message::{Message, ProjectRecord};
use async_trait::async_trait;

/// Opaque project/message persistence. The engine never implements storage
/// itself; it reads a project view and asks for truncation or appends.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn project(&self, project_id: &ProjectId) -> ForgeResult<ProjectRecord>;

    /// Keep messages `0..=keep_up_to_index` and drop the rest.
    async fn truncate_messages(
        &self,
        project_id: &ProjectId,
        keep_up_to_index: usize,
    ) -> ForgeResult<()>;

    /// Append messages, assigning each the next `sequence` for the project.
    async fn append_messages(
        &self,
        project_id: &ProjectId,
        messages: Vec<Message>,
    ) -> ForgeResult<Vec<Message>>;
}

/// Push/close text channel that a streaming compile writes framed lines to.
#[async_trait]
pub trait OutputChannel: Send {
    /// Returns `false` once the consumer has gone away; callers keep going.
    async fn push(&mut self, chunk: String) -> bool;

    /// Idempotent.
    async fn close(&mut self);
}
