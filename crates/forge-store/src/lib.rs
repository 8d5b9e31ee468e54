//! Persistence adapters implementing [`forge_protocol::ProjectStore`].
//!
//! - [`InMemoryProjectStore`] keeps everything in a map; used by tests and
//!   embedders that own persistence elsewhere.
//! - [`FileProjectStore`] keeps one directory per project under a data root:
//!
//! ```text
//! <data_root>/projects/<project-id>/project.json    manifest
//! <data_root>/projects/<project-id>/messages.jsonl  one message per line
//! ```

use forge_protocol::{ForgeError, ForgeResult, Message, ProjectId};

mod file;
mod memory;

pub use file::{FileProjectStore, ProjectManifest};
pub use memory::InMemoryProjectStore;

/// Project ids name directories, so they must be a single plain component.
pub fn validate_project_id(project_id: &ProjectId) -> ForgeResult<()> {
    let raw = project_id.as_str();
    if raw.is_empty() || raw.starts_with('.') || raw.contains(['/', '\\', '\0']) {
        return Err(ForgeError::ProjectNotFound(raw.to_owned()));
    }
    Ok(())
}

/// Give each message the next sequence after `last`.
pub(crate) fn assign_sequences(last: u64, messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .zip(last.saturating_add(1)..)
        .map(|(mut message, sequence)| {
            message.sequence = sequence;
            message
        })
        .collect()
}
