//! Chat messages and the project view handed over by the persistence collaborator.

use crate::ids::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the live workspace directory inside a project root.
pub const DEVELOPMENT_DIR: &str = "development";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One message record. Records sharing a `message_id` belong to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Assigned by the persistence collaborator on append.
    #[serde(default)]
    pub sequence: u64,
    pub role: MessageRole,
    pub content: String,
    /// Free-form record type, e.g. `text`, `raw`, `processed`, `build_output`.
    #[serde(rename = "type", default = "default_message_type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

fn default_message_type() -> String {
    "text".to_owned()
}

impl Message {
    pub fn new(
        message_id: Option<MessageId>,
        role: MessageRole,
        content: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            sequence: 0,
            role,
            content: content.into(),
            kind: kind.into(),
            created_at: Utc::now(),
        }
    }

    /// The non-empty message id, if any.
    pub fn turn_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref().filter(|id| !id.is_empty())
    }
}

/// What the core needs to know about a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Live workspace (`<root>/development`).
    pub development_path: PathBuf,
    /// Parent of `development` and of every snapshot directory.
    pub root_path: PathBuf,
    /// Ordered by persistence position.
    pub messages: Vec<Message>,
}

impl ProjectRecord {
    /// A project with no messages whose HEAD is `<root>/development`.
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        let root_path = root.into();
        Self {
            development_path: root_path.join(DEVELOPMENT_DIR),
            root_path,
            messages: Vec::new(),
        }
    }
}
