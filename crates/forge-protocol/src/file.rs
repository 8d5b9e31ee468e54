//! Derived views over a workspace: scan records, file contents, and trees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync status of a scanned file.
///
/// Scanning always yields `Synced`. `Modified` and `Conflict` are reserved for
/// collaborators that track divergence; nothing in this workspace sets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Synced,
    Modified,
    Conflict,
}

/// One file found by a workspace scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the scanned root, `/`-separated.
    pub relative_path: String,
    /// SHA-256 hex digest of the file bytes. Change detection only.
    pub content_digest: String,
    pub last_modified: DateTime<Utc>,
    pub last_sync_time: DateTime<Utc>,
    pub status: FileStatus,
}

/// Contents returned by a workspace read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileContent {
    Text { content: String, encoding: String },
    /// Image bytes as a `data:<mime>;base64,...` URI.
    DataUri { mime: String, uri: String },
}

impl FileContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content, .. } => Some(content),
            Self::DataUri { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// Nested folder/file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    /// Relative to the tree root; empty for the root itself.
    pub path: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DirectoryNode>,
}

impl DirectoryNode {
    /// Number of file leaves under this node.
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Directory => self.children.iter().map(Self::file_count).sum(),
        }
    }

    pub fn find(&self, path: &str) -> Option<&DirectoryNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }
}
