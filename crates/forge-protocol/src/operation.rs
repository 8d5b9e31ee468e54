//! File operations proposed by an AI turn.

use serde::{Deserialize, Serialize};

/// One edit against a workspace, relative to its `development` root.
///
/// `Add` and `Update` both write the full content; there is no merge or
/// conflict detection, a later write overwrites an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileOperation {
    Add {
        #[serde(alias = "relativePath")]
        path: String,
        content: String,
    },
    Update {
        #[serde(alias = "relativePath")]
        path: String,
        content: String,
    },
    Delete {
        #[serde(alias = "relativePath")]
        path: String,
    },
}

impl FileOperation {
    pub fn add(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Add {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Update {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_string_tagged_operations() {
        let raw = r#"[
            {"type": "add", "path": "src/a.ts", "content": "x"},
            {"type": "update", "relativePath": "src/b.ts", "content": "y"},
            {"type": "delete", "path": "old.ts"}
        ]"#;
        let ops: Vec<FileOperation> = serde_json::from_str(raw).unwrap();
        assert_eq!(ops[0], FileOperation::add("src/a.ts", "x"));
        assert_eq!(ops[1], FileOperation::update("src/b.ts", "y"));
        assert_eq!(ops[2], FileOperation::delete("old.ts"));
    }

    #[test]
    fn delete_without_content_is_accepted_but_add_requires_it() {
        let missing_content = r#"{"type": "add", "path": "a.txt"}"#;
        assert!(serde_json::from_str::<FileOperation>(missing_content).is_err());
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let raw = r#"{"type": "rename", "path": "a.txt"}"#;
        assert!(serde_json::from_str::<FileOperation>(raw).is_err());
    }
}
