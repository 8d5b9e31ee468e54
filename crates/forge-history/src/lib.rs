//! Message-versioned workspace history.
//!
//! A project root holds the live `development` tree and one sibling directory
//! per turn that changed files, named by the turn's message id:
//!
//! ```text
//! <root>/development      HEAD, mutated by file operations
//! <root>/<message-id>     immutable full copy taken after that turn
//! ```

use std::path::{Path, PathBuf};

use forge_protocol::{ForgeError, ForgeResult, MessageId};

pub use forge_protocol::message::DEVELOPMENT_DIR;

mod revert;
mod snapshot;

pub use revert::{RevertEngine, RevertReport};
pub use snapshot::{SnapshotInfo, SnapshotManager};

/// `<root>/development` for a project root.
pub fn development_path(root: &Path) -> PathBuf {
    root.join(DEVELOPMENT_DIR)
}

/// Rejects ids that cannot safely name a sibling of `development`.
pub fn validate_message_id(message_id: &MessageId) -> ForgeResult<()> {
    let raw = message_id.as_str();
    let invalid = raw.is_empty()
        || raw == DEVELOPMENT_DIR
        || raw.starts_with('.')
        || raw.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ForgeError::InvalidMessageId(raw.to_owned()));
    }
    Ok(())
}

/// `<root>/<message_id>`, after validating the id.
pub fn snapshot_path(root: &Path, message_id: &MessageId) -> ForgeResult<PathBuf> {
    validate_message_id(message_id)?;
    Ok(root.join(message_id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_that_would_escape_or_collide_are_rejected() {
        for raw in ["", ".", "..", "../x", "a/b", "a\\b", "development", ".hidden"] {
            let result = validate_message_id(&MessageId::from_string(raw));
            assert!(
                matches!(result, Err(ForgeError::InvalidMessageId(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn snapshot_path_is_a_sibling_of_development() {
        let root = Path::new("/srv/projects/p1");
        let path = snapshot_path(root, &MessageId::from_string("msg-42")).unwrap();
        assert_eq!(path, root.join("msg-42"));
        assert_eq!(path.parent(), root.join(DEVELOPMENT_DIR).parent());
    }
}
