use std::path::{Path, PathBuf};

use forge_protocol::{FileOperation, ForgeError, ForgeResult, MessageId};
use forge_workspace::{WorkspaceFs, copy_tree, remove_tree};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::{snapshot_path, validate_message_id};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub message_id: MessageId,
    pub path: PathBuf,
    pub operations_applied: usize,
    pub files_copied: u64,
    /// An earlier snapshot for the same id was swapped out.
    pub replaced: bool,
}

/// Applies a turn's file operations to `development` and captures the result.
#[derive(Debug, Clone, Default)]
pub struct SnapshotManager {
    workspace: WorkspaceFs,
}

impl SnapshotManager {
    pub fn new(workspace: WorkspaceFs) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &WorkspaceFs {
        &self.workspace
    }

    /// Apply `operations` in order, then copy `development` to `<root>/<message_id>`.
    ///
    /// Every path is validated before the first write. Returns `None` for an
    /// empty batch, which leaves no snapshot. An I/O failure part-way through
    /// leaves the earlier operations applied and no snapshot taken.
    #[instrument(
        skip(self, development_path, operations),
        fields(
            development = %development_path.display(),
            message_id = %message_id,
            operations = operations.len()
        )
    )]
    pub async fn apply_operations(
        &self,
        development_path: &Path,
        message_id: &MessageId,
        operations: &[FileOperation],
    ) -> ForgeResult<Option<SnapshotInfo>> {
        validate_message_id(message_id)?;
        let root = project_root(development_path)?;

        for operation in operations {
            self.workspace.resolve(development_path, operation.path())?;
        }
        if operations.is_empty() {
            debug!("no file operations; snapshot skipped");
            return Ok(None);
        }

        fs::create_dir_all(development_path).await?;
        for operation in operations {
            match operation {
                FileOperation::Add { path, content } | FileOperation::Update { path, content } => {
                    self.workspace
                        .write_file(development_path, path, content.as_bytes())
                        .await?;
                }
                FileOperation::Delete { path } => {
                    self.workspace.remove(development_path, path).await?;
                }
            }
            debug!(kind = operation.kind(), path = operation.path(), "operation applied");
        }

        let (files_copied, replaced) = self
            .capture(development_path, root, message_id)
            .await?;
        let path = snapshot_path(root, message_id)?;
        info!(files_copied, replaced, "snapshot captured");

        Ok(Some(SnapshotInfo {
            message_id: message_id.clone(),
            path,
            operations_applied: operations.len(),
            files_copied,
            replaced,
        }))
    }

    /// Message ids that currently have a snapshot directory, sorted.
    pub async fn list_snapshots(&self, root: &Path) -> ForgeResult<Vec<MessageId>> {
        if !fs::try_exists(root).await? {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(root).await?;
        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = MessageId::from_string(entry.file_name().to_string_lossy().into_owned());
            if validate_message_id(&id).is_ok() {
                snapshots.push(id);
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    /// Remove a project's HEAD and every snapshot.
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn discard_workspace(&self, root: &Path) -> ForgeResult<bool> {
        let removed = remove_tree(root).await?;
        info!(removed, "project workspace discarded");
        Ok(removed)
    }

    /// Stage a full copy next to the target and rename it into place, so a
    /// snapshot directory is never seen half-written or edited in place.
    async fn capture(
        &self,
        development_path: &Path,
        root: &Path,
        message_id: &MessageId,
    ) -> ForgeResult<(u64, bool)> {
        let target = snapshot_path(root, message_id)?;
        let staging = root.join(format!(".staging-{}-{}", message_id, uuid::Uuid::new_v4()));

        let files_copied = match copy_tree(development_path, &staging).await {
            Ok(copied) => copied,
            Err(error) => {
                if let Err(cleanup_error) = remove_tree(&staging).await {
                    warn!(error = %cleanup_error, "failed removing snapshot staging directory");
                }
                return Err(error);
            }
        };

        let replaced = remove_tree(&target).await?;
        if replaced {
            warn!(message_id = %message_id, "existing snapshot replaced");
        }
        fs::rename(&staging, &target).await?;
        Ok((files_copied, replaced))
    }
}

fn project_root(development_path: &Path) -> ForgeResult<&Path> {
    development_path.parent().ok_or_else(|| {
        ForgeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "{} has no parent directory to hold snapshots",
                development_path.display()
            ),
        ))
    })
}
