use std::sync::Arc;

use forge_protocol::{ForgeResult, Message, MessageId, ProjectId, ProjectStore};
use forge_workspace::{copy_tree, remove_tree};
use indexmap::IndexSet;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::snapshot_path;

#[derive(Debug, Clone, Serialize)]
pub struct RevertReport {
    pub message_id: MessageId,
    /// `false` when the turn had no snapshot and nothing changed.
    pub restored: bool,
    pub messages_kept: usize,
    pub messages_removed: usize,
    /// Snapshot directories that existed and were deleted.
    pub pruned_snapshots: Vec<MessageId>,
}

/// Restores `development` from a turn's snapshot and prunes newer history.
///
/// The steps run one after another with no transaction: a crash after the
/// restore but before truncation leaves the old message list in place.
#[derive(Clone)]
pub struct RevertEngine {
    store: Arc<dyn ProjectStore>,
}

impl RevertEngine {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(project_id = %project_id, message_id = %message_id))]
    pub async fn revert_to_message(
        &self,
        project_id: &ProjectId,
        message_id: &MessageId,
    ) -> ForgeResult<RevertReport> {
        let project = self.store.project(project_id).await?;
        let snapshot = snapshot_path(&project.root_path, message_id)?;
        let total = project.messages.len();

        if !fs::try_exists(&snapshot).await? {
            info!("turn has no snapshot; revert is a no-op");
            return Ok(RevertReport {
                message_id: message_id.clone(),
                restored: false,
                messages_kept: total,
                messages_removed: 0,
                pruned_snapshots: Vec::new(),
            });
        }

        remove_tree(&project.development_path).await?;
        let files = copy_tree(&snapshot, &project.development_path).await?;
        debug!(files, "development restored from snapshot");

        let Some(last_index) = project
            .messages
            .iter()
            .rposition(|message| message.turn_id() == Some(message_id))
        else {
            warn!("snapshot restored but no message carries this id; history left as is");
            return Ok(RevertReport {
                message_id: message_id.clone(),
                restored: true,
                messages_kept: total,
                messages_removed: 0,
                pruned_snapshots: Vec::new(),
            });
        };

        let removed = &project.messages[last_index + 1..];
        if !removed.is_empty() {
            self.store
                .truncate_messages(project_id, last_index)
                .await?;
        }

        let newer_turns: IndexSet<MessageId> = removed
            .iter()
            .filter_map(Message::turn_id)
            .filter(|id| *id != message_id)
            .cloned()
            .collect();

        let mut pruned_snapshots = Vec::new();
        for turn in newer_turns {
            let path = match snapshot_path(&project.root_path, &turn) {
                Ok(path) => path,
                Err(error) => {
                    warn!(turn = %turn, %error, "skipping snapshot prune for unsafe message id");
                    continue;
                }
            };
            if remove_tree(&path).await? {
                pruned_snapshots.push(turn);
            }
        }

        info!(
            messages_kept = last_index + 1,
            messages_removed = removed.len(),
            pruned = pruned_snapshots.len(),
            "workspace reverted"
        );

        Ok(RevertReport {
            message_id: message_id.clone(),
            restored: true,
            messages_kept: last_index + 1,
            messages_removed: removed.len(),
            pruned_snapshots,
        })
    }
}
