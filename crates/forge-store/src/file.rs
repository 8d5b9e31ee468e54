use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_protocol::message::DEVELOPMENT_DIR;
use forge_protocol::{ForgeError, ForgeResult, Message, ProjectId, ProjectRecord, ProjectStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::{assign_sequences, validate_project_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: ProjectId,
    pub name: String,
    /// Parent of `development` and of every snapshot directory.
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ProjectManifest {
    pub fn development_path(&self) -> PathBuf {
        self.root_path.join(DEVELOPMENT_DIR)
    }
}

#[derive(Debug)]
pub struct FileProjectStore {
    data_root: PathBuf,
    workspaces_root: PathBuf,
    write_locks: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileProjectStore {
    /// `data_root` holds manifests and message logs; each project's
    /// workspace is provisioned at `<workspaces_root>/<project-id>`.
    pub fn new(data_root: impl Into<PathBuf>, workspaces_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            workspaces_root: workspaces_root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspaces_root(&self) -> &Path {
        &self.workspaces_root
    }

    fn project_dir(&self, project_id: &ProjectId) -> ForgeResult<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.data_root.join("projects").join(project_id.as_str()))
    }

    fn manifest_path(&self, project_id: &ProjectId) -> ForgeResult<PathBuf> {
        Ok(self.project_dir(project_id)?.join("project.json"))
    }

    fn messages_path(&self, project_id: &ProjectId) -> ForgeResult<PathBuf> {
        Ok(self.project_dir(project_id)?.join("messages.jsonl"))
    }

    fn lock_for(&self, project_id: &ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Register a project and create its empty `development` directory.
    #[instrument(skip(self, name))]
    pub async fn create_project(&self, name: impl Into<String>) -> ForgeResult<ProjectManifest> {
        let project_id = ProjectId::new_uuid();
        let manifest = ProjectManifest {
            root_path: self.workspaces_root.join(project_id.as_str()),
            project_id,
            name: name.into(),
            created_at: Utc::now(),
        };

        fs::create_dir_all(manifest.development_path()).await?;
        let path = self.manifest_path(&manifest.project_id)?;
        ensure_parent(&path).await?;
        fs::write(&path, serde_json::to_string_pretty(&manifest)?).await?;

        info!(project_id = %manifest.project_id, root = %manifest.root_path.display(), "project created");
        Ok(manifest)
    }

    pub async fn manifest(&self, project_id: &ProjectId) -> ForgeResult<ProjectManifest> {
        let path = self.manifest_path(project_id)?;
        if !fs::try_exists(&path).await? {
            return Err(ForgeError::ProjectNotFound(project_id.to_string()));
        }
        let raw = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Drop the manifest and message log. The workspace itself is left to
    /// the caller.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn delete_project(&self, project_id: &ProjectId) -> ForgeResult<ProjectManifest> {
        let manifest = self.manifest(project_id).await?;
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;
        fs::remove_dir_all(self.project_dir(project_id)?).await?;
        self.write_locks.lock().remove(project_id);
        info!("project record deleted");
        Ok(manifest)
    }

    async fn read_messages(path: &Path) -> ForgeResult<Vec<Message>> {
        if !fs::try_exists(path).await? {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut messages = Vec::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            messages.push(serde_json::from_str(&line)?);
        }
        Ok(messages)
    }

    async fn write_lines(file: &mut fs::File, messages: &[Message]) -> ForgeResult<()> {
        for message in messages {
            let line = serde_json::to_string(message)?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> ForgeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn project(&self, project_id: &ProjectId) -> ForgeResult<ProjectRecord> {
        let manifest = self.manifest(project_id).await?;
        let messages = Self::read_messages(&self.messages_path(project_id)?).await?;
        debug!(messages = messages.len(), "project loaded");
        Ok(ProjectRecord {
            development_path: manifest.development_path(),
            root_path: manifest.root_path,
            messages,
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn truncate_messages(
        &self,
        project_id: &ProjectId,
        keep_up_to_index: usize,
    ) -> ForgeResult<()> {
        self.manifest(project_id).await?;
        let path = self.messages_path(project_id)?;
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let mut messages = Self::read_messages(&path).await?;
        let before = messages.len();
        messages.truncate(keep_up_to_index.saturating_add(1));
        if messages.len() == before {
            return Ok(());
        }

        let staging = path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&staging).await?;
        Self::write_lines(&mut file, &messages).await?;
        drop(file);
        if let Err(error) = fs::rename(&staging, &path).await {
            warn!(%error, "failed swapping truncated message log");
            let _ = fs::remove_file(&staging).await;
            return Err(error.into());
        }

        debug!(kept = messages.len(), dropped = before - messages.len(), "messages truncated");
        Ok(())
    }

    #[instrument(skip(self, messages), fields(project_id = %project_id, count = messages.len()))]
    async fn append_messages(
        &self,
        project_id: &ProjectId,
        messages: Vec<Message>,
    ) -> ForgeResult<Vec<Message>> {
        self.manifest(project_id).await?;
        let path = self.messages_path(project_id)?;
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let last = Self::read_messages(&path)
            .await?
            .last()
            .map_or(0, |message| message.sequence);
        let assigned = assign_sequences(last, messages);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Self::write_lines(&mut file, &assigned).await?;
        debug!("messages appended");
        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use forge_protocol::{ForgeError, Message, MessageRole, ProjectId, ProjectStore};
    use tokio::fs;

    use super::FileProjectStore;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn create_project_provisions_development() -> Result<()> {
        let root = unique_test_root("forge-store-create");
        let store = FileProjectStore::new(root.join("data"), root.join("workspaces"));

        let manifest = store.create_project("landing page").await?;
        assert!(fs::try_exists(manifest.development_path()).await?);

        let project = store.project(&manifest.project_id).await?;
        assert_eq!(project.root_path, root.join("workspaces").join(manifest.project_id.as_str()));
        assert_eq!(project.development_path, project.root_path.join("development"));
        assert!(project.messages.is_empty());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn messages_survive_reopen_and_truncate() -> Result<()> {
        let root = unique_test_root("forge-store-messages");
        let store = FileProjectStore::new(root.join("data"), root.join("workspaces"));
        let id = store.create_project("p").await?.project_id;

        let appended = store
            .append_messages(
                &id,
                vec![
                    Message::new(Some("m1".into()), MessageRole::User, "hi", "text"),
                    Message::new(Some("m1".into()), MessageRole::Assistant, "hello", "text"),
                ],
            )
            .await?;
        assert_eq!(appended[1].sequence, 2);
        store
            .append_messages(&id, vec![Message::new(Some("m2".into()), MessageRole::User, "more", "text")])
            .await?;

        let reopened = FileProjectStore::new(root.join("data"), root.join("workspaces"));
        assert_eq!(reopened.project(&id).await?.messages.len(), 3);

        reopened.truncate_messages(&id, 1).await?;
        let messages = reopened.project(&id).await?.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "hello");

        let next = reopened
            .append_messages(&id, vec![Message::new(None, MessageRole::System, "ok", "build_output")])
            .await?;
        assert_eq!(next[0].sequence, 3);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_appends_get_distinct_sequences() -> Result<()> {
        let root = unique_test_root("forge-store-concurrent");
        let store = Arc::new(FileProjectStore::new(root.join("data"), root.join("workspaces")));
        let id = store.create_project("p").await?.project_id;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_messages(&id, vec![Message::new(None, MessageRole::User, format!("{i}"), "text")])
                    .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let mut sequences: Vec<_> = store
            .project(&id)
            .await?
            .messages
            .iter()
            .map(|m| m.sequence)
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_unsafe_project_ids_are_not_found() -> Result<()> {
        let root = unique_test_root("forge-store-unknown");
        let store = FileProjectStore::new(root.join("data"), root.join("workspaces"));

        for raw in ["missing", "../escape"] {
            let error = store.project(&ProjectId::from_string(raw)).await.unwrap_err();
            assert!(matches!(error, ForgeError::ProjectNotFound(_)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn delete_project_removes_record_only() -> Result<()> {
        let root = unique_test_root("forge-store-delete");
        let store = FileProjectStore::new(root.join("data"), root.join("workspaces"));
        let manifest = store.create_project("p").await?;

        store.delete_project(&manifest.project_id).await?;
        assert!(store.project(&manifest.project_id).await.is_err());
        assert!(fs::try_exists(manifest.development_path()).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
