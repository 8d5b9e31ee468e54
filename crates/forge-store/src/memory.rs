use std::collections::HashMap;

use async_trait::async_trait;
use forge_protocol::{ForgeError, ForgeResult, Message, ProjectId, ProjectRecord, ProjectStore};
use parking_lot::Mutex;

use crate::assign_sequences;

#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: Mutex<HashMap<ProjectId, ProjectRecord>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a project.
    pub fn insert(&self, project_id: ProjectId, record: ProjectRecord) {
        self.projects.lock().insert(project_id, record);
    }

    pub fn remove(&self, project_id: &ProjectId) -> Option<ProjectRecord> {
        self.projects.lock().remove(project_id)
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn project(&self, project_id: &ProjectId) -> ForgeResult<ProjectRecord> {
        self.projects
            .lock()
            .get(project_id)
            .cloned()
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))
    }

    async fn truncate_messages(
        &self,
        project_id: &ProjectId,
        keep_up_to_index: usize,
    ) -> ForgeResult<()> {
        let mut projects = self.projects.lock();
        let record = projects
            .get_mut(project_id)
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;
        record.messages.truncate(keep_up_to_index.saturating_add(1));
        Ok(())
    }

    async fn append_messages(
        &self,
        project_id: &ProjectId,
        messages: Vec<Message>,
    ) -> ForgeResult<Vec<Message>> {
        let mut projects = self.projects.lock();
        let record = projects
            .get_mut(project_id)
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;
        let last = record.messages.last().map_or(0, |m| m.sequence);
        let assigned = assign_sequences(last, messages);
        record.messages.extend(assigned.iter().cloned());
        Ok(assigned)
    }
}
