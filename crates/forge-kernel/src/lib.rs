use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use forge_build::{
    BuildExecutor, BuildLogger, BuildPipeline, BuildQueue, CompileMode, CompileStreamer,
    ForegroundReport, ProcessRunner, QueuedBuild,
};
use forge_history::{RevertEngine, RevertReport, SnapshotInfo, SnapshotManager};
use forge_protocol::{
    BuildId, BuildTask, DirectoryNode, FileContent, FileOperation, FileRecord, LogEntry, Message,
    MessageId, OutputChannel, ProjectId, ProjectRecord, ProjectStore, QueueStatus,
};
use forge_store::{FileProjectStore, ProjectManifest};
use forge_workspace::WorkspaceFs;
use tracing::{info, instrument};

mod config;

pub use config::ForgeConfig;

#[derive(Clone)]
pub struct KernelBuilder {
    config: ForgeConfig,
    store: Option<Arc<dyn ProjectStore>>,
}

impl KernelBuilder {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self::from_config(ForgeConfig::new(root))
    }

    pub fn from_config(config: ForgeConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn ignored_names(mut self, ignored_names: Vec<String>) -> Self {
        self.config.ignored_names = ignored_names;
        self
    }

    /// Use an external store instead of the file-backed one. Project
    /// creation and deletion are then left to that store's owner.
    pub fn project_store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Must run inside a tokio runtime: the build queue consumer is spawned here.
    pub fn build(self) -> ForgeKernel {
        let config = self.config;

        let (store, projects) = match self.store {
            Some(store) => (store, None),
            None => {
                let files = Arc::new(FileProjectStore::new(
                    &config.data_root,
                    &config.workspaces_root,
                ));
                (files.clone() as Arc<dyn ProjectStore>, Some(files))
            }
        };

        let workspace = WorkspaceFs::new().with_ignored(config.ignored_names.clone());
        let snapshots = SnapshotManager::new(workspace.clone());
        let reverts = RevertEngine::new(store.clone());

        let logger = BuildLogger::new(&config.log_root);
        let executor = BuildExecutor::new(ProcessRunner::default(), logger);
        let streamer = CompileStreamer::new(&config.scratch_root, config.command_timeout)
            .with_workspace(workspace.clone());
        let builds = BuildPipeline::new(
            BuildQueue::start(config.queue_capacity),
            executor,
            streamer,
            store.clone(),
        );

        ForgeKernel {
            config: Arc::new(config),
            store,
            projects,
            workspace,
            snapshots,
            reverts,
            builds,
        }
    }
}

#[derive(Clone)]
pub struct ForgeKernel {
    config: Arc<ForgeConfig>,
    store: Arc<dyn ProjectStore>,
    projects: Option<Arc<FileProjectStore>>,
    workspace: WorkspaceFs,
    snapshots: SnapshotManager,
    reverts: RevertEngine,
    builds: BuildPipeline,
}

impl ForgeKernel {
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    fn file_store(&self) -> Result<&FileProjectStore> {
        self.projects
            .as_deref()
            .ok_or_else(|| anyhow!("project lifecycle is managed by the external project store"))
    }

    #[instrument(skip(self, name))]
    pub async fn create_project(&self, name: impl Into<String>) -> Result<ProjectManifest> {
        let manifest = self.file_store()?.create_project(name).await?;
        Ok(manifest)
    }

    /// Remove the project record, its HEAD, and every snapshot.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn delete_project(&self, project_id: &ProjectId) -> Result<ProjectManifest> {
        let manifest = self.file_store()?.delete_project(project_id).await?;
        self.snapshots
            .discard_workspace(&manifest.root_path)
            .await
            .with_context(|| format!("failed discarding workspace for {project_id}"))?;
        info!("project deleted");
        Ok(manifest)
    }

    pub async fn project(&self, project_id: &ProjectId) -> Result<ProjectRecord> {
        Ok(self.store.project(project_id).await?)
    }

    pub async fn append_messages(
        &self,
        project_id: &ProjectId,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>> {
        Ok(self.store.append_messages(project_id, messages).await?)
    }

    #[instrument(
        skip(self, operations),
        fields(project_id = %project_id, message_id = %message_id, operations = operations.len())
    )]
    pub async fn apply_operations(
        &self,
        project_id: &ProjectId,
        message_id: &MessageId,
        operations: &[FileOperation],
    ) -> Result<Option<SnapshotInfo>> {
        let project = self.store.project(project_id).await?;
        Ok(self
            .snapshots
            .apply_operations(&project.development_path, message_id, operations)
            .await?)
    }

    pub async fn revert_to_message(
        &self,
        project_id: &ProjectId,
        message_id: &MessageId,
    ) -> Result<RevertReport> {
        Ok(self.reverts.revert_to_message(project_id, message_id).await?)
    }

    pub async fn list_snapshots(&self, project_id: &ProjectId) -> Result<Vec<MessageId>> {
        let project = self.store.project(project_id).await?;
        Ok(self.snapshots.list_snapshots(&project.root_path).await?)
    }

    pub async fn scan_files(&self, project_id: &ProjectId) -> Result<Vec<FileRecord>> {
        let project = self.store.project(project_id).await?;
        Ok(self.workspace.scan(&project.development_path).await?)
    }

    pub async fn read_file(&self, project_id: &ProjectId, relative_path: &str) -> Result<FileContent> {
        let project = self.store.project(project_id).await?;
        Ok(self
            .workspace
            .read_file(&project.development_path, relative_path)
            .await?)
    }

    pub async fn directory_structure(&self, project_id: &ProjectId) -> Result<DirectoryNode> {
        let project = self.store.project(project_id).await?;
        Ok(self
            .workspace
            .directory_structure(&project.development_path)
            .await?)
    }

    /// Queue a background build of the project's live workspace.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn enqueue_build(&self, project_id: &ProjectId) -> Result<QueuedBuild> {
        let project = self.store.project(project_id).await?;
        self.builds.background(project.development_path).await
    }

    pub async fn build_task(&self, build_id: &BuildId) -> Result<Option<BuildTask>> {
        Ok(self.builds.task(build_id).await?)
    }

    pub async fn build_logs(&self, build_id: &BuildId) -> Result<Vec<LogEntry>> {
        Ok(self.builds.logs(build_id).await?)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.builds.queue_status()
    }

    /// Streaming compile; the channel always receives a final `[DONE]` frame.
    pub async fn compile(
        &self,
        project_id: &ProjectId,
        mode: CompileMode,
        channel: &mut dyn OutputChannel,
    ) -> Result<ForegroundReport> {
        Ok(self.builds.foreground(project_id, mode, channel).await?)
    }
}
