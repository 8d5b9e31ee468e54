use std::path::PathBuf;
use std::time::Duration;

use forge_build::DEFAULT_COMMAND_TIMEOUT;
use forge_workspace::DEFAULT_IGNORED;

#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub root: PathBuf,
    /// Build logs, one directory per build id.
    pub log_root: PathBuf,
    /// Throwaway compile directories.
    pub scratch_root: PathBuf,
    /// Project manifests and message logs.
    pub data_root: PathBuf,
    /// One project root (HEAD plus snapshots) per project.
    pub workspaces_root: PathBuf,
    /// Per-command bound for streaming compiles.
    pub command_timeout: Duration,
    pub queue_capacity: usize,
    /// Names hidden from scans and structure listings, on top of dotfiles.
    pub ignored_names: Vec<String>,
}

impl ForgeConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            log_root: root.join("logs"),
            scratch_root: root.join("scratch"),
            data_root: root.join("data"),
            workspaces_root: root.join("workspaces"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            queue_capacity: 64,
            ignored_names: DEFAULT_IGNORED.iter().map(|name| (*name).to_owned()).collect(),
            root,
        }
    }
}
