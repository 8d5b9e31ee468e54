use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use forge_protocol::{BuildId, ForgeError, ForgeResult, LogEntry, LogLevel};
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Append-only JSON-lines log per build at `<log_root>/<build_id>/build.log`.
#[derive(Debug, Clone)]
pub struct BuildLogger {
    log_root: PathBuf,
    write_locks: Arc<Mutex<HashMap<BuildId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl BuildLogger {
    pub fn new(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    pub fn log_path(&self, build_id: &BuildId) -> PathBuf {
        self.log_root.join(build_id.as_str()).join("build.log")
    }

    /// Build ids name directories; anything but a plain component is refused.
    fn is_plain(build_id: &BuildId) -> bool {
        let raw = build_id.as_str();
        !raw.is_empty() && !raw.starts_with('.') && !raw.contains(['/', '\\', '\0'])
    }

    fn lock_for(&self, build_id: &BuildId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(build_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget the write lock for a build that will not be logged to again.
    pub fn release(&self, build_id: &BuildId) {
        self.write_locks.lock().remove(build_id);
    }

    #[cfg(test)]
    pub(crate) fn tracked_builds(&self) -> usize {
        self.write_locks.lock().len()
    }

    pub async fn log(
        &self,
        build_id: &BuildId,
        level: LogLevel,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> ForgeResult<()> {
        if !Self::is_plain(build_id) {
            return Err(ForgeError::PathTraversal(build_id.to_string()));
        }
        let path = self.log_path(build_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = LogEntry::new(level, message, details);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let lock = self.lock_for(build_id);
        let _guard = lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Like [`log`](Self::log) but only warns on failure; build output must
    /// not fail a build just because the log write did.
    pub async fn record(
        &self,
        build_id: &BuildId,
        level: LogLevel,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        if let Err(error) = self.log(build_id, level, message, details).await {
            warn!(build_id = %build_id, %error, "failed writing build log entry");
        }
    }

    /// Entries in arrival order; a build with no log yet has no entries.
    pub async fn logs(&self, build_id: &BuildId) -> ForgeResult<Vec<LogEntry>> {
        if !Self::is_plain(build_id) {
            return Ok(Vec::new());
        }
        let path = self.log_path(build_id);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(&path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(error) => warn!(build_id = %build_id, %error, "skipping unreadable log line"),
            }
        }
        debug!(build_id = %build_id, count = entries.len(), "build log loaded");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use forge_protocol::{BuildId, LogLevel};
    use serde_json::json;
    use tokio::fs;

    use super::BuildLogger;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn entries_read_back_in_arrival_order() -> Result<()> {
        let root = unique_test_root("forge-build-logger");
        let logger = BuildLogger::new(&root);
        let id = BuildId::from_string("b1");

        logger.log(&id, LogLevel::Info, "started", json!({})).await?;
        logger
            .log(&id, LogLevel::Warning, "npm WARN deprecated", json!({"stream": "stderr"}))
            .await?;
        logger.log(&id, LogLevel::Error, "failed", json!({"exit_code": 1})).await?;

        let entries = logger.logs(&id).await?;
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["started", "npm WARN deprecated", "failed"]);
        assert_eq!(entries[2].level, LogLevel::Error);
        assert_eq!(entries[2].details["exit_code"], 1);
        assert!(fs::try_exists(root.join("b1/build.log")).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_build_has_no_entries() -> Result<()> {
        let logger = BuildLogger::new(unique_test_root("forge-build-logger-missing"));
        assert!(logger.logs(&BuildId::from_string("nope")).await?.is_empty());
        assert!(logger.logs(&BuildId::from_string("../etc")).await?.is_empty());
        assert!(logger
            .log(&BuildId::from_string("../etc"), LogLevel::Info, "x", json!({}))
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn released_builds_drop_their_write_lock() -> Result<()> {
        let root = unique_test_root("forge-build-logger-release");
        let logger = BuildLogger::new(&root);
        let id = BuildId::from_string("b1");

        logger.log(&id, LogLevel::Info, "build completed", json!({})).await?;
        assert_eq!(logger.tracked_builds(), 1);
        logger.release(&id);
        assert_eq!(logger.tracked_builds(), 0);
        assert_eq!(logger.logs(&id).await?.len(), 1);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
