use std::path::{Path, PathBuf};

use forge_protocol::{DirectoryNode, FileContent, FileRecord, ForgeError, ForgeResult};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, instrument};

mod copy;
pub mod encoding;
mod paths;
mod scan;

pub use paths::resolve_in_root;

/// Directory names skipped by scans and structure listings, on top of dotfiles.
pub const DEFAULT_IGNORED: [&str; 4] = ["node_modules", "dist", "build", ".git"];

/// Filesystem access for one or more workspace roots.
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    ignored: Vec<String>,
}

impl Default for WorkspaceFs {
    fn default() -> Self {
        Self {
            ignored: DEFAULT_IGNORED.iter().map(|name| (*name).to_owned()).collect(),
        }
    }
}

impl WorkspaceFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored(mut self, ignored: Vec<String>) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn resolve(&self, root: &Path, relative_path: &str) -> ForgeResult<PathBuf> {
        resolve_in_root(root, relative_path)
    }

    #[instrument(skip(self, root, content), fields(root = %root.display(), bytes = content.len()))]
    pub async fn write_file(
        &self,
        root: &Path,
        relative_path: &str,
        content: &[u8],
    ) -> ForgeResult<PathBuf> {
        let absolute = self.resolve(root, relative_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&absolute, content).await?;
        debug!("workspace file written");
        Ok(absolute)
    }

    /// Returns whether anything was removed; a missing target is not an error.
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn remove(&self, root: &Path, relative_path: &str) -> ForgeResult<bool> {
        let absolute = self.resolve(root, relative_path)?;
        let removed = run_blocking(move || copy::remove_path_blocking(&absolute)).await?;
        debug!(removed, "workspace path removed");
        Ok(removed)
    }

    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn read_file(&self, root: &Path, relative_path: &str) -> ForgeResult<FileContent> {
        let absolute = self.resolve(root, relative_path)?;
        let bytes = fs::read(&absolute).await?;

        let mime = absolute
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(encoding::image_mime);
        if let Some(mime) = mime {
            return Ok(FileContent::DataUri {
                mime: mime.to_owned(),
                uri: encoding::data_uri(mime, &bytes),
            });
        }

        let (content, detected) = encoding::decode_text(&bytes);
        Ok(FileContent::Text {
            content,
            encoding: detected.to_owned(),
        })
    }

    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn scan(&self, root: &Path) -> ForgeResult<Vec<FileRecord>> {
        let root = root.to_path_buf();
        let ignored = self.ignored.clone();
        let records = run_blocking(move || scan::scan_blocking(&root, &ignored)).await?;
        debug!(files = records.len(), "workspace scanned");
        Ok(records)
    }

    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn directory_structure(&self, root: &Path) -> ForgeResult<DirectoryNode> {
        let root = root.to_path_buf();
        let ignored = self.ignored.clone();
        run_blocking(move || scan::structure_blocking(&root, &ignored)).await
    }
}

/// Copy a whole directory tree. Nothing is filtered: snapshots are full copies.
#[instrument(
    skip(source, destination),
    fields(source = %source.display(), destination = %destination.display())
)]
pub async fn copy_tree(source: &Path, destination: &Path) -> ForgeResult<u64> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    let copied = run_blocking(move || copy::copy_tree_blocking(&source, &destination)).await?;
    debug!(copied, "directory tree copied");
    Ok(copied)
}

/// Remove a directory tree or file if present.
pub async fn remove_tree(path: &Path) -> ForgeResult<bool> {
    let path = path.to_path_buf();
    run_blocking(move || copy::remove_path_blocking(&path)).await
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn run_blocking<T, F>(work: F) -> ForgeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| ForgeError::Io(std::io::Error::other(error)))?
        .map_err(ForgeError::from)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use forge_protocol::{FileContent, ForgeError, NodeKind};
    use tokio::fs;

    use crate::{WorkspaceFs, content_digest, copy_tree};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn scan_reports_digest_of_written_file() -> Result<()> {
        let root = unique_test_root("forge-ws-scan");
        let workspace = WorkspaceFs::new();
        workspace.write_file(&root, "a.txt", b"hi").await?;

        let records = workspace.scan(&root).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relative_path, "a.txt");
        assert_eq!(records[0].content_digest, content_digest(b"hi"));
        assert_eq!(
            records[0].content_digest,
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn scan_skips_dotfiles_and_build_directories() -> Result<()> {
        let root = unique_test_root("forge-ws-ignore");
        let workspace = WorkspaceFs::new();
        for path in [
            "src/index.ts",
            ".env",
            ".git/HEAD",
            "node_modules/react/index.js",
            "dist/bundle.js",
            "build/out.js",
            "src/.cache/x",
        ] {
            workspace.write_file(&root, path, b"x").await?;
        }

        let records = workspace.scan(&root).await?;
        let paths: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/index.ts"]);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn scan_of_missing_root_is_empty() -> Result<()> {
        let root = unique_test_root("forge-ws-missing");
        assert!(WorkspaceFs::new().scan(&root).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn write_outside_root_is_rejected_and_touches_nothing() -> Result<()> {
        let base = unique_test_root("forge-ws-escape");
        let root = base.join("project/development");
        fs::create_dir_all(&root).await?;
        let workspace = WorkspaceFs::new();

        let error = workspace
            .write_file(&root, "../escaped.txt", b"nope")
            .await
            .unwrap_err();
        assert!(matches!(error, ForgeError::PathTraversal(_)));
        assert!(!fs::try_exists(base.join("project/escaped.txt")).await?);

        let _ = fs::remove_dir_all(base).await;
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_rejected() -> Result<()> {
        let base = unique_test_root("forge-ws-symlink");
        let root = base.join("development");
        let outside = base.join("outside");
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&outside).await?;
        std::os::unix::fs::symlink(&outside, root.join("link"))?;

        let error = WorkspaceFs::new()
            .write_file(&root, "link/x.txt", b"nope")
            .await
            .unwrap_err();
        assert!(matches!(error, ForgeError::PathTraversal(_)));
        assert!(!fs::try_exists(outside.join("x.txt")).await?);

        let _ = fs::remove_dir_all(base).await;
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_escape_is_rejected() -> Result<()> {
        let base = unique_test_root("forge-ws-dangling");
        let root = base.join("development");
        let outside = base.join("outside");
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&outside).await?;
        std::os::unix::fs::symlink("../outside/pwned.txt", root.join("link"))?;

        let workspace = WorkspaceFs::new();
        let error = workspace.write_file(&root, "link", b"escaped").await.unwrap_err();
        assert!(matches!(error, ForgeError::PathTraversal(_)));
        assert!(!fs::try_exists(outside.join("pwned.txt")).await?);

        std::os::unix::fs::symlink("src", root.join("alias"))?;
        workspace.write_file(&root, "src/a.txt", b"a").await?;
        workspace.write_file(&root, "alias/b.txt", b"b").await?;
        assert_eq!(fs::read(root.join("src/b.txt")).await?, b"b");

        let _ = fs::remove_dir_all(base).await;
        Ok(())
    }

    #[tokio::test]
    async fn remove_missing_path_is_a_noop() -> Result<()> {
        let root = unique_test_root("forge-ws-remove");
        let workspace = WorkspaceFs::new();
        workspace.write_file(&root, "dir/a.txt", b"a").await?;

        assert!(!workspace.remove(&root, "nope.txt").await?);
        assert!(workspace.remove(&root, "dir").await?);
        assert!(!fs::try_exists(root.join("dir")).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn read_file_returns_images_as_data_uri() -> Result<()> {
        let root = unique_test_root("forge-ws-read");
        let workspace = WorkspaceFs::new();
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0xFF];
        workspace.write_file(&root, "assets/logo.PNG", &png).await?;
        workspace.write_file(&root, "notes.txt", "naïve".as_bytes()).await?;

        match workspace.read_file(&root, "assets/logo.PNG").await? {
            FileContent::DataUri { mime, uri } => {
                assert_eq!(mime, "image/png");
                assert!(uri.starts_with("data:image/png;base64,"));
            }
            other => panic!("expected data uri, got {other:?}"),
        }
        let text = workspace.read_file(&root, "notes.txt").await?;
        assert_eq!(text.as_text(), Some("naïve"));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn directory_structure_nests_and_orders_entries() -> Result<()> {
        let root = unique_test_root("forge-ws-tree");
        let workspace = WorkspaceFs::new();
        for path in ["package.json", "src/main.ts", "src/lib/util.ts", "node_modules/x/y.js"] {
            workspace.write_file(&root, path, b"x").await?;
        }

        let tree = workspace.directory_structure(&root).await?;
        assert_eq!(tree.kind, NodeKind::Directory);
        let names: Vec<_> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["src", "package.json"]);
        assert_eq!(tree.file_count(), 3);
        assert!(tree.find("src/lib/util.ts").is_some());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn copy_tree_copies_everything_including_ignored_names() -> Result<()> {
        let base = unique_test_root("forge-ws-copy");
        let source = base.join("development");
        let workspace = WorkspaceFs::new();
        workspace.write_file(&source, "src/a.ts", b"a").await?;
        workspace.write_file(&source, "node_modules/m/i.js", b"m").await?;

        let copied = copy_tree(&source, &base.join("snap")).await?;
        assert_eq!(copied, 2);
        assert_eq!(fs::read(base.join("snap/src/a.ts")).await?, b"a");
        assert_eq!(fs::read(base.join("snap/node_modules/m/i.js")).await?, b"m");

        let _ = fs::remove_dir_all(base).await;
        Ok(())
    }
}
