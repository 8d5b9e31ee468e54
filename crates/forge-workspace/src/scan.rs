use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use forge_protocol::{DirectoryNode, FileRecord, FileStatus, NodeKind};
use walkdir::{DirEntry, WalkDir};

use crate::content_digest;
use crate::paths::relative_display;

pub(crate) fn is_ignored(name: &str, ignored: &[String]) -> bool {
    name.starts_with('.') || ignored.iter().any(|candidate| candidate == name)
}

fn keep_entry(entry: &DirEntry, ignored: &[String]) -> bool {
    entry.depth() == 0 || !is_ignored(&entry.file_name().to_string_lossy(), ignored)
}

pub(crate) fn scan_blocking(root: &Path, ignored: &[String]) -> io::Result<Vec<FileRecord>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let synced_at = Utc::now();
    let mut records = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| keep_entry(entry, ignored));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())?;
        let last_modified = entry
            .metadata()?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(synced_at);
        records.push(FileRecord {
            relative_path: relative_display(root, entry.path()),
            content_digest: content_digest(&bytes),
            last_modified,
            last_sync_time: synced_at,
            status: FileStatus::Synced,
        });
    }

    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(records)
}

pub(crate) fn structure_blocking(root: &Path, ignored: &[String]) -> io::Result<DirectoryNode> {
    let name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let children = if root.is_dir() {
        children_of(root, root, ignored)?
    } else {
        Vec::new()
    };
    Ok(DirectoryNode {
        name,
        path: String::new(),
        kind: NodeKind::Directory,
        children,
    })
}

fn children_of(root: &Path, dir: &Path, ignored: &[String]) -> io::Result<Vec<DirectoryNode>> {
    let mut directories = Vec::new();
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name, ignored) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            directories.push(DirectoryNode {
                name,
                path: relative_display(root, &path),
                kind: NodeKind::Directory,
                children: children_of(root, &path, ignored)?,
            });
        } else if file_type.is_file() {
            files.push(DirectoryNode {
                name,
                path: relative_display(root, &path),
                kind: NodeKind::File,
                children: Vec::new(),
            });
        }
    }

    directories.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    directories.extend(files);
    Ok(directories)
}
