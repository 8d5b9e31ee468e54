use std::path::{Component, Path, PathBuf};

use forge_protocol::{ForgeError, ForgeResult};

/// Join `relative_path` onto `root`, refusing anything that could land outside it.
///
/// Rejects empty, absolute, and separator-prefixed paths and any `..` segment
/// (with either separator). When the root already exists, every existing
/// component that is a symlink must resolve inside the root, so a link in the
/// workspace (dangling or not) cannot redirect a write elsewhere.
pub fn resolve_in_root(root: &Path, relative_path: &str) -> ForgeResult<PathBuf> {
    let reject = || ForgeError::PathTraversal(relative_path.to_owned());

    if relative_path.is_empty() || relative_path.starts_with(['/', '\\']) {
        return Err(reject());
    }
    if relative_path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(reject());
    }

    let candidate = Path::new(relative_path);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject());
            }
        }
    }

    let joined = root.join(candidate);
    let Ok(canonical_root) = root.canonicalize() else {
        return Ok(joined);
    };

    let mut current = root.to_path_buf();
    for component in candidate.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        current.push(part);
        let metadata = match std::fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => break,
            Err(error) => return Err(error.into()),
        };
        if !metadata.file_type().is_symlink() {
            continue;
        }
        // Dangling or looping links fail to canonicalize and are refused too.
        match current.canonicalize() {
            Ok(target) if target.starts_with(&canonical_root) => {}
            _ => return Err(reject()),
        }
    }

    Ok(joined)
}

/// `/`-separated form of a path relative to `root`.
pub(crate) fn relative_display(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
