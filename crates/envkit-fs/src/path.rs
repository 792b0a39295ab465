//! Relative path checks and sandbox confinement
//!
//! Catalog definitions reference scripts, templates and markers by relative
//! path. Those strings come from third parties, so every one of them is
//! checked lexically first and then resolved against its sandbox root on
//! disk, following symlinks, before anything touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Reject a declared relative path that is rooted or climbs with `..`.
///
/// This is a purely lexical check and never touches the filesystem, so a
/// hostile path is refused whether or not its target exists.
pub fn reject_unsafe_relative(path: &str) -> Result<()> {
    let unsafe_path = |reason: &str| Error::UnsafePath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.trim().is_empty() {
        return Err(unsafe_path("path is empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(unsafe_path("path is rooted"));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(unsafe_path("path contains '..'"));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(unsafe_path("path is rooted"));
            }
            Component::ParentDir => return Err(unsafe_path("path contains '..'")),
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Resolve `relative` under `root` and assert it stays inside `root`.
///
/// The lexical check runs first. The deepest existing ancestor of the
/// target is then canonicalized (following symlinks) and compared against
/// the canonical root, so a symlink planted inside the sandbox cannot be
/// used to reach outside it. The target itself does not need to exist.
pub fn confine(root: &Path, relative: &str) -> Result<PathBuf> {
    reject_unsafe_relative(relative)?;

    let canonical_root = dunce::canonicalize(root).map_err(|e| Error::io(root, e))?;
    let target = canonical_root.join(relative);

    let mut existing = target.as_path();
    let mut pending: Vec<&std::ffi::OsStr> = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                pending.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = dunce::canonicalize(existing).map_err(|e| Error::io(existing, e))?;
    for name in pending.into_iter().rev() {
        resolved.push(name);
    }

    if !resolved.starts_with(&canonical_root) {
        return Err(Error::OutsideRoot {
            path: resolved,
            root: canonical_root,
        });
    }
    Ok(resolved)
}
