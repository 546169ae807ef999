//! Path resolution confined to a root directory.

use crate::error::{StorageError, StorageResult};
use sitesync_core::inventory::{FileStat, StatError, stat_file};
use std::path::{Component, Path, PathBuf};

/// A directory that client-supplied relative paths are resolved against.
///
/// Every resolution rejects absolute paths, `..` components and symlinks whose
/// targets escape the root, including through ancestors that do not exist yet.
#[derive(Clone, Debug)]
pub struct SafeRoot {
    root: PathBuf,
    root_canonical: PathBuf,
}

impl SafeRoot {
    /// Open (creating if needed) a root directory.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;
        Ok(Self {
            root,
            root_canonical,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Strip the leading slashes clients send for root-relative paths.
    pub fn normalize_key(key: &str) -> &str {
        key.trim_start_matches('/')
    }

    /// Resolve a relative key to a path inside the root.
    pub fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty path".to_string()));
        }
        if key.starts_with('/') || key.starts_with('\\') || key.contains('\0') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        // Validate all path components are normal (no .., ., root, etc.)
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        if key.split('\\').any(|part| part == "..") {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = self.root.join(key);

        // Existing paths (or symlinks, even if broken) must canonicalize inside the root.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&self.root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // New paths: the nearest existing ancestor must be inside the root, so a
        // symlinked directory cannot redirect files created below it.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&self.root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Size and mtime of a regular file, `None` when it does not exist or is not a file.
    pub fn stat(&self, key: &str) -> StorageResult<Option<FileStat>> {
        let path = self.resolve(key)?;
        match stat_file(&path) {
            Ok(stat) => Ok(Some(stat)),
            Err(StatError::NotFound(_)) | Err(StatError::NotAFile(_)) => Ok(None),
            Err(StatError::Io { source, .. }) => Err(StorageError::Io(source)),
        }
    }

    /// Remove a file. Returns whether the path is gone afterwards.
    ///
    /// Success is decided by re-checking existence, not by the removal call.
    pub fn remove_file(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(key, error = %e, "remove failed");
        }
        match std::fs::symlink_metadata(&path) {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
