//! File inventory: relative path, size and modification time for every file in a tree.

use crate::error::{Error, Result};
use crate::filter::IgnoreFilter;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Component, Path};
use thiserror::Error;
use time::OffsetDateTime;

/// Size and modification time (unix seconds) of a single file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime: i64,
}

impl FileStat {
    /// Build from filesystem metadata.
    pub fn from_metadata(meta: &Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: meta.len(),
            mtime: mtime_secs(meta)?,
        })
    }
}

/// Failure to stat a single file.
#[derive(Debug, Error)]
pub enum StatError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("failed to stat {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Stat a file, following symlinks.
pub fn stat_file(path: &Path) -> std::result::Result<FileStat, StatError> {
    let display = path.display().to_string();
    let meta = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StatError::NotFound(display.clone())
        } else {
            StatError::Io {
                path: display.clone(),
                source: e,
            }
        }
    })?;
    if !meta.is_file() {
        return Err(StatError::NotAFile(display));
    }
    FileStat::from_metadata(&meta).map_err(|source| StatError::Io {
        path: display,
        source,
    })
}

/// Modification time of `meta` in whole unix seconds.
pub fn mtime_secs(meta: &Metadata) -> std::io::Result<i64> {
    Ok(OffsetDateTime::from(meta.modified()?).unix_timestamp())
}

/// Convert a path relative to a root into a forward-slash key.
///
/// Returns `None` for paths containing anything but normal components, or
/// components that are not valid UTF-8.
pub fn relative_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Relative path → stat for every regular file under a root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    files: BTreeMap<String, FileStat>,
}

impl Inventory {
    /// Walk `root` and record every regular file not hidden by `filter`.
    ///
    /// The filter is applied to each name at every level; an ignored directory is
    /// not descended into. Symlinks are not followed, so a link in the tree is
    /// never listed.
    pub fn scan(root: &Path, filter: &IgnoreFilter) -> Result<Self> {
        Self::walk(root, filter, false)
    }

    /// Like [`Inventory::scan`], but symlinks are followed and a linked file is
    /// recorded under the link's path with the target's size and mtime.
    ///
    /// Used on the publishing side, where a link in the build output stands for
    /// content that must be shipped. A dangling link or a link cycle fails the scan.
    pub fn scan_following_links(root: &Path, filter: &IgnoreFilter) -> Result<Self> {
        Self::walk(root, filter, true)
    }

    #[tracing::instrument(skip(filter))]
    fn walk(root: &Path, filter: &IgnoreFilter, follow_links: bool) -> Result<Self> {
        let entry_filter = filter.clone();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(follow_links)
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry_filter.is_ignored_name(&entry.file_name().to_string_lossy())
            })
            .build();

        let mut files = BTreeMap::new();
        for result in walker {
            let entry = result.map_err(|e| Error::Inventory(e.to_string()))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(key) = relative_key(relative) else {
                tracing::warn!(path = %relative.display(), "skipping file with unsupported name");
                continue;
            };
            let meta = entry
                .metadata()
                .map_err(|e| Error::Inventory(format!("{key}: {e}")))?;
            files.insert(key, FileStat::from_metadata(&meta)?);
        }

        tracing::debug!(files = files.len(), "inventory complete");
        Ok(Self { files })
    }

    pub fn get(&self, path: &str) -> Option<&FileStat> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileStat)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|s| s.size).sum()
    }
}

impl FromIterator<(String, FileStat)> for Inventory {
    fn from_iter<T: IntoIterator<Item = (String, FileStat)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
    }

    #[test]
    fn test_scan_lists_files_with_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html>");
        write(dir.path(), "assets/css/site.css", "body{}");
        filetime::set_file_mtime(
            dir.path().join("index.html"),
            FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();

        let inventory = Inventory::scan(dir.path(), &IgnoreFilter::empty()).unwrap();
        let paths: Vec<_> = inventory.paths().collect();
        assert_eq!(paths, vec!["assets/css/site.css", "index.html"]);

        let stat = inventory.get("index.html").unwrap();
        assert_eq!(stat.size, 6);
        assert_eq!(stat.mtime, 1_700_000_000);
    }

    #[test]
    fn test_scan_applies_filter_at_every_level() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), ".env", "SECRET=1");
        write(dir.path(), "deploy.php", "<?php");
        write(dir.path(), ".nw/sessions/x.json", "{}");
        write(dir.path(), "blog/.draft.md", "draft");
        write(dir.path(), "blog/post.html", "post");

        let filter = IgnoreFilter::site_defaults().unwrap();
        let inventory = Inventory::scan(dir.path(), &filter).unwrap();
        let paths: Vec<_> = inventory.paths().collect();
        assert_eq!(paths, vec!["a.txt", "blog/post.html"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.txt", "secret");
        write(dir.path(), "a.txt", "a");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

        let inventory = Inventory::scan(dir.path(), &IgnoreFilter::empty()).unwrap();
        assert_eq!(inventory.len(), 1);
        assert!(inventory.contains("a.txt"));
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_following_links_lists_linked_files() {
        let dir = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html>");
        write(shared.path(), "logo.png", "PNGDATA");
        filetime::set_file_mtime(
            shared.path().join("logo.png"),
            FileTime::from_unix_time(1_700_000_300, 0),
        )
        .unwrap();
        std::os::unix::fs::symlink(shared.path().join("logo.png"), dir.path().join("logo.png"))
            .unwrap();
        std::os::unix::fs::symlink(shared.path(), dir.path().join("assets")).unwrap();

        let inventory =
            Inventory::scan_following_links(dir.path(), &IgnoreFilter::empty()).unwrap();
        let paths: Vec<_> = inventory.paths().collect();
        assert_eq!(paths, vec!["assets/logo.png", "index.html", "logo.png"]);
        assert_eq!(
            inventory.get("logo.png"),
            Some(&FileStat {
                size: 7,
                mtime: 1_700_000_300
            })
        );

        // The receiving side never lists links.
        let live = Inventory::scan(dir.path(), &IgnoreFilter::empty()).unwrap();
        assert_eq!(live.paths().collect::<Vec<_>>(), vec!["index.html"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_following_links_fails_on_dangling_link() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html>");
        std::os::unix::fs::symlink(dir.path().join("gone.png"), dir.path().join("logo.png"))
            .unwrap();

        let err = Inventory::scan_following_links(dir.path(), &IgnoreFilter::empty()).unwrap_err();
        assert!(matches!(err, Error::Inventory(_)), "{err:?}");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_scan_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.html")), "x").unwrap();

        let inventory = Inventory::scan(dir.path(), &IgnoreFilter::empty()).unwrap();
        assert_eq!(inventory.paths().collect::<Vec<_>>(), vec!["a.txt"]);
        assert!(relative_key(Path::new(OsStr::from_bytes(b"dir/bad\xff"))).is_none());
    }

    #[test]
    fn test_stat_file_errors_are_explicit() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            stat_file(&dir.path().join("missing")),
            Err(StatError::NotFound(_))
        ));
        assert!(matches!(stat_file(dir.path()), Err(StatError::NotAFile(_))));
    }

    #[test]
    fn test_relative_key_rejects_parent_components() {
        assert_eq!(
            relative_key(Path::new("a/./b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert!(relative_key(Path::new("../b.txt")).is_none());
        assert!(relative_key(Path::new("")).is_none());
    }

    #[test]
    fn test_collect_and_total_bytes() {
        let inventory: Inventory = [
            ("state/a.json".to_string(), FileStat { size: 1, mtime: 0 }),
            ("statement.html".to_string(), FileStat { size: 2, mtime: 0 }),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            inventory.paths().collect::<Vec<_>>(),
            vec!["state/a.json", "statement.html"]
        );
        assert_eq!(inventory.total_bytes(), 3);
    }
}
