//! Diff resolution: what the receiver has for each manifest path, and what it
//! has that the manifest does not mention.

use sitesync_core::{DiffResponse, IgnoreFilter, Inventory, ManifestEntry, RemoteStat};
use sitesync_storage::{SafeRoot, StorageResult};
use std::collections::{BTreeMap, HashSet};

/// Resolve a manifest against the live tree.
///
/// `filesToUpdate` is keyed by the path exactly as the client sent it, with a
/// null stat for paths that are absent, unsafe or not regular files.
/// `filesToRemove` is every live file, after filtering, whose normalized path is
/// not in the manifest.
#[tracing::instrument(skip_all, fields(manifest = files.len()))]
pub fn resolve(
    site: &SafeRoot,
    filter: &IgnoreFilter,
    files: &[ManifestEntry],
) -> StorageResult<DiffResponse> {
    let mut files_to_update = BTreeMap::new();
    let mut wanted = HashSet::with_capacity(files.len());

    for entry in files {
        let key = SafeRoot::normalize_key(&entry.file);
        wanted.insert(key.to_string());

        let stat = match site.stat(key) {
            Ok(stat) => stat,
            Err(e) => {
                tracing::debug!(path = %entry.file, error = %e, "manifest path not resolvable");
                None
            }
        };
        files_to_update.insert(
            entry.file.clone(),
            stat.map(|s| RemoteStat {
                size: s.size,
                time: s.mtime,
            }),
        );
    }

    let live = Inventory::scan(site.path(), filter)?;
    let files_to_remove = live
        .paths()
        .filter(|path| !wanted.contains(*path))
        .map(|path| (path.to_string(), true))
        .collect();

    Ok(DiffResponse {
        files_to_update,
        files_to_remove,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;

    fn entries(paths: &[&str]) -> Vec<ManifestEntry> {
        paths
            .iter()
            .map(|p| ManifestEntry {
                file: p.to_string(),
            })
            .collect()
    }

    fn site() -> (tempfile::TempDir, SafeRoot) {
        let dir = tempfile::tempdir().unwrap();
        let root = SafeRoot::new(dir.path()).unwrap();
        for name in ["a.txt", "b.txt", "c.txt", ".htaccess", "deploy.php"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        filetime::set_file_mtime(
            dir.path().join("a.txt"),
            FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();
        (dir, root)
    }

    #[test]
    fn test_unmentioned_file_flagged_for_removal() {
        let (_dir, root) = site();
        let filter = IgnoreFilter::site_defaults().unwrap();
        let diff = resolve(&root, &filter, &entries(&["a.txt", "b.txt"])).unwrap();

        assert_eq!(diff.removal_paths(), vec!["c.txt"]);
        assert_eq!(
            diff.files_to_update["a.txt"],
            Some(RemoteStat {
                size: 5,
                time: 1_700_000_000
            })
        );
    }

    #[test]
    fn test_removals_independent_of_manifest_order() {
        let (_dir, root) = site();
        let filter = IgnoreFilter::site_defaults().unwrap();
        let forward = resolve(&root, &filter, &entries(&["a.txt", "c.txt"])).unwrap();
        let backward = resolve(&root, &filter, &entries(&["c.txt", "a.txt"])).unwrap();
        assert_eq!(forward.files_to_remove, backward.files_to_remove);
        assert_eq!(forward.removal_paths(), vec!["b.txt"]);
    }

    #[test]
    fn test_missing_and_unsafe_paths_get_null_stat() {
        let (_dir, root) = site();
        let filter = IgnoreFilter::site_defaults().unwrap();
        let diff = resolve(
            &root,
            &filter,
            &entries(&["/a.txt", "new.html", "../etc/passwd"]),
        )
        .unwrap();

        assert!(diff.files_to_update["/a.txt"].is_some());
        assert_eq!(diff.files_to_update["new.html"], None);
        assert_eq!(diff.files_to_update["../etc/passwd"], None);
        // A leading slash still counts as mentioning the file.
        assert!(!diff.files_to_remove.contains_key("a.txt"));
    }
}
