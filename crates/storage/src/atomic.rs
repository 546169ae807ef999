//! Atomic file replacement.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sibling temp path for `path`, unique per call.
///
/// The name starts with a dot so that a scan of the tree running alongside the
/// write filters it out with the default ignore patterns.
pub fn temp_path_for(path: &Path) -> PathBuf {
    // UUID avoids conflicts during concurrent writes to the same file
    let suffix = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!(".{}{}", n.to_string_lossy(), suffix))
            .unwrap_or(suffix),
    )
}

/// Replace `path` with `data`: write a temp file, fsync it, then rename over the target.
///
/// Readers observe either the previous contents or the new contents, never a
/// partial write.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/record.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = temp_path_for(Path::new("/state/sessions/a.json"));
        assert_eq!(temp.parent(), Some(Path::new("/state/sessions")));
        assert!(temp.file_name().unwrap().to_string_lossy().starts_with(".a.json.tmp."));
    }
}
