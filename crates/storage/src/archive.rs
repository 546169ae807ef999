//! tar+zstd archives of site files.
//!
//! Archives carry plain regular files under forward-slash relative paths, with
//! each file's modification time in its header so the receiver reproduces it.

use crate::atomic::temp_path_for;
use crate::error::{StorageError, StorageResult};
use crate::paths::SafeRoot;
use sitesync_core::inventory::{mtime_secs, relative_key, stat_file};
use sitesync_core::{FileRecord, IgnoreFilter, PlannedFile};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, instrument, warn};

/// Highest zstd level that does not need the decoder's long-window mode.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 19;

/// Result of writing one archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    /// Compressed size on disk.
    pub size: u64,
    pub files: usize,
}

/// Writer for tar+zstd archives.
#[derive(Clone, Debug)]
pub struct ArchiveWriter {
    compression_level: i32,
}

impl ArchiveWriter {
    pub fn new(compression_level: i32) -> Self {
        let range = zstd::compression_level_range();
        Self {
            compression_level: compression_level.clamp(*range.start(), *range.end()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }

    /// Pack `files` (paths relative to `source_root`) into `dest`.
    ///
    /// Atomic: either the complete archive is written or no file is left behind.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub fn write(
        &self,
        source_root: &Path,
        files: &[PlannedFile],
        dest: &Path,
    ) -> StorageResult<ArchiveInfo> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(dest);
        match self.write_inner(source_root, files, &temp_path) {
            Ok(()) => {
                fs::rename(&temp_path, dest)?;
                let size = fs::metadata(dest)?.len();
                debug!(size, "archive written");
                Ok(ArchiveInfo {
                    path: dest.to_path_buf(),
                    size,
                    files: files.len(),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    fn write_inner(
        &self,
        source_root: &Path,
        files: &[PlannedFile],
        path: &Path,
    ) -> StorageResult<()> {
        let file = File::create(path)?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), self.compression_level)
            .map_err(|e| StorageError::Archive(format!("zstd encoder: {e}")))?;
        let mut builder = Builder::new(encoder);

        for planned in files {
            let source = source_root.join(&planned.path);
            let file = File::open(&source)
                .map_err(|e| StorageError::Archive(format!("open '{}': {e}", planned.path)))?;
            let meta = file.metadata()?;

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(meta.len());
            header.set_mode(0o644);
            header.set_mtime(u64::try_from(mtime_secs(&meta)?).unwrap_or(0));

            // Never read past the size recorded in the header, even if the file grows.
            builder
                .append_data(&mut header, &planned.path, file.take(meta.len()))
                .map_err(|e| StorageError::Archive(format!("append '{}': {e}", planned.path)))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| StorageError::Archive(format!("tar finish: {e}")))?;
        let writer = encoder
            .finish()
            .map_err(|e| StorageError::Archive(format!("zstd finish: {e}")))?;
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::Archive(format!("flush: {}", e.error())))?;
        file.sync_all()?;
        Ok(())
    }
}

/// What unpacking an archive produced.
#[derive(Clone, Debug, Default)]
pub struct UnpackOutcome {
    /// One record per entry, including refused and failed ones.
    pub files: Vec<FileRecord>,
    /// Set when the archive stream itself was corrupt; entries before the
    /// corruption are still in `files`.
    pub error: Option<String>,
}

/// Extract regular files of `archive` under `root`.
///
/// Entries with unsafe paths, non-file entries and paths hidden by `filter` are
/// refused and recorded as failures. A failing entry never stops the remaining
/// entries from being extracted.
#[instrument(skip(root, filter))]
pub fn unpack(
    archive: &Path,
    root: &SafeRoot,
    filter: &IgnoreFilter,
) -> StorageResult<UnpackOutcome> {
    let file = File::open(archive)?;
    let decoder = zstd::Decoder::new(BufReader::new(file))
        .map_err(|e| StorageError::Archive(format!("zstd decode: {e}")))?;
    let mut tar = Archive::new(decoder);
    let mut outcome = UnpackOutcome::default();

    let entries = match tar.entries() {
        Ok(entries) => entries,
        Err(e) => {
            outcome.error = Some(e.to_string());
            return Ok(outcome);
        }
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "archive stream corrupt");
                outcome.error = Some(e.to_string());
                break;
            }
        };

        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }

        let Some(key) = entry.path().ok().and_then(|p| relative_key(&p)) else {
            outcome.files.push(FileRecord::failed(raw, "unsafe path"));
            continue;
        };
        if !entry_type.is_file() {
            outcome
                .files
                .push(FileRecord::failed(key, "unsupported entry type"));
            continue;
        }
        if filter.is_ignored_path(&key) {
            outcome.files.push(FileRecord::failed(key, "ignored path"));
            continue;
        }

        let dest = match root.resolve(&key) {
            Ok(dest) => dest,
            Err(e) => {
                outcome.files.push(FileRecord::failed(key, e));
                continue;
            }
        };
        if let Some(parent) = dest.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            outcome.files.push(FileRecord::failed(key, e));
            continue;
        }
        // Readers of the live tree see either the old file or the new one.
        let temp = temp_path_for(&dest);
        if let Err(e) = entry.unpack(&temp).and_then(|_| fs::rename(&temp, &dest)) {
            let _ = fs::remove_file(&temp);
            outcome.files.push(FileRecord::failed(key, e));
            continue;
        }

        outcome.files.push(FileRecord::from_stat(key, stat_file(&dest)));
    }

    debug!(files = outcome.files.len(), "archive unpacked");
    Ok(outcome)
}
