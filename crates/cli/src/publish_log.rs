//! Client-side publish log.
//!
//! The log is created exclusively at the start of a run and renamed to its
//! done name only after the run succeeds. A log left under the active name
//! means an earlier run never finished, and blocks new runs until an operator
//! has looked at it.

use serde::Serialize;
use sitesync_core::SessionId;
use sitesync_storage::write_atomic;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const ACTIVE_LOG_NAME: &str = "publish.log.json";
pub const DONE_LOG_NAME: &str = "publish.log.done.json";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(
        "a previous publish run did not finish: {} exists; inspect it and remove it to publish again",
        .0.display()
    )]
    InProgress(PathBuf),

    #[error("publish log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCounts {
    pub local: usize,
    pub to_upload: usize,
    pub to_remove: usize,
}

#[derive(Debug, Serialize)]
pub struct ArchiveEntry {
    pub no: u32,
    pub path: String,
    pub bytes: u64,
    pub files: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub no: u32,
    pub status: u16,
    pub state: String,
    /// Files the receiver recorded with an error while unpacking.
    pub failed_files: usize,
}

/// Everything a run did, written after each phase.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRecord {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Wall-clock seconds from start to completion.
    pub spent_time: Option<f64>,
    pub unwanted_files: Vec<String>,
    pub file_counts: FileCounts,
    pub archives: Vec<ArchiveEntry>,
    pub uploaded: Vec<UploadEntry>,
    pub deleted: Vec<String>,
    pub corrupted: Vec<String>,
    pub errors: Vec<String>,
}

impl PublishRecord {
    fn new(session_id: &SessionId, now: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: now,
            completed_at: None,
            spent_time: None,
            unwanted_files: Vec::new(),
            file_counts: FileCounts::default(),
            archives: Vec::new(),
            uploaded: Vec::new(),
            deleted: Vec::new(),
            corrupted: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct PublishLog {
    path: PathBuf,
    done_path: PathBuf,
    pub record: PublishRecord,
}

impl PublishLog {
    /// Create the active log, failing with [`PublishError::InProgress`] if one exists.
    pub fn acquire(
        log_dir: &Path,
        session_id: &SessionId,
        now: OffsetDateTime,
    ) -> Result<Self, PublishError> {
        let path = log_dir.join(ACTIVE_LOG_NAME);
        let io_err = |source: io::Error| PublishError::Log {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(log_dir).map_err(io_err)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PublishError::InProgress(path));
            }
            Err(e) => return Err(io_err(e)),
        }

        let log = Self {
            done_path: log_dir.join(DONE_LOG_NAME),
            record: PublishRecord::new(session_id, now),
            path,
        };
        log.save()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the active log with the current record.
    pub fn save(&self) -> Result<(), PublishError> {
        let err = |source: io::Error| PublishError::Log {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.record).map_err(|e| err(e.into()))?;
        write_atomic(&self.path, &json).map_err(err)
    }

    /// Record an error and persist it. Failing to persist is only logged: the
    /// original error is what the caller reports.
    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.record.errors.push(error.to_string());
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to record error in publish log");
        }
    }

    /// Stamp completion and move the log to its done name, replacing a previous one.
    pub fn complete(mut self, now: OffsetDateTime) -> Result<PathBuf, PublishError> {
        self.record.completed_at = Some(now);
        self.record.spent_time = Some((now - self.record.started_at).as_seconds_f64());
        self.save()?;
        fs::rename(&self.path, &self.done_path).map_err(|source| PublishError::Log {
            path: self.done_path.clone(),
            source,
        })?;
        Ok(self.done_path)
    }

    /// Remove the active log of a run that changed nothing.
    pub fn discard(self) -> Result<(), PublishError> {
        fs::remove_file(&self.path).map_err(|source| PublishError::Log {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn id() -> SessionId {
        SessionId::parse("20260119.abc").unwrap()
    }

    #[test]
    fn test_second_acquire_is_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2026-01-19 10:00 UTC);
        let _log = PublishLog::acquire(dir.path(), &id(), now).unwrap();

        let err = PublishLog::acquire(dir.path(), &id(), now).unwrap_err();
        assert!(matches!(err, PublishError::InProgress(ref p) if p.ends_with(ACTIVE_LOG_NAME)));
    }

    #[test]
    fn test_complete_renames_and_unblocks() {
        let dir = tempfile::tempdir().unwrap();
        let start = datetime!(2026-01-19 10:00 UTC);
        let mut log = PublishLog::acquire(dir.path(), &id(), start).unwrap();
        log.record.deleted.push("old.html".to_string());
        log.save().unwrap();

        let done = log.complete(start + time::Duration::seconds(90)).unwrap();
        assert!(!dir.path().join(ACTIVE_LOG_NAME).exists());

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&done).unwrap()).unwrap();
        assert_eq!(json["sessionId"], "20260119.abc");
        assert_eq!(json["spentTime"], 90.0);
        assert_eq!(json["deleted"][0], "old.html");
        assert!(json["completedAt"].is_string());

        // A finished run leaves the way clear for the next one.
        let next = PublishLog::acquire(dir.path(), &id(), start).unwrap();
        next.complete(start).unwrap();
        assert!(dir.path().join(DONE_LOG_NAME).exists());
    }

    #[test]
    fn test_fail_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut log =
            PublishLog::acquire(dir.path(), &id(), datetime!(2026-01-19 10:00 UTC)).unwrap();
        log.fail("upload failed");

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(log.path()).unwrap()).unwrap();
        assert_eq!(json["errors"], serde_json::json!(["upload failed"]));
        assert!(json["completedAt"].is_null());
    }
}
