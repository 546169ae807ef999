//! Session record persistence.
//!
//! Layout under the state directory:
//!
//! ```text
//! sessions/<id>.json     in-progress record
//! completed/<id>.json    finalized record
//! locks/<id>.lock        advisory lock guarding both records
//! archives/<id>/         received archives
//! incoming/              chunk bodies being received
//! ```
//!
//! Every read-modify-write of a session must happen while holding its
//! [`SessionLock`]. Records are replaced atomically, so a crash leaves either
//! the previous record or the new one.

use crate::atomic::write_atomic;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use sitesync_core::{Session, SessionId, StoredRecord};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SESSIONS_DIR: &str = "sessions";
const COMPLETED_DIR: &str = "completed";
const LOCKS_DIR: &str = "locks";
const ARCHIVES_DIR: &str = "archives";
const INCOMING_DIR: &str = "incoming";

/// Exclusive advisory lock on one session. Released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    id: SessionId,
}

impl SessionLock {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(session_id = %self.id, error = %e, "failed to release session lock");
        }
    }
}

/// File-backed store of session records.
#[derive(Clone, Debug)]
pub struct SessionStore {
    state_dir: PathBuf,
}

impl SessionStore {
    /// Open a store, creating its directory layout.
    pub fn open(state_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        for dir in [
            SESSIONS_DIR,
            COMPLETED_DIR,
            LOCKS_DIR,
            ARCHIVES_DIR,
            INCOMING_DIR,
        ] {
            fs::create_dir_all(state_dir.join(dir))?;
        }
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.state_dir
            .join(SESSIONS_DIR)
            .join(format!("{}.json", id.as_str()))
    }

    fn completed_path(&self, id: &SessionId) -> PathBuf {
        self.state_dir
            .join(COMPLETED_DIR)
            .join(format!("{}.json", id.as_str()))
    }

    fn lock_file(&self, id: &SessionId) -> StorageResult<File> {
        let path = self
            .state_dir
            .join(LOCKS_DIR)
            .join(format!("{}.lock", id.as_str()));
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StorageError::Lock(format!("failed to open lock file: {e}")))
    }

    /// Block until the session's lock is acquired.
    pub fn lock(&self, id: &SessionId) -> StorageResult<SessionLock> {
        let file = self.lock_file(id)?;
        file.lock_exclusive()
            .map_err(|e| StorageError::Lock(format!("failed to lock session {id}: {e}")))?;
        Ok(SessionLock {
            file,
            id: id.clone(),
        })
    }

    /// Acquire the session's lock if nobody else holds it.
    pub fn try_lock(&self, id: &SessionId) -> StorageResult<Option<SessionLock>> {
        let file = self.lock_file(id)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(SessionLock {
                file,
                id: id.clone(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(StorageError::Lock(format!(
                "failed to lock session {id}: {e}"
            ))),
        }
    }

    fn read_record(path: &Path) -> StorageResult<Option<Session>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        StoredRecord::decode(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))
    }

    /// Load the in-progress record, if any.
    pub fn load(&self, id: &SessionId) -> StorageResult<Option<Session>> {
        Self::read_record(&self.record_path(id))
    }

    /// Load the completed record, if any.
    pub fn load_completed(&self, id: &SessionId) -> StorageResult<Option<Session>> {
        Self::read_record(&self.completed_path(id))
    }

    /// Persist the in-progress record.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn save(&self, session: &Session) -> StorageResult<()> {
        let bytes = StoredRecord::encode(session)?;
        write_atomic(&self.record_path(&session.id), &bytes)?;
        debug!(archives = session.archives.len(), "session saved");
        Ok(())
    }

    /// Persist the completed record.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn save_completed(&self, session: &Session) -> StorageResult<()> {
        let bytes = StoredRecord::encode(session)?;
        write_atomic(&self.completed_path(&session.id), &bytes)?;
        Ok(())
    }

    /// Delete the in-progress record. Missing records are not an error.
    pub fn remove(&self, id: &SessionId) -> StorageResult<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Directory holding the archives of one session.
    pub fn archive_dir(&self, id: &SessionId) -> PathBuf {
        self.state_dir.join(ARCHIVES_DIR).join(id.as_str())
    }

    /// Where archive number `no` of a session is kept.
    pub fn archive_path(&self, id: &SessionId, no: u32) -> PathBuf {
        self.archive_dir(id)
            .join(format!("dist_{}_{no}.tar.zst", id.as_str()))
    }

    /// Delete every archive of a session.
    pub fn remove_archives(&self, id: &SessionId) -> StorageResult<()> {
        match fs::remove_dir_all(self.archive_dir(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Fresh path for a chunk body that is still being received.
    pub fn incoming_path(&self) -> PathBuf {
        self.state_dir
            .join(INCOMING_DIR)
            .join(format!("{}.part", Uuid::new_v4()))
    }

    /// Ids of every in-progress session.
    pub fn list_in_progress(&self) -> StorageResult<Vec<SessionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.state_dir.join(SESSIONS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".json").map(str::to_string)
            else {
                continue;
            };
            if let Ok(id) = SessionId::parse(&stem) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Drop in-progress sessions not updated within `ttl`, and stale incoming bodies.
    ///
    /// Sessions whose lock is currently held are skipped. Returns the number of
    /// sessions removed.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self, now: OffsetDateTime, ttl: Duration) -> StorageResult<usize> {
        let mut removed = 0;
        for id in self.list_in_progress()? {
            let Some(_lock) = self.try_lock(&id)? else {
                continue;
            };
            let session = match self.load(&id) {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "skipping unreadable session");
                    continue;
                }
            };
            if session.is_stale(now, ttl) {
                self.remove(&id)?;
                self.remove_archives(&id)?;
                info!(session_id = %id, "expired stale session");
                removed += 1;
            }
        }

        for entry in fs::read_dir(self.state_dir.join(INCOMING_DIR))? {
            let entry = entry?;
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if OffsetDateTime::from(modified)
                .checked_add(ttl)
                .is_some_and(|deadline| deadline < now)
            {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(removed)
    }
}
