//! Chunk receiver and session finalizer.
//!
//! Everything here is blocking filesystem work and runs under `spawn_blocking`.
//! Each operation holds the session lock from the first load to the last save.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::http::StatusCode;
use sitesync_core::{Archive, FileRecord, Inventory, RemovedFile, Session, SessionId};
use sitesync_storage::unpack;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// A chunk body fully received to a temp file.
#[derive(Debug)]
pub struct ChunkUpload {
    pub id: SessionId,
    pub chunks: Option<u32>,
    pub index: Option<u32>,
    pub client_address: String,
    pub body: PathBuf,
    pub size: u64,
}

/// What a chunk upload did to its session.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Archive recorded; more chunks expected.
    Accepted(Session),
    /// Archive recorded and the session was finalized.
    Completed(Session),
    /// The declared index was already received; nothing was recorded.
    Duplicate(Session),
}

impl ChunkOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Completed(_) => StatusCode::CREATED,
            Self::Duplicate(session) if session.state().is_terminal() => StatusCode::CREATED,
            Self::Accepted(_) | Self::Duplicate(_) => StatusCode::OK,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Accepted(s) | Self::Completed(s) | Self::Duplicate(s) => s,
        }
    }
}

/// Temp file for an incoming body; deleted on drop unless it was moved away.
#[derive(Debug)]
pub struct IncomingFile {
    path: PathBuf,
}

impl IncomingFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IncomingFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "discarded incoming body"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to discard incoming body"),
        }
    }
}

/// Load the in-progress session or create one. A completed id is never reopened.
fn load_or_create(
    state: &AppState,
    id: &SessionId,
    client_address: &str,
    now: OffsetDateTime,
) -> ApiResult<Session> {
    if state.sessions.load_completed(id)?.is_some() {
        return Err(ApiError::Conflict(format!("session {id} is already completed")));
    }
    Ok(state
        .sessions
        .load(id)?
        .unwrap_or_else(|| Session::new(id.clone(), client_address, now)))
}

/// Record one uploaded archive, unpack it into the live tree, and finalize the
/// session once every expected chunk has arrived.
#[instrument(skip(state, upload), fields(session_id = %upload.id, chunks = ?upload.chunks, index = ?upload.index, size = upload.size))]
pub fn receive_chunk(state: &AppState, upload: ChunkUpload) -> ApiResult<ChunkOutcome> {
    let sessions = &state.sessions;
    let id = &upload.id;
    let _lock = sessions.lock(id)?;
    let now = OffsetDateTime::now_utc();

    if let Some(index) = upload.index
        && let Some(completed) = sessions.load_completed(id)?
        && completed.has_index(index)
    {
        debug!("chunk already part of a completed session");
        return Ok(ChunkOutcome::Duplicate(completed));
    }
    let mut session = load_or_create(state, id, &upload.client_address, now)?;

    if let Some(chunks) = upload.chunks {
        session.set_expected_chunks(chunks)?;
    }
    if let Some(index) = upload.index {
        session.validate_index(index)?;
        if session.has_index(index) {
            debug!("duplicate chunk index, not re-counted");
            session.touch(now);
            if session.is_ready() {
                return finalize(state, session, now).map(ChunkOutcome::Completed);
            }
            sessions.save(&session)?;
            return Ok(ChunkOutcome::Duplicate(session));
        }
    }

    // Persist the body under its sequence number.
    let no = session.next_archive_no();
    let archive_path = sessions.archive_path(id, no);
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&upload.body, &archive_path)?;

    session.add_archive(Archive {
        no,
        index: upload.index,
        path: archive_path.display().to_string(),
        size: upload.size,
        mtime: now.unix_timestamp(),
        files: Vec::new(),
        error: None,
    });
    session.touch(now);
    sessions.save(&session)?;

    let (files, error) = match unpack(&archive_path, &state.site, &state.filter) {
        Ok(outcome) => (outcome.files, outcome.error),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    let failed = files.iter().filter(|f| f.error().is_some()).count();
    info!(
        archive = no,
        files = files.len(),
        failed,
        corrupt = error.is_some(),
        "archive unpacked"
    );
    let unpacked_cleanly = error.is_none();

    // Reload so the second save builds on whatever is on disk now.
    let mut session = sessions
        .load(id)?
        .ok_or_else(|| ApiError::Internal(format!("session {id} vanished while unpacking")))?;
    if !session.attach_unpacked(no, files, error) {
        return Err(ApiError::Internal(format!(
            "archive {no} missing from reloaded session {id}"
        )));
    }
    session.touch(OffsetDateTime::now_utc());
    sessions.save(&session)?;
    debug!(
        archives = session.archives.len(),
        unpacked_files = session.file_map().len(),
        "session updated"
    );

    if unpacked_cleanly
        && !state.config.server.keep_archives
        && let Err(e) = fs::remove_file(&archive_path)
    {
        warn!(archive = no, error = %e, "failed to delete unpacked archive");
    }

    if session.is_ready() {
        let completed = finalize(state, session, OffsetDateTime::now_utc())?;
        return Ok(ChunkOutcome::Completed(completed));
    }
    Ok(ChunkOutcome::Accepted(session))
}

/// Apply pending removals, snapshot the live tree and move the session to completed.
#[instrument(skip_all, fields(session_id = %session.id))]
fn finalize(state: &AppState, mut session: Session, now: OffsetDateTime) -> ApiResult<Session> {
    let removed: Vec<RemovedFile> = session
        .pending_removals
        .iter()
        .map(|path| RemovedFile {
            path: path.clone(),
            still_exists: remove_path(state, path),
        })
        .collect();

    let inventory = Inventory::scan(state.site.path(), &state.filter)?;
    let files = inventory
        .iter()
        .map(|(path, stat)| FileRecord::ok(path, *stat))
        .collect();

    session.record_removals(removed);
    session.set_files(files);
    session.mark_completed(now);

    state.sessions.save_completed(&session)?;
    state.sessions.remove(&session.id)?;
    if !state.config.server.keep_archives {
        state.sessions.remove_archives(&session.id)?;
    }

    info!(
        removed = session.removed.iter().filter(|r| !r.still_exists).count(),
        files = session.files.len(),
        "session completed"
    );
    Ok(session)
}

/// Best-effort removal of one path. Returns whether it still exists afterwards.
fn remove_path(state: &AppState, path: &str) -> bool {
    let key = sitesync_storage::SafeRoot::normalize_key(path);
    if state.filter.is_ignored_path(key) {
        debug!(path, "refusing to remove ignored path");
        return state
            .site
            .resolve(key)
            .map(|p| p.symlink_metadata().is_ok())
            .unwrap_or(false);
    }
    match state.site.remove_file(key) {
        Ok(gone) => !gone,
        Err(e) => {
            warn!(path, error = %e, "failed to remove path");
            true
        }
    }
}

/// Store the removal list computed for a manifest on the session it belongs to.
#[instrument(skip(state, removals), fields(removals = removals.len()))]
pub fn register_removals(
    state: &AppState,
    id: &SessionId,
    client_address: &str,
    removals: Vec<String>,
) -> ApiResult<()> {
    let _lock = state.sessions.lock(id)?;
    let now = OffsetDateTime::now_utc();
    let mut session = load_or_create(state, id, client_address, now)?;
    session.pending_removals = removals;
    session.touch(now);
    state.sessions.save(&session)?;
    Ok(())
}
