//! Publish session records and their lifecycle.
//!
//! A session is the receiver-side record of one publish run. It is created by
//! the first chunk (or manifest) carrying an unseen id, gains one [`Archive`] per
//! uploaded chunk, becomes ready once the declared number of chunks has arrived,
//! and is finalized into a completed record.
//!
//! Records are persisted through [`StoredRecord`], an explicitly tagged envelope:
//! only the shapes named here can ever be decoded from disk.

use crate::error::{Error, Result};
use crate::inventory::{FileStat, StatError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Maximum length of a session identifier.
const MAX_SESSION_ID_LEN: usize = 64;

/// Client-generated identifier of a publish run, safe to use as a file name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Parse and validate an identifier.
    ///
    /// Accepts 1-64 characters from `[A-Za-z0-9._-]`, not starting with `.`
    /// and never containing `..`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSessionId(format!(
                "length must be between 1 and {MAX_SESSION_ID_LEN}"
            )));
        }
        if s.starts_with('.') || s.contains("..") {
            return Err(Error::InvalidSessionId(s.to_string()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(Error::InvalidSessionId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Generate an identifier for a run starting at `now`.
    ///
    /// Format: `YYYYMMDD.` followed by the base36 microseconds since midnight.
    pub fn generate(now: OffsetDateTime) -> Self {
        let date = now.date();
        let time = now.time();
        let micros = (u64::from(time.hour()) * 3600
            + u64::from(time.minute()) * 60
            + u64::from(time.second()))
            * 1_000_000
            + u64::from(time.microsecond());
        Self(format!(
            "{:04}{:02}{:02}.{}",
            date.year(),
            u8::from(date.month()),
            date.day(),
            base36(micros)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Fewer archives than expected have arrived (or the count is unknown).
    Collecting,
    /// Every expected archive has arrived; finalization pending.
    Ready,
    /// Finalized. Terminal.
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Ready => "ready",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of stat'ing one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatOutcome {
    Ok { size: u64, mtime: i64 },
    Error { error: String },
}

/// Per-file record produced by an inventory or by unpacking an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(flatten)]
    pub outcome: StatOutcome,
}

impl FileRecord {
    pub fn ok(path: impl Into<String>, stat: FileStat) -> Self {
        Self {
            path: path.into(),
            outcome: StatOutcome::Ok {
                size: stat.size,
                mtime: stat.mtime,
            },
        }
    }

    pub fn failed(path: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            outcome: StatOutcome::Error {
                error: error.to_string(),
            },
        }
    }

    /// Record the result of a stat, keeping the error text on failure.
    pub fn from_stat(
        path: impl Into<String>,
        result: std::result::Result<FileStat, StatError>,
    ) -> Self {
        match result {
            Ok(stat) => Self::ok(path, stat),
            Err(e) => Self::failed(path, e),
        }
    }

    pub fn stat(&self) -> Option<FileStat> {
        match self.outcome {
            StatOutcome::Ok { size, mtime } => Some(FileStat { size, mtime }),
            StatOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            StatOutcome::Ok { .. } => None,
            StatOutcome::Error { error } => Some(error),
        }
    }
}

/// One uploaded chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archive {
    /// Arrival sequence number, 1-based.
    pub no: u32,
    /// Chunk index declared by the client, when it sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Where the archive was stored on the receiver.
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    /// Archive-level unpack failure (corrupt stream, unreadable file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of removing one path during finalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFile {
    pub path: String,
    pub still_exists: bool,
}

/// Receiver-side record of one publish run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub client_address: String,
    pub state: SessionState,
    #[serde(default)]
    pub expected_chunks: Option<u32>,
    #[serde(default)]
    pub archives: Vec<Archive>,
    #[serde(default)]
    pub removed: Vec<RemovedFile>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    /// Paths the finalizer removes, registered through the manifest request.
    #[serde(default)]
    pub pending_removals: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    /// Create a fresh collecting session.
    pub fn new(id: SessionId, client_address: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id,
            client_address: client_address.into(),
            state: SessionState::Collecting,
            expected_chunks: None,
            archives: Vec::new(),
            removed: Vec::new(),
            files: Vec::new(),
            pending_removals: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Declare the total number of chunks for this run.
    ///
    /// The first declaration locks the count; re-declaring the same value is a
    /// no-op and a different value is rejected.
    pub fn set_expected_chunks(&mut self, chunks: u32) -> Result<()> {
        if chunks == 0 || (chunks as usize) < self.archives.len() {
            return Err(Error::InvalidChunkCount(chunks));
        }
        match self.expected_chunks {
            Some(expected) if expected != chunks => Err(Error::ChunkCountMismatch {
                expected,
                declared: chunks,
            }),
            _ => {
                self.expected_chunks = Some(chunks);
                self.refresh_state();
                Ok(())
            }
        }
    }

    /// Check a client-declared chunk index against the expected count.
    pub fn validate_index(&self, index: u32) -> Result<()> {
        if index == 0 || self.expected_chunks.is_some_and(|expected| index > expected) {
            return Err(Error::InvalidChunkIndex {
                index,
                expected: self.expected_chunks,
            });
        }
        Ok(())
    }

    /// Whether an archive with this declared index was already received.
    pub fn has_index(&self, index: u32) -> bool {
        self.archives.iter().any(|a| a.index == Some(index))
    }

    /// Sequence number the next archive will get.
    pub fn next_archive_no(&self) -> u32 {
        u32::try_from(self.archives.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    pub fn add_archive(&mut self, archive: Archive) {
        self.archives.push(archive);
        self.refresh_state();
    }

    /// Attach unpack results to archive `no`. Returns false if no such archive.
    pub fn attach_unpacked(
        &mut self,
        no: u32,
        files: Vec<FileRecord>,
        error: Option<String>,
    ) -> bool {
        match self.archives.iter_mut().find(|a| a.no == no) {
            Some(archive) => {
                archive.files = files;
                archive.error = error;
                true
            }
            None => false,
        }
    }

    /// Unpacked files by path. Later archives win over earlier ones.
    pub fn file_map(&self) -> BTreeMap<&str, &FileRecord> {
        let mut map = BTreeMap::new();
        for archive in &self.archives {
            for record in &archive.files {
                map.insert(record.path.as_str(), record);
            }
        }
        map
    }

    /// True iff the declared chunk count is known and that many archives arrived.
    pub fn is_ready(&self) -> bool {
        self.expected_chunks
            .is_some_and(|expected| self.archives.len() == expected as usize)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn record_removals(&mut self, removed: Vec<RemovedFile>) {
        self.removed = removed;
    }

    pub fn set_files(&mut self, files: Vec<FileRecord>) {
        self.files = files;
    }

    pub fn mark_completed(&mut self, now: OffsetDateTime) {
        self.state = SessionState::Completed;
        self.updated_at = now;
    }

    pub fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now;
    }

    /// Whether the session has not been updated for longer than `ttl`.
    ///
    /// A TTL reaching past the representable date range never expires.
    pub fn is_stale(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        self.updated_at
            .checked_add(ttl)
            .is_some_and(|deadline| deadline < now)
    }

    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = if self.is_ready() {
            SessionState::Ready
        } else {
            SessionState::Collecting
        };
    }
}

/// Tagged envelope for every record written to disk.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRecord {
    Session(Session),
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoredRecordRef<'a> {
    Session(&'a Session),
}

impl StoredRecord {
    /// Encode a session into its on-disk form.
    pub fn encode(session: &Session) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&StoredRecordRef::Session(session))
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an on-disk record; unknown kinds are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Session> {
        let record: StoredRecord =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        match record {
            StoredRecord::Session(session) => Ok(session),
        }
    }
}
