//! Core domain types and shared logic for sitesync.
//!
//! This crate defines the data model shared by the receiver and the publish client:
//! - Session records, archives and per-file outcomes
//! - Ignore filters applied to every path that crosses the wire
//! - File inventory of a directory tree
//! - Manifest and diff wire types, and the upload comparison
//! - Chunk planning for bounded-size archives

pub mod chunk;
pub mod config;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod manifest;
pub mod session;

pub use chunk::{ChunkPlan, PlannedFile, plan_chunks};
pub use error::{Error, Result};
pub use filter::IgnoreFilter;
pub use inventory::{FileStat, Inventory, StatError};
pub use manifest::{DeleteResponse, DiffRequest, DiffResponse, ManifestEntry, RemoteStat};
pub use session::{
    Archive, FileRecord, RemovedFile, Session, SessionId, SessionState, StatOutcome, StoredRecord,
};

/// Default maximum archive payload: 100 MiB.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 100 * 1024 * 1024;

/// Patterns hidden from every listing, diff and deletion: dotfiles and server-side scripts.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[r"^\.", r"\.php$"];

/// Name of the working directory used on both sides of a publish run.
pub const WORK_DIR_NAME: &str = ".nw";
