//! Filesystem persistence for sitesync.
//!
//! This crate provides:
//! - Path resolution confined to a root directory (traversal and symlink escapes rejected)
//! - Atomic file writes (temp file, fsync, rename)
//! - Session records guarded by per-session file locks
//! - tar+zstd archive writing and confined unpacking

pub mod archive;
pub mod atomic;
pub mod error;
pub mod paths;
pub mod sessions;

pub use archive::{ArchiveInfo, ArchiveWriter, UnpackOutcome, unpack};
pub use atomic::write_atomic;
pub use error::{StorageError, StorageResult};
pub use paths::SafeRoot;
pub use sessions::{SessionLock, SessionStore};
