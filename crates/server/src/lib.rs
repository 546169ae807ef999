//! HTTP receiver for sitesync publish runs.
//!
//! This crate provides the remote side of a publish:
//! - Version descriptor retrieval
//! - Manifest diffing against the live document root
//! - Chunk upload, unpack and session finalization
//! - Single-file deletion
//! - Background sweeping of abandoned sessions

pub mod auth;
pub mod context;
pub mod diff;
pub mod error;
pub mod handlers;
pub mod receiver;
pub mod routes;
pub mod state;
pub mod sweep;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use sweep::spawn_sweep_task;
