//! Application state shared across handlers.

use sitesync_core::IgnoreFilter;
use sitesync_core::config::AppConfig;
use sitesync_storage::{SafeRoot, SessionStore, StorageError, StorageResult};
use std::sync::Arc;

/// Shared application state.
///
/// Holds no per-session data: everything that spans requests lives in the
/// session store on disk.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The live document root.
    pub site: Arc<SafeRoot>,
    /// Session records and archives.
    pub sessions: Arc<SessionStore>,
    /// Paths never listed, unpacked or deleted.
    pub filter: Arc<IgnoreFilter>,
}

impl AppState {
    /// Create application state, creating the document root and state directory if needed.
    ///
    /// A state directory inside the document root must be hidden by the ignore
    /// filter, otherwise clients could list, overwrite or delete session records.
    pub fn new(config: AppConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;

        let filter = IgnoreFilter::new(&config.site.ignore_patterns)?;
        if let Some(key) = config.site.state_dir_key()
            && !filter.is_ignored_path(&key)
        {
            return Err(StorageError::Config(format!(
                "state directory '{key}' lies inside the document root but is not matched by site.ignore_patterns"
            )));
        }

        let site = SafeRoot::new(&config.site.document_root)?;
        let sessions = SessionStore::open(config.site.state_dir())?;

        Ok(Self {
            config: Arc::new(config),
            site: Arc::new(site),
            sessions: Arc::new(sessions),
            filter: Arc::new(filter),
        })
    }
}
