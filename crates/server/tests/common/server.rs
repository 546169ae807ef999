//! Server test utilities.

use sitesync_core::config::AppConfig;
use sitesync_server::{AppState, create_router};
use std::path::Path;
use tempfile::TempDir;

/// Raw token whose hash is in `AuthConfig::for_testing()`.
#[allow(dead_code)]
pub const TEST_TOKEN: &str = "test-publish-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over an empty temporary document root.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let doc_root = temp_dir.path().join("www");
        std::fs::create_dir_all(&doc_root).expect("Failed to create document root");

        let mut config = AppConfig::for_testing(&doc_root);
        modifier(&mut config);

        let state = AppState::new(config).expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn doc_root(&self) -> &Path {
        self.state.site.path()
    }

    /// Write a file into the live document root.
    pub fn write_live(&self, path: &str, contents: &str) {
        let full = self.doc_root().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(full, contents).expect("Failed to write live file");
    }

    pub fn read_live(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.doc_root().join(path)).ok()
    }
}
