//! Publish client configuration.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use sitesync_core::{DEFAULT_IGNORE_PATTERNS, DEFAULT_MAX_CHUNK_BYTES, IgnoreFilter, WORK_DIR_NAME};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files deleted from the source tree before every publish: secrets and
/// server-side scripts that must never reach the live site.
pub const DEFAULT_PROTECTED_FILES: &[&str] = &[".env", "output.json", "send.php", "config.php"];

fn default_source_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(WORK_DIR_NAME)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_chunk_bytes() -> u64 {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_delete_concurrency() -> usize {
    8
}

fn default_protected_files() -> Vec<String> {
    DEFAULT_PROTECTED_FILES.iter().map(|s| s.to_string()).collect()
}

fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect()
}

/// Settings for a publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Receiver endpoint URL.
    #[serde(default)]
    pub server: Option<String>,
    /// Raw bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Built site to publish.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Where archives are staged before upload.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Where publish logs are kept.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// Whole-request timeout for every call to the receiver.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum DELETE requests in flight.
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
    /// Relative paths removed from `source_dir` before the inventory.
    #[serde(default = "default_protected_files")]
    pub protected_files: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            server: None,
            token: None,
            source_dir: default_source_dir(),
            work_dir: default_work_dir(),
            log_dir: default_log_dir(),
            max_chunk_bytes: default_max_chunk_bytes(),
            timeout_secs: default_timeout_secs(),
            delete_concurrency: default_delete_concurrency(),
            protected_files: default_protected_files(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl PublishConfig {
    /// Load from an optional TOML file overlaid with `SITESYNC_` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("SITESYNC_").split("__"))
            .extract()
            .with_context(|| format!("failed to load client configuration from {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ignore_filter(&self) -> Result<IgnoreFilter> {
        IgnoreFilter::new(&self.ignore_patterns).context("invalid ignore pattern")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_bytes == 0 {
            return Err("max_chunk_bytes must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.delete_concurrency == 0 {
            return Err("delete_concurrency must be greater than 0".to_string());
        }
        for file in &self.protected_files {
            let path = Path::new(file);
            if path.is_absolute() || file.split(['/', '\\']).any(|c| c == "..") {
                return Err(format!(
                    "protected file '{file}' must be a relative path inside source_dir"
                ));
            }
        }
        Ok(())
    }
}
