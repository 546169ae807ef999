//! Receiver configuration types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

/// HTTP listener and upload limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted chunk body in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// Largest accepted manifest body in bytes.
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: usize,
    /// Keep received archives after unpacking instead of deleting them on finalize.
    #[serde(default)]
    pub keep_archives: bool,
    /// Drop in-progress sessions idle for longer than this. 0 disables the sweep.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// How often the stale-session sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_max_manifest_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_bytes: default_max_chunk_bytes(),
            max_manifest_bytes: default_max_manifest_bytes(),
            keep_archives: false,
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ServerConfig {
    /// Session TTL, or `None` when the sweep is disabled.
    pub fn session_ttl(&self) -> Option<Duration> {
        if self.session_ttl_secs == 0 {
            return None;
        }
        // u64 values past i64::MAX saturate; callers must still add with checked_add.
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Some(Duration::seconds(secs))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The published site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Directory the site is served from.
    pub document_root: PathBuf,
    /// Where session records, locks and archives live (default: `<document_root>/.nw`).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Regex patterns for paths that are never listed, unpacked or deleted.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    /// File under the document root returned by `GET /`.
    #[serde(default = "default_version_file")]
    pub version_file: String,
}

fn default_ignore_patterns() -> Vec<String> {
    crate::DEFAULT_IGNORE_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_version_file() -> String {
    "version.json".to_string()
}

impl SiteConfig {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: document_root.into(),
            state_dir: None,
            ignore_patterns: default_ignore_patterns(),
            version_file: default_version_file(),
        }
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.document_root.join(crate::WORK_DIR_NAME))
    }

    /// Path of the version file.
    pub fn version_path(&self) -> PathBuf {
        self.document_root.join(&self.version_file)
    }

    /// Key of the state directory relative to the document root, if it lives inside it.
    pub fn state_dir_key(&self) -> Option<String> {
        let state_dir = self.state_dir();
        let relative = state_dir.strip_prefix(&self.document_root).ok()?;
        crate::inventory::relative_key(relative)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.document_root.is_absolute() {
            return Err(format!(
                "site.document_root must be an absolute path, got {:?}",
                self.document_root
            ));
        }
        if Path::new(&self.version_file).components().count() != 1 {
            return Err(format!(
                "site.version_file must be a plain file name, got {:?}",
                self.version_file
            ));
        }
        crate::IgnoreFilter::new(&self.ignore_patterns).map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Bearer token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// SHA256 hex of the publish token (64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AuthConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Matches the token `test-publish-token`.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-publish-token"
            token_hash: "425cc34f16bc005068b4e69fbc4a17eeec3a896e1e0e7d2ef5cdca83c8532c6c"
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64 || !self.token_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err("auth.token_hash must be 64 hex characters (SHA256)".to_string());
        }
        Ok(())
    }
}

/// Complete receiver configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration serving `document_root`.
    ///
    /// **For testing only.**
    pub fn for_testing(document_root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            site: SiteConfig::new(document_root),
            auth: AuthConfig::for_testing(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.max_chunk_bytes == 0 {
            return Err("server.max_chunk_bytes must be greater than 0".to_string());
        }
        if self.server.sweep_interval_secs == 0 {
            return Err("server.sweep_interval_secs must be greater than 0".to_string());
        }
        self.site.validate()?;
        self.auth.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.max_chunk_bytes, 512 * 1024 * 1024);
        assert!(!config.keep_archives);
        assert_eq!(config.session_ttl(), Some(Duration::hours(24)));
    }

    #[test]
    fn test_session_ttl_zero_disables_sweep() {
        let config = ServerConfig {
            session_ttl_secs: 0,
            ..ServerConfig::default()
        };
        assert!(config.session_ttl().is_none());
    }

    #[test]
    fn test_site_config_deserialize_minimal() {
        let site: SiteConfig = toml::from_str(r#"document_root = "/srv/www""#).unwrap();
        assert_eq!(site.state_dir(), PathBuf::from("/srv/www/.nw"));
        assert_eq!(site.state_dir_key().as_deref(), Some(".nw"));
        assert_eq!(site.version_path(), PathBuf::from("/srv/www/version.json"));
        assert_eq!(site.ignore_patterns, vec![r"^\.", r"\.php$"]);
    }

    #[test]
    fn test_state_dir_outside_document_root() {
        let mut site = SiteConfig::new("/srv/www");
        site.state_dir = Some(PathBuf::from("/var/lib/sitesync"));
        assert!(site.state_dir_key().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::for_testing("/srv/www");
        assert!(config.validate().is_ok());

        config.auth.token_hash = "not-a-hash".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_testing("/srv/www");
        config.site.version_file = "../etc/passwd".to_string();
        assert!(config.validate().is_err());

        let config = AppConfig::for_testing("relative/www");
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_testing("/srv/www");
        config.server.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_testing("/srv/www");
        config.site.ignore_patterns = vec!["(".to_string()];
        assert!(config.validate().is_err());
    }
}
