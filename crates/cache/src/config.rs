//! Cache configuration
//!
//! ```toml
//! enabled = true
//! dir = "/var/cache/kiln"
//!
//! [remote]
//! endpoint = "https://cache.example.com"
//! timeout_secs = 30
//! token = "..."
//! ```

use crate::backend::HttpBackend;
use crate::{CacheStore, Error, Result};
use dirs::cache_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether task output caching is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local cache directory; resolved from the environment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Remote cache service; takes precedence over the local directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            remote: None,
        }
    }
}

/// Remote cache service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCacheConfig {
    /// Base URL of the service
    pub endpoint: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    30
}

impl CacheConfig {
    /// Parse TOML settings
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid cache configuration: {e}")))
    }

    /// Read TOML settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&content)
    }

    /// Local cache directory: the configured one, then `KILN_CACHE_DIR`,
    /// then `kiln/entries` under the platform cache directory
    #[must_use]
    pub fn resolve_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| CacheLocations::from_env().entries_dir())
    }

    /// Open the configured store: the remote service when one is set,
    /// otherwise the local directory
    pub fn open_store(&self) -> Result<CacheStore> {
        if let Some(remote) = &self.remote {
            tracing::debug!(endpoint = %remote.endpoint, "Using remote cache");
            return Ok(CacheStore::new(HttpBackend::new(remote)?));
        }
        let dir = self.resolve_dir();
        tracing::debug!(dir = %dir.display(), "Using local cache");
        Ok(CacheStore::local(dir))
    }
}

/// Places the local cache can live when no directory is configured
#[derive(Debug, Clone, Default)]
struct CacheLocations {
    /// `KILN_CACHE_DIR`
    env_override: Option<PathBuf>,
    /// Platform cache directory; honours `XDG_CACHE_HOME` on Linux
    platform_cache: Option<PathBuf>,
    /// Last resort when the platform reports no cache directory
    temp: PathBuf,
}

impl CacheLocations {
    fn from_env() -> Self {
        Self {
            env_override: std::env::var_os("KILN_CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            platform_cache: cache_dir(),
            temp: std::env::temp_dir(),
        }
    }

    /// Directories are created by the backend on first write.
    fn entries_dir(self) -> PathBuf {
        self.env_override
            .or_else(|| self.platform_cache.map(|dir| dir.join("kiln").join("entries")))
            .unwrap_or_else(|| self.temp.join("kiln").join("entries"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locations(tmp: &TempDir) -> CacheLocations {
        CacheLocations {
            env_override: Some(tmp.path().join("override")),
            platform_cache: Some(tmp.path().join("platform")),
            temp: tmp.path().join("tmp"),
        }
    }

    // ==========================================================================
    // Cache directory resolution
    // ==========================================================================

    #[test]
    fn test_locations_fallback_order() {
        let tmp = TempDir::new().unwrap();
        let all = locations(&tmp);
        assert_eq!(all.clone().entries_dir(), tmp.path().join("override"));

        let no_override = CacheLocations {
            env_override: None,
            ..all.clone()
        };
        assert_eq!(
            no_override.clone().entries_dir(),
            tmp.path().join("platform/kiln/entries")
        );

        let temp_only = CacheLocations {
            platform_cache: None,
            ..no_override
        };
        assert_eq!(temp_only.entries_dir(), tmp.path().join("tmp/kiln/entries"));
    }

    #[test]
    fn test_resolution_does_not_touch_disk() {
        let tmp = TempDir::new().unwrap();
        let dir = locations(&tmp).entries_dir();
        assert!(!dir.exists());
    }

    #[test]
    fn test_configured_dir_wins() {
        let tmp = TempDir::new().unwrap();
        let config = CacheConfig {
            dir: Some(tmp.path().join("configured")),
            ..CacheConfig::default()
        };
        assert_eq!(config.resolve_dir(), tmp.path().join("configured"));
    }

    // ==========================================================================
    // Configuration parsing
    // ==========================================================================

    #[test]
    fn test_defaults() {
        let config = CacheConfig::from_toml_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert!(config.enabled);
    }

    #[test]
    fn test_remote_section() {
        let config = CacheConfig::from_toml_str(
            r#"
            enabled = false

            [remote]
            endpoint = "https://cache.example.com"
            token = "abc"
            "#,
        )
        .unwrap();
        assert!(!config.enabled);
        let remote = config.remote.unwrap();
        assert_eq!(remote.endpoint, "https://cache.example.com");
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(remote.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = CacheConfig::from_toml_str("enabeld = true").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.toml");
        std::fs::write(&path, format!("dir = {:?}\n", tmp.path().join("c"))).unwrap();
        let config = CacheConfig::load(&path).unwrap();
        assert_eq!(config.resolve_dir(), tmp.path().join("c"));
        assert!(matches!(
            CacheConfig::load(&tmp.path().join("missing.toml")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_open_store_picks_backend() {
        let tmp = TempDir::new().unwrap();
        let local = CacheConfig {
            dir: Some(tmp.path().to_path_buf()),
            ..CacheConfig::default()
        };
        assert_eq!(local.open_store().unwrap().backend_name(), "local");

        let remote = CacheConfig {
            remote: Some(RemoteCacheConfig {
                endpoint: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
                token: None,
            }),
            ..local
        };
        assert_eq!(remote.open_store().unwrap().backend_name(), "http");
    }
}
