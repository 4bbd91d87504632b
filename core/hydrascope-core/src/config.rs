//! Configuration loading and path management.
//!
//! Paths live under `~/.hydrascope/` unless a test or caller injects another
//! root through [`StorageConfig::with_root`]. Tunables are read from
//! `config.toml` in that root; a missing file means defaults.

use crate::error::{HydraError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SOCKET_ENV: &str = "HYDRASCOPE_RELAY_SOCKET";
pub const DEBUG_LOG_ENV: &str = "HYDRASCOPE_DEBUG_LOG";

const ROOT_DIR_NAME: &str = ".hydrascope";
const SOCKET_NAME: &str = "relay.sock";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Framework-convention id of the application mount element.
pub const DEFAULT_MOUNT_ID: &str = "__next";

// ═══════════════════════════════════════════════════════════════════════════════
// Tunables
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrascopeConfig {
    pub mount_id: String,
    pub detection_timeout_ms: u64,
    pub send_retry_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for HydrascopeConfig {
    fn default() -> Self {
        Self {
            mount_id: DEFAULT_MOUNT_ID.to_string(),
            detection_timeout_ms: 5000,
            send_retry_ms: 100,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl HydrascopeConfig {
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_ms)
    }
}

/// Loads `config.toml`, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<HydrascopeConfig> {
    if !path.exists() {
        return Ok(HydrascopeConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| HydraError::Io {
        context: format!("reading {}", path.display()),
        source,
    })?;
    toml::from_str::<HydrascopeConfig>(&content).map_err(|err| HydraError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// `HYDRASCOPE_DEBUG_LOG=1` forces debug-level logging in every binary.
pub fn debug_log_enabled() -> bool {
    env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════════════════════

/// Central configuration for all hydrascope paths.
///
/// Production code uses [`StorageConfig::from_home`]; tests use
/// [`StorageConfig::with_root`] with a temp directory.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(HydraError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR_NAME),
        })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relay socket, honouring `HYDRASCOPE_RELAY_SOCKET`.
    pub fn relay_socket(&self) -> PathBuf {
        match env::var(SOCKET_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => self.root.join(SOCKET_NAME),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Per-origin error summaries.
    pub fn error_lists_dir(&self) -> PathBuf {
        self.root.join("errors").join("lists")
    }

    /// Full error records keyed by id.
    pub fn error_details_dir(&self) -> PathBuf {
        self.root.join("errors").join("details")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn load_config(&self) -> Result<HydrascopeConfig> {
        load_config(&self.config_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config, HydrascopeConfig::default());
        assert_eq!(config.mount_id, "__next");
        assert_eq!(config.detection_timeout(), Duration::from_millis(5000));
        assert_eq!(config.send_retry_delay(), Duration::from_millis(100));
    }

    #[test]
    fn load_config_merges_partial_file_with_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
mount_id = "root"

[reconnect]
max_ms = 2000
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.mount_id, "root");
        assert_eq!(config.detection_timeout_ms, 5000);
        assert_eq!(config.reconnect.base_ms, 100);
        assert_eq!(config.reconnect.max_ms, 2000);
    }

    #[test]
    fn load_config_reports_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "mount_id = [").expect("write config");

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, HydraError::Config { .. }));
    }

    #[test]
    fn storage_paths_hang_off_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/hs"));
        assert_eq!(storage.config_file(), PathBuf::from("/tmp/hs/config.toml"));
        assert_eq!(
            storage.error_details_dir(),
            PathBuf::from("/tmp/hs/errors/details")
        );
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/hs/logs"));
    }
}
