//! Service configuration.
//!
//! Loaded from a RON file under the user config directory. Every field has
//! a default, so a partial file (or none at all) still yields a usable
//! config:
//!
//! ```ron
//! (
//!     service_name: "VirtFsSvc",
//!     mount_point: Some("V:"),
//!     transport: Loopback(seed: ["docs/", "docs/readme.txt"]),
//!     bridge: (readdir_budget: 8192),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use virtfs_kernel::VirtFsOptions;

/// File name looked up inside the config directory.
pub const CONFIG_FILE_NAME: &str = "server.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialize error: {0}")]
    Serialize(#[from] ron::Error),
}

/// Where FUSE requests go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    /// In-process server backed by a memory tree.
    Loopback {
        #[serde(default)]
        root_uid: u32,
        #[serde(default)]
        root_gid: u32,
        /// Label reported by the device, if any.
        #[serde(default)]
        label: Option<String>,
        /// Paths created before start; a trailing `/` makes a directory.
        #[serde(default)]
        seed: Vec<String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Loopback {
            root_uid: 0,
            root_gid: 0,
            label: None,
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub service_name: String,
    /// Drive letter or directory; `None` lets the framework pick.
    pub mount_point: Option<String>,
    pub transport: TransportConfig,
    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub bridge: VirtFsOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: "VirtFsSvc".to_string(),
            mount_point: None,
            transport: TransportConfig::default(),
            log_filter: None,
            bridge: VirtFsOptions::default(),
        }
    }
}

impl ServerConfig {
    /// `<config dir>/virtfs/server.ron`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("virtfs").join(CONFIG_FILE_NAME))
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::from_ron(&text)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtfs_kernel::LengthPolicy;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"(
                mount_point: Some("V:"),
                transport: Loopback(root_uid: 1000, seed: ["docs/", "docs/a.txt"]),
                bridge: (readdir_budget: 8192, length_policy: Strict),
            )"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.service_name, "VirtFsSvc");
        assert_eq!(config.mount_point.as_deref(), Some("V:"));
        assert_eq!(config.bridge.readdir_budget, 8192);
        assert_eq!(config.bridge.length_policy, LengthPolicy::Strict);
        assert_eq!(config.bridge.default_volume_label, "VirtFS");
        match config.transport {
            TransportConfig::Loopback {
                root_uid,
                root_gid,
                label,
                seed,
            } => {
                assert_eq!((root_uid, root_gid), (1000, 0));
                assert_eq!(label, None);
                assert_eq!(seed, vec!["docs/", "docs/a.txt"]);
            }
        }
    }

    #[test]
    fn test_invalid_ron_is_a_parse_error() {
        let err = ServerConfig::from_ron("(service_name: 42)").unwrap_err();
        assert!(matches!(err, ConfigError::Ron(_)));
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let err = ServerConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_serialized_config_reloads() {
        let mut config = ServerConfig::default();
        config.log_filter = Some("virtfs_kernel=debug".to_string());
        config.bridge.check_directory_empty = true;

        let text = config.to_ron().unwrap();
        assert_eq!(ServerConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn test_default_path_is_under_virtfs() {
        if let Some(path) = ServerConfig::default_path() {
            assert!(path.ends_with("virtfs/server.ron"));
        }
    }
}
