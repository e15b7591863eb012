//! TOML configuration for the store, the query engines, and the daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PORT: u16 = 9173;

/// Top-level configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub query: QuerySection,
    pub server: ServerSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// Directory for the durable tier. `None` means memory-only.
    pub data_dir: Option<PathBuf>,
    /// Fail on writes to an occupied identity instead of replacing.
    pub strict_insert: bool,
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Wall-clock budget for a single backend query, in milliseconds.
    pub timeout_ms: u64,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Query budget as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_memory_only_with_five_second_budget() {
        let config = Config::default();
        assert!(config.store.data_dir.is_none());
        assert!(!config.store.strict_insert);
        assert_eq!(config.query_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.server.port, 9173);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            data_dir = "/tmp/semblance"
            strict_insert = true

            [query]
            timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(
            config.store.data_dir.as_deref(),
            Some(Path::new("/tmp/semblance"))
        );
        assert!(config.store.strict_insert);
        assert_eq!(config.query.timeout_ms, 250);
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.store.data_dir.is_none());

        let path = dir.path().join("semblance.toml");
        std::fs::write(&path, "[query]\ntimeout_ms = 99\n").unwrap();
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.query.timeout_ms, 99);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semblance.toml");
        std::fs::write(&path, "[query\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
