//! XDG-compliant path resolution for semblance.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(semblance::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(semblance::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for semblance.
#[derive(Debug, Clone)]
pub struct SemblancePaths {
    /// `$XDG_CONFIG_HOME/semblance/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/semblance/`
    pub data_dir: PathBuf,
    /// `$XDG_STATE_HOME/semblance/`
    pub state_dir: PathBuf,
    /// `$XDG_RUNTIME_DIR/semblance/` (falls back to `state_dir/run/`)
    pub runtime_dir: PathBuf,
}

impl SemblancePaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("semblance");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("semblance");

        let state_dir = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/state"))
            .join("semblance");

        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(|d| PathBuf::from(d).join("semblance"))
            .unwrap_or_else(|_| state_dir.join("run"));

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
            runtime_dir,
        })
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.runtime_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Path to the global config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Directory holding the durable instance store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// PID file advertising a running daemon.
    pub fn pid_file(&self) -> PathBuf {
        self.runtime_dir.join("semblanced.pid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_under_home_without_xdg_vars() {
        // Only asserts on structure, not on the live environment.
        let paths = SemblancePaths {
            config_dir: PathBuf::from("/home/u/.config/semblance"),
            data_dir: PathBuf::from("/home/u/.local/share/semblance"),
            state_dir: PathBuf::from("/home/u/.local/state/semblance"),
            runtime_dir: PathBuf::from("/home/u/.local/state/semblance/run"),
        };
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/home/u/.config/semblance/config.toml")
        );
        assert_eq!(
            paths.store_dir(),
            PathBuf::from("/home/u/.local/share/semblance/store")
        );
        assert!(paths.pid_file().ends_with("semblanced.pid"));
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SemblancePaths {
            config_dir: dir.path().join("config"),
            data_dir: dir.path().join("data"),
            state_dir: dir.path().join("state"),
            runtime_dir: dir.path().join("run"),
        };
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.config_dir.is_dir());
        assert!(paths.runtime_dir.is_dir());
    }
}
