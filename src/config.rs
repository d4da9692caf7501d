// src/config.rs
//
// Runtime configuration: where libraries, projects and scratch files live.
//
// Everything hangs off one application root. The root defaults to the
// platform data directory and may carry a `caustk.toml` that renames the
// sub-directories.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory name under the platform data directory.
pub const APP_DIR: &str = "caustk";

/// Optional config file inside the application root.
pub const CONFIG_FILE: &str = "caustk.toml";

/// Session settings file inside the application root.
pub const SETTINGS_FILE: &str = ".settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Application root. Never read from the config file itself.
    #[serde(skip)]
    pub root: PathBuf,

    /// Libraries directory, relative to the root.
    pub libraries: String,

    /// Projects directory, relative to the root.
    pub projects: String,

    /// Staging directory for archive work, relative to the root.
    pub temp: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            libraries: "Libraries".into(),
            projects: "projects".into(),
            temp: "temp".into(),
        }
    }
}

impl RuntimeConfig {
    /// Default directory names under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// `<data dir>/caustk`.
    pub fn default_root() -> Result<PathBuf, ConfigError> {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or(ConfigError::NoDataDir)
    }

    /// Load the configuration for `root`, or for the default root.
    ///
    /// A missing `caustk.toml` is not an error.
    pub fn load(root: Option<PathBuf>) -> Result<Self, ConfigError> {
        let root = match root {
            Some(root) => root,
            None => Self::default_root()?,
        };
        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let parsed: RuntimeConfig =
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            log::info!("loaded {}", path.display());
            parsed
        } else {
            Self::default()
        };
        config.root = root;
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(&self.libraries)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join(&self.projects)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(&self.temp)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// Create the root and every sub-directory.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [self.libraries_dir(), self.projects_dir(), self.temp_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.libraries_dir(), dir.path().join("Libraries"));
        assert_eq!(config.projects_dir(), dir.path().join("projects"));
        assert_eq!(config.settings_file(), dir.path().join(".settings"));
    }

    #[test]
    fn test_file_overrides_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "projects = \"songs\"\n").unwrap();
        let config = RuntimeConfig::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.projects_dir(), dir.path().join("songs"));
        assert_eq!(config.temp, "temp");
        assert_eq!(config.root(), dir.path());
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "projects = [").unwrap();
        assert!(matches!(
            RuntimeConfig::load(Some(dir.path().to_path_buf())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_root(dir.path().join("app"));
        config.ensure_dirs().unwrap();
        assert!(config.libraries_dir().is_dir());
        assert!(config.temp_dir().is_dir());
    }
}
