use crate::{CfgEditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Platform reported to scripts through `ispc`, `isunix` and `ismac`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
}

impl Platform {
    pub fn host() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn path_separator(self) -> char {
        match self {
            Platform::Windows => '\\',
            Platform::Linux | Platform::Macos => '/',
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

/// Settings every script execution runs under.
///
/// Scripts see the outside world only through this object: the platform
/// predicates, `getenv`, and the pre-bound `variables` (source-text
/// expressions evaluated once per runtime).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub platform: Platform,
    pub environment: BTreeMap<String, String>,
    pub inherit_environment: bool,
    pub variables: BTreeMap<String, String>,
}

impl ExecutionConfig {
    /// Resolves `getenv(name)`: the configured table first, then the process
    /// environment when inheritance is enabled.
    pub fn lookup_env(&self, name: &str) -> Option<String> {
        if let Some(value) = self.environment.get(name) {
            return Some(value.clone());
        }
        if self.inherit_environment {
            return std::env::var(name).ok();
        }
        None
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CfgEditError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ExecutionConfig = toml::from_str(&content).map_err(|e| {
            CfgEditError::Configuration(format!("invalid {}: {}", path.display(), e))
        })?;
        debug!(
            path = %path.display(),
            variables = config.variables.len(),
            "Loaded execution settings"
        );
        Ok(config)
    }

    /// `<config dir>/cfgedit/context.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cfgedit").join("context.toml"))
    }

    /// Loads the explicitly named file, else the default file if it exists,
    /// else built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(CfgEditError::Configuration(format!(
                    "execution settings file {} does not exist",
                    path.display()
                )));
            }
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
