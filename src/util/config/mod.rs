//! Session configuration
//!
//! A session can be configured programmatically or from a TOML file:
//!
//! ```toml
//! mode = "execute"
//! lib_path = "/usr/local/lib/tcc"
//! include_paths = ["/usr/local/lib/tcc/include"]
//! libraries = ["m"]
//! options = "-Wall"
//! workers = 2
//! delivery = "queued"
//!
//! [defines]
//! DEBUG = "1"
//! ```
//!
//! # Lookup order
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Explicit --config file
//! 3. User-level (~/.config/tcc-session/config.toml)
//! 4. Default values
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::OutputMode;
use crate::session::Delivery;

/// Everything needed to bring a session into a compile-ready state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output mode, fixed for the session's lifetime
    #[serde(default)]
    pub mode: OutputMode,
    /// Directory with the runtime support library (libtcc1.a) and its headers
    #[serde(default)]
    pub lib_path: Option<PathBuf>,
    /// Extra option string, e.g. `-Wall -g`
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    #[serde(default)]
    pub sysinclude_paths: Vec<PathBuf>,
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,
    /// Libraries to link, without the `lib` prefix
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Preprocessor definitions, applied in file order
    #[serde(default)]
    pub defines: IndexMap<String, String>,
    /// Size of the async compile pool
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Where async completions run
    #[serde(default)]
    pub delivery: Delivery,
}

fn default_workers() -> usize {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Execute,
            lib_path: None,
            options: None,
            include_paths: Vec::new(),
            sysinclude_paths: Vec::new(),
            library_paths: Vec::new(),
            libraries: Vec::new(),
            defines: IndexMap::new(),
            workers: 1,
            delivery: Delivery::Worker,
        }
    }
}

impl SessionConfig {
    /// Layout of a tcc install rooted at `root`:
    /// `root/lib/tcc` for the support library, with headers from
    /// `root/lib/tcc/include` and `root/include`.
    pub fn bundled(root: &Path) -> Self {
        let lib = root.join("lib").join("tcc");
        Self {
            include_paths: vec![lib.join("include"), root.join("include")],
            lib_path: Some(lib),
            ..Self::default()
        }
    }

    /// Add a `NAME` or `NAME=VALUE` definition. A bare name defines to `1`.
    pub fn define(
        &mut self,
        spec: &str,
    ) {
        let (name, value) = spec.split_once('=').unwrap_or((spec, "1"));
        // Re-inserting keeps the original slot; move it so it applies last.
        self.defines.shift_remove(name);
        self.defines.insert(name.to_string(), value.to_string());
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("tcc-session"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("tcc-session"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("tcc-session"));
    }

    None
}

/// Get the user config file path (~/.config/tcc-session/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load a config file.
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse config text.
pub fn parse_config(content: &str) -> Result<SessionConfig, ConfigError> {
    let config: SessionConfig = toml::from_str(content)?;
    if config.workers == 0 {
        return Err(ConfigError::Invalid("workers must be at least 1".into()));
    }
    Ok(config)
}

/// Load the user-level config, or defaults when there is none.
pub fn load_user_config() -> Result<SessionConfig, ConfigError> {
    match get_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(SessionConfig::default()),
    }
}

/// Write a config file, creating parent directories.
pub fn save_config(
    path: &Path,
    config: &SessionConfig,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
