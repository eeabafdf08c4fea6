//! Configuration discovery for Stratus
//!
//! Locates a `stratus.yaml` file and loads it into an
//! [`EngineConfig`](stratus_cloud::EngineConfig).

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use stratus_cloud::EngineConfig;

/// Environment variable naming a configuration file directly
pub const CONFIG_PATH_ENV: &str = "STRATUS_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["stratus.yaml", ".stratus.yaml"];

/// Stratus directory under the user's configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stratus");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the configuration file
///
/// Search order:
/// 1. `STRATUS_CONFIG_PATH` (must exist when set)
/// 2. current directory: `stratus.yaml`, `.stratus.yaml`
/// 3. `./.stratus/stratus.yaml`
/// 4. `<user config dir>/stratus/stratus.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::EnvPathMissing(path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.is_file() {
            return Ok(path);
        }
    }

    let local = current_dir.join(".stratus").join("stratus.yaml");
    if local.is_file() {
        return Ok(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stratus").join("stratus.yaml");
        if global.is_file() {
            return Ok(global);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Parse and validate the configuration file at `path`
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    EngineConfig::from_yaml_str(&content).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the discovered configuration, falling back to defaults when no file exists
///
/// Returns the path the configuration was read from, if any.
pub fn load_effective() -> Result<(EngineConfig, Option<PathBuf>)> {
    match find_config_file() {
        Ok(path) => {
            let config = load_config(&path)?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            Ok((config, Some(path)))
        }
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No configuration file found, using defaults");
            Ok((EngineConfig::default(), None))
        }
        Err(e) => Err(e),
    }
}
