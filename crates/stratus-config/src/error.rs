use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "no configuration file found. Checked:\n\
        - STRATUS_CONFIG_PATH\n\
        - current directory: stratus.yaml, .stratus.yaml\n\
        - ./.stratus/stratus.yaml\n\
        - <user config dir>/stratus/stratus.yaml"
    )]
    ConfigFileNotFound,

    #[error("STRATUS_CONFIG_PATH points to a missing file: {0}")]
    EnvPathMissing(PathBuf),

    #[error("invalid configuration in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: stratus_cloud::CloudError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
