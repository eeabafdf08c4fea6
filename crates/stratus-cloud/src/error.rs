//! Cloud provisioning error types

use std::time::Duration;
use thiserror::Error;

/// Provisioning engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Error reported by a provider API, carrying the provider's error code
    #[error("Provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The client for a cache key was invalidated and is still cooling down
    #[error("Client {key} is invalidated, retry permitted in {retry_in:?}")]
    ClientInvalidated { key: String, retry_in: Duration },

    #[error("Provider client already released for {0}")]
    ClientReleased(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// A polled resource settled in a provider-side failure state
    #[error("Resource {resource} entered failure state '{state}'")]
    ResourceFailed { resource: String, state: String },

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<CloudError>,
    },

    #[error("Provider callback for {0} was dropped without completing")]
    CallbackDropped(String),

    #[error("Stage {stage} panicked: {message}")]
    StagePanicked { stage: String, message: String },

    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Build a provider error from a provider error code and message
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Provider error code, if this error came from a provider API
    pub fn code(&self) -> Option<&str> {
        match self {
            CloudError::Provider { code, .. } => Some(code),
            CloudError::RetriesExhausted { source, .. } => source.code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
