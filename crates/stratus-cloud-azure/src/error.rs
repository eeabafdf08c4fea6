//! Azure provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("Invalid resource name '{name}': {reason}")]
    InvalidResourceName { name: String, reason: String },

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Resource provider {namespace} did not register: {reason}")]
    RegistrationFailed { namespace: String, reason: String },

    #[error("Cloud error: {0}")]
    CloudError(#[from] stratus_cloud::CloudError),
}

impl From<AzureError> for stratus_cloud::CloudError {
    fn from(err: AzureError) -> Self {
        match err {
            AzureError::CloudError(inner) => inner,
            AzureError::InvalidResourceName { .. } | AzureError::InvalidLocation(_) => {
                stratus_cloud::CloudError::InvalidConfig(err.to_string())
            }
            AzureError::RegistrationFailed { .. } => {
                stratus_cloud::CloudError::provider("RegistrationFailed", err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
