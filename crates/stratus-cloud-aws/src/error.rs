//! AWS provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("No image reference on {0}")]
    MissingImage(String),

    #[error("Invalid device index {0}: only 10 data volumes can be attached")]
    DeviceIndexOutOfRange(usize),

    #[error("Cloud error: {0}")]
    CloudError(#[from] stratus_cloud::CloudError),
}

impl From<AwsError> for stratus_cloud::CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::CloudError(inner) => inner,
            AwsError::MissingImage(_) | AwsError::DeviceIndexOutOfRange(_) => {
                stratus_cloud::CloudError::InvalidConfig(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
