//! Engine configuration

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the provisioning engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub client_cache: ClientCacheConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub workflow: WorkflowConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_yaml::from_str(content)
            .map_err(|e| CloudError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| CloudError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_cache.max_size == 0 {
            return Err(CloudError::InvalidConfig(
                "client_cache.max_size must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CloudError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(CloudError::InvalidConfig(
                "poll.interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client cache and registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCacheConfig {
    /// Live clients kept per client kind before LRU eviction
    pub max_size: usize,
    /// How long an invalidated key refuses client creation
    pub invalid_ttl_secs: u64,
    /// Minimum age before an unreferenced cache may be torn down
    pub min_lifetime_secs: u64,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 32,
            invalid_ttl_secs: 60 * 60,
            min_lifetime_secs: 5 * 60,
        }
    }
}

impl ClientCacheConfig {
    pub fn invalid_ttl(&self) -> Duration {
        Duration::from_secs(self.invalid_ttl_secs)
    }

    pub fn min_lifetime(&self) -> Duration {
        Duration::from_secs(self.min_lifetime_secs)
    }
}

/// Retry configuration for transient provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_secs: 10 * 60,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Times a recoverable error may resume the same stage before the
    /// workflow escalates to its error stage
    pub max_stage_resumes: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_stage_resumes: 5,
        }
    }
}
