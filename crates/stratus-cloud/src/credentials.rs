//! Provider credentials and their lookup

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Credentials resolved from an auth document
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Access key id, client id, or equivalent
    pub private_key_id: String,
    private_key: String,
    /// Region the credentials are scoped to, if any
    #[serde(default)]
    pub region: Option<String>,
}

impl Credentials {
    pub fn new(private_key_id: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            private_key_id: private_key_id.into(),
            private_key: private_key.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Stable digest of the key material, safe to log and to use as a map key
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.private_key_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.private_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            fingerprint: self.fingerprint(),
            region: self.region.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Identity of a cached provider client: credential fingerprint plus region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub region: Option<String>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.fingerprint[..self.fingerprint.len().min(12)];
        match &self.region {
            Some(region) => write!(f, "{}@{}", short, region),
            None => write!(f, "{}", short),
        }
    }
}

/// Resolves an auth document link to credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, auth_link: &str) -> Result<Credentials>;
}

/// Credential provider backed by a fixed map
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, auth_link: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(auth_link.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, auth_link: &str) -> Result<Credentials> {
        self.entries
            .get(auth_link)
            .cloned()
            .ok_or_else(|| CloudError::AuthenticationFailed(format!("no credentials at {}", auth_link)))
    }
}
