//! Persisted resource store
//!
//! Workflows read and write local resource records through [`ResourceStore`].
//! Records are JSON documents addressed by a link of the form
//! `<factory link>/<id>`. [`InMemoryResourceStore`] keeps them in memory and
//! can snapshot them to `.stratus/store.json`.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SELF_LINK: &str = "self_link";
pub const DOCUMENT_VERSION: &str = "document_version";
pub const DOCUMENT_UPDATED_AT: &str = "document_updated_at";

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_DIR: &str = ".stratus";
const SNAPSHOT_FILE: &str = "store.json";
const SNAPSHOT_BACKUP: &str = "store.json.backup";

/// Asynchronous document store holding local resource records
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, link: &str) -> Result<Value>;

    /// Create a document under `factory_link`, returning it with its `self_link`
    async fn create(&self, factory_link: &str, document: Value) -> Result<Value>;

    /// Merge `partial` into the document (JSON merge patch; `null` removes a field)
    async fn patch(&self, link: &str, partial: Value) -> Result<Value>;

    /// Replace the document entirely
    async fn put(&self, link: &str, document: Value) -> Result<Value>;

    async fn delete(&self, link: &str) -> Result<()>;
}

/// Typed helpers over [`ResourceStore`]
#[async_trait]
pub trait ResourceStoreExt: ResourceStore {
    async fn get_as<T>(&self, link: &str) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        Ok(serde_json::from_value(self.get(link).await?)?)
    }

    async fn create_as<T>(&self, factory_link: &str, document: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let created = self
            .create(factory_link, serde_json::to_value(document)?)
            .await?;
        Ok(serde_json::from_value(created)?)
    }

    async fn put_as<T>(&self, link: &str, document: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let stored = self.put(link, serde_json::to_value(document)?).await?;
        Ok(serde_json::from_value(stored)?)
    }
}

impl<S: ResourceStore + ?Sized> ResourceStoreExt for S {}

/// Apply a JSON merge patch to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(existing) = target {
        for (key, value) in fields {
            if value.is_null() {
                existing.remove(key);
            } else {
                merge_patch(existing.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn stamp(document: &mut Map<String, Value>, link: &str, version: u64) {
    document.insert(SELF_LINK.to_string(), Value::String(link.to_string()));
    document.insert(DOCUMENT_VERSION.to_string(), Value::from(version));
    document.insert(
        DOCUMENT_UPDATED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
}

fn version_of(document: &Value) -> u64 {
    document
        .get(DOCUMENT_VERSION)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn into_object(document: Value, link: &str) -> Result<Map<String, Value>> {
    match document {
        Value::Object(map) => Ok(map),
        other => Err(CloudError::StoreError(format!(
            "document for {} must be a JSON object, got {}",
            link, other
        ))),
    }
}

/// On-disk snapshot of every document
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    updated_at: DateTime<Utc>,
    documents: BTreeMap<String, Value>,
}

/// In-memory [`ResourceStore`]
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    documents: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Links of every document created under `factory_link`
    pub async fn links_under(&self, factory_link: &str) -> Vec<String> {
        let prefix = format!("{}/", factory_link.trim_end_matches('/'));
        self.documents
            .read()
            .await
            .keys()
            .filter(|link| link.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE)
    }

    fn backup_path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_DIR).join(SNAPSHOT_BACKUP)
    }

    /// Write every document to `<dir>/.stratus/store.json`, keeping the
    /// previous snapshot as a backup
    pub async fn save_snapshot(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let state_dir = dir.join(SNAPSHOT_DIR);
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir).await?;
            tracing::debug!("Created store directory: {}", state_dir.display());
        }

        let path = Self::snapshot_path(dir);
        let backup = Self::backup_path(dir);
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created store backup");
        }

        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            documents: self.documents.read().await.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&snapshot)?).await?;

        tracing::debug!("Saved store with {} documents", snapshot.documents.len());
        Ok(())
    }

    /// Load a store from `<dir>/.stratus/store.json`; a missing file yields an empty store
    pub async fn load_snapshot(dir: impl AsRef<Path>) -> Result<Self> {
        let path = Self::snapshot_path(dir.as_ref());
        if !path.exists() {
            tracing::debug!("Store snapshot not found, starting empty");
            return Ok(Self::new());
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CloudError::StoreError(format!(
                "Store snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        tracing::debug!("Loaded store with {} documents", snapshot.documents.len());
        Ok(Self {
            documents: RwLock::new(snapshot.documents),
        })
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, link: &str) -> Result<Value> {
        self.documents
            .read()
            .await
            .get(link)
            .cloned()
            .ok_or_else(|| CloudError::ResourceNotFound(link.to_string()))
    }

    async fn create(&self, factory_link: &str, document: Value) -> Result<Value> {
        let mut fields = into_object(document, factory_link)?;
        let link = match fields.get(SELF_LINK).and_then(Value::as_str) {
            Some(link) if !link.is_empty() => link.to_string(),
            _ => format!("{}/{}", factory_link.trim_end_matches('/'), Uuid::new_v4()),
        };

        let mut documents = self.documents.write().await;
        if documents.contains_key(&link) {
            return Err(CloudError::ResourceAlreadyExists(link));
        }
        stamp(&mut fields, &link, 1);
        let document = Value::Object(fields);
        documents.insert(link.clone(), document.clone());
        tracing::trace!(link = %link, "created document");
        Ok(document)
    }

    async fn patch(&self, link: &str, partial: Value) -> Result<Value> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get_mut(link)
            .ok_or_else(|| CloudError::ResourceNotFound(link.to_string()))?;

        let version = version_of(current) + 1;
        merge_patch(current, &partial);
        if let Value::Object(fields) = &mut *current {
            stamp(fields, link, version);
        }
        tracing::trace!(link, version, "patched document");
        Ok(current.clone())
    }

    async fn put(&self, link: &str, document: Value) -> Result<Value> {
        let mut fields = into_object(document, link)?;
        let mut documents = self.documents.write().await;
        let version = documents
            .get(link)
            .map(version_of)
            .ok_or_else(|| CloudError::ResourceNotFound(link.to_string()))?
            + 1;

        stamp(&mut fields, link, version);
        let document = Value::Object(fields);
        documents.insert(link.to_string(), document.clone());
        tracing::trace!(link, version, "replaced document");
        Ok(document)
    }

    async fn delete(&self, link: &str) -> Result<()> {
        match self.documents.write().await.remove(link) {
            Some(_) => {
                tracing::trace!(link, "deleted document");
                Ok(())
            }
            None => Err(CloudError::ResourceNotFound(link.to_string())),
        }
    }
}
