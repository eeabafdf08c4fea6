//! Reference-counted registry of client caches
//!
//! Workflows for the same client kind share one [`ClientCache`]. The registry
//! hands out [`CacheLease`]s and tears a cache down only when no lease is
//! outstanding and the cache has lived at least the configured minimum
//! lifetime. Idle caches younger than that are left for [`ClientCacheRegistry::sweep`].

use crate::cache::{ClientCache, ClientFactory};
use crate::config::ClientCacheConfig;
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[async_trait]
trait Teardown: Send + Sync {
    async fn teardown(&self);
}

#[async_trait]
impl<C: ?Sized + Send + Sync + 'static> Teardown for ClientCache<C> {
    async fn teardown(&self) {
        self.evict_all().await;
    }
}

struct RegistryEntry {
    cache: Arc<dyn Any + Send + Sync>,
    teardown: Arc<dyn Teardown>,
    refs: usize,
    created_at: Instant,
}

/// Process-wide map of client kind to shared cache instance
pub struct ClientCacheRegistry {
    config: ClientCacheConfig,
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl ClientCacheRegistry {
    pub fn new(config: ClientCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on the cache for `kind`, creating it with `factory`
    /// if no instance exists
    pub fn acquire<C, F>(self: &Arc<Self>, kind: &str, factory: F) -> Result<CacheLease<C>>
    where
        C: ?Sized + Send + Sync + 'static,
        F: FnOnce() -> Arc<dyn ClientFactory<C>>,
    {
        let mut entries = self.entries();
        let entry = entries.entry(kind.to_string()).or_insert_with(|| {
            let cache = Arc::new(ClientCache::new(kind, factory(), self.config.clone()));
            tracing::debug!(kind, "created client cache");
            RegistryEntry {
                cache: cache.clone(),
                teardown: cache,
                refs: 0,
                created_at: Instant::now(),
            }
        });

        let cache = entry
            .cache
            .clone()
            .downcast::<ClientCache<C>>()
            .map_err(|_| {
                CloudError::InvalidConfig(format!(
                    "client kind '{}' is registered with a different client type",
                    kind
                ))
            })?;
        entry.refs += 1;

        Ok(CacheLease {
            registry: self.clone(),
            kind: kind.to_string(),
            cache,
            released: false,
        })
    }

    /// Outstanding references for `kind`, `None` if no cache exists
    pub fn ref_count(&self, kind: &str) -> Option<usize> {
        self.entries().get(kind).map(|entry| entry.refs)
    }

    fn decrement(&self, kind: &str) -> usize {
        match self.entries().get_mut(kind) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs
            }
            None => 0,
        }
    }

    /// Drop one reference and tear the cache down if it is now idle and old enough
    async fn release_kind(&self, kind: &str) {
        let expired = {
            let mut entries = self.entries();
            let teardown = match entries.get_mut(kind) {
                Some(entry) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.refs == 0 && entry.created_at.elapsed() >= self.config.min_lifetime()
                }
                None => false,
            };
            if teardown {
                entries.remove(kind)
            } else {
                None
            }
        };

        if let Some(entry) = expired {
            tracing::debug!(kind, "tearing down idle client cache");
            entry.teardown.teardown().await;
        }
    }

    /// Tear down every unreferenced cache older than the minimum lifetime
    pub async fn sweep(&self) -> usize {
        let expired: Vec<(String, RegistryEntry)> = {
            let mut entries = self.entries();
            let min_lifetime = self.config.min_lifetime();
            let kinds: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.refs == 0 && entry.created_at.elapsed() >= min_lifetime)
                .map(|(kind, _)| kind.clone())
                .collect();
            kinds
                .into_iter()
                .filter_map(|kind| entries.remove(&kind).map(|entry| (kind, entry)))
                .collect()
        };

        let count = expired.len();
        for (kind, entry) in expired {
            tracing::debug!(kind = %kind, "sweeping idle client cache");
            entry.teardown.teardown().await;
        }
        count
    }

    /// Evict every cache regardless of references
    pub async fn shutdown(&self) {
        let drained: Vec<RegistryEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.teardown.teardown().await;
        }
    }
}

/// A counted reference to a shared [`ClientCache`]
///
/// Call [`CacheLease::release`] when done. A lease that is only dropped still
/// gives its reference back, but leaves teardown to the next sweep.
pub struct CacheLease<C: ?Sized + Send + Sync + 'static> {
    registry: Arc<ClientCacheRegistry>,
    kind: String,
    cache: Arc<ClientCache<C>>,
    released: bool,
}

impl<C: ?Sized + Send + Sync + 'static> CacheLease<C> {
    pub fn cache(&self) -> &Arc<ClientCache<C>> {
        &self.cache
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub async fn release(mut self) {
        self.released = true;
        self.registry.release_kind(&self.kind).await;
    }
}

impl<C: ?Sized + Send + Sync + 'static> Drop for CacheLease<C> {
    fn drop(&mut self) {
        if !self.released {
            self.registry.decrement(&self.kind);
        }
    }
}
