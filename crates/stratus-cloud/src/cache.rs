//! Provider client cache
//!
//! Holds at most one live client per [`CacheKey`] (credential fingerprint and
//! region). Creation is single-flight: concurrent callers for the same key
//! share one in-progress creation and receive the same handle. Invalidated
//! keys are negative-cached and fail fast until the TTL elapses.

use crate::config::ClientCacheConfig;
use crate::credentials::{CacheKey, Credentials};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

/// Creates and closes provider clients for one client kind
#[async_trait]
pub trait ClientFactory<C: ?Sized + Send + Sync + 'static>: Send + Sync {
    async fn create(&self, credentials: &Credentials) -> Result<Arc<C>>;

    /// Called when a client leaves the cache. Other holders of the `Arc`
    /// may still be using it.
    async fn close(&self, _client: Arc<C>) {}
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub live: usize,
    pub invalid: usize,
    pub created: u64,
    pub evicted: u64,
}

struct Slot<C: ?Sized> {
    cell: Arc<OnceCell<Arc<C>>>,
    last_used: u64,
}

struct CacheState<C: ?Sized> {
    live: HashMap<CacheKey, Slot<C>>,
    invalid: HashMap<CacheKey, Instant>,
    tick: u64,
}

impl<C: ?Sized> CacheState<C> {
    /// Remove the least recently used slot, preferring slots whose client exists
    fn take_lru(&mut self) -> Option<(CacheKey, Slot<C>)> {
        let key = self
            .live
            .iter()
            .min_by_key(|(_, slot)| (!slot.cell.initialized(), slot.last_used))
            .map(|(key, _)| key.clone())?;
        self.live.remove(&key).map(|slot| (key, slot))
    }
}

/// Bounded, LRU-evicting client cache with a negative cache
pub struct ClientCache<C: ?Sized + Send + Sync + 'static> {
    kind: String,
    factory: Arc<dyn ClientFactory<C>>,
    config: ClientCacheConfig,
    state: Mutex<CacheState<C>>,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl<C: ?Sized + Send + Sync + 'static> ClientCache<C> {
    pub fn new(
        kind: impl Into<String>,
        factory: Arc<dyn ClientFactory<C>>,
        config: ClientCacheConfig,
    ) -> Self {
        Self {
            kind: kind.into(),
            factory,
            config,
            state: Mutex::new(CacheState {
                live: HashMap::new(),
                invalid: HashMap::new(),
                tick: 0,
            }),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Return the cached client for these credentials, creating it if needed
    pub async fn get_or_create(&self, credentials: &Credentials) -> Result<Arc<C>> {
        let key = credentials.cache_key();
        let (cell, evicted) = self.claim_slot(&key).await?;

        if let Some(client) = evicted {
            self.factory.close(client).await;
        }

        let created_here = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                let client = self.factory.create(credentials).await?;
                created_here.store(true, Ordering::Relaxed);
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %self.kind, key = %key, "created provider client");
                Ok::<_, CloudError>(client)
            })
            .await
            .cloned();

        match result {
            Ok(client) => {
                if created_here.load(Ordering::Relaxed) && !self.is_live(&key, &cell).await {
                    // slot was evicted while the client was being created
                    tracing::debug!(kind = %self.kind, key = %key, "closing client created for an evicted slot");
                    self.factory.close(client.clone()).await;
                }
                Ok(client)
            }
            Err(e) => {
                self.discard_empty_slot(&key, &cell).await;
                if matches!(e, CloudError::AuthenticationFailed(_)) {
                    self.invalidate_key(&key).await;
                }
                Err(e)
            }
        }
    }

    /// Find or insert the slot for `key`, evicting the LRU entry when full
    async fn claim_slot(
        &self,
        key: &CacheKey,
    ) -> Result<(Arc<OnceCell<Arc<C>>>, Option<Arc<C>>)> {
        let mut state = self.state.lock().await;

        if let Some(invalidated_at) = state.invalid.get(key).copied() {
            let ttl = self.config.invalid_ttl();
            let elapsed = invalidated_at.elapsed();
            if elapsed <= ttl {
                return Err(CloudError::ClientInvalidated {
                    key: key.to_string(),
                    retry_in: ttl - elapsed,
                });
            }
            state.invalid.remove(key);
            tracing::debug!(kind = %self.kind, key = %key, "negative cache entry expired");
        }

        state.tick += 1;
        let tick = state.tick;

        if let Some(slot) = state.live.get_mut(key) {
            slot.last_used = tick;
            return Ok((slot.cell.clone(), None));
        }

        let mut evicted = None;
        if state.live.len() >= self.config.max_size.max(1)
            && let Some((old_key, slot)) = state.take_lru()
        {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = %self.kind, key = %old_key, "evicting least recently used client");
            evicted = slot.cell.get().cloned();
        }

        let cell = Arc::new(OnceCell::new());
        state.live.insert(
            key.clone(),
            Slot {
                cell: cell.clone(),
                last_used: tick,
            },
        );
        Ok((cell, evicted))
    }

    async fn is_live(&self, key: &CacheKey, cell: &Arc<OnceCell<Arc<C>>>) -> bool {
        self.state
            .lock()
            .await
            .live
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, cell))
    }

    async fn discard_empty_slot(&self, key: &CacheKey, cell: &Arc<OnceCell<Arc<C>>>) {
        let mut state = self.state.lock().await;
        let is_same_empty_slot = state
            .live
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, cell) && !slot.cell.initialized());
        if is_same_empty_slot {
            state.live.remove(key);
        }
    }

    /// Drop the live client for these credentials and negative-cache the key
    pub async fn invalidate(&self, credentials: &Credentials) {
        self.invalidate_key(&credentials.cache_key()).await;
    }

    pub async fn invalidate_key(&self, key: &CacheKey) {
        let removed = {
            let mut state = self.state.lock().await;
            state.invalid.insert(key.clone(), Instant::now());
            state.live.remove(key)
        };
        tracing::warn!(kind = %self.kind, key = %key, "invalidated provider client");

        if let Some(client) = removed.and_then(|slot| slot.cell.get().cloned()) {
            self.factory.close(client).await;
        }
    }

    /// Close every live client and clear both the live and negative caches
    pub async fn evict_all(&self) {
        let drained: Vec<Arc<C>> = {
            let mut state = self.state.lock().await;
            state.invalid.clear();
            state
                .live
                .drain()
                .filter_map(|(_, slot)| slot.cell.get().cloned())
                .collect()
        };
        self.evicted
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        tracing::debug!(kind = %self.kind, clients = drained.len(), "evicting all provider clients");

        for client in drained {
            self.factory.close(client).await;
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            live: state.live.len(),
            invalid: state.invalid.len(),
            created: self.created.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
