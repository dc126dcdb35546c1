//! Read-through object cache using moka
//!
//! Best-effort local copy of templates and snapshots. Misses fall back to the
//! authoritative store and populate the cache. Snapshots are immutable so
//! they stay valid; templates may go stale until their TTL expires.

use crate::error::StoreResult;
use crate::store::ObjectStore;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use vmt_api::{ObjectKey, Snapshot, Template, TemplateKind};

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Template(TemplateKind, ObjectKey),
    Snapshot(ObjectKey),
}

#[derive(Debug, Clone)]
enum Cached {
    Template(Arc<Template>),
    Snapshot(Arc<Snapshot>),
}

/// Read-through cache over an [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct ObjectCache {
    inner: Cache<CacheKey, Cached>,
}

impl ObjectCache {
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Get a template, falling back to `store` on miss
    ///
    /// # Errors
    /// Propagates the store error on a miss that the store cannot serve.
    pub async fn get_template(
        &self,
        store: &dyn ObjectStore,
        kind: TemplateKind,
        key: &ObjectKey,
    ) -> StoreResult<Template> {
        let cache_key = CacheKey::Template(kind, key.clone());
        if let Some(Cached::Template(t)) = self.inner.get(&cache_key).await {
            return Ok((*t).clone());
        }

        tracing::debug!(%kind, %key, "template cache miss");
        let template = store.get_template(kind, key).await?;
        self.inner
            .insert(cache_key, Cached::Template(Arc::new(template.clone())))
            .await;
        Ok(template)
    }

    /// Get a snapshot, falling back to `store` on miss
    ///
    /// # Errors
    /// Propagates the store error on a miss that the store cannot serve.
    pub async fn get_snapshot(&self, store: &dyn ObjectStore, key: &ObjectKey) -> StoreResult<Snapshot> {
        let cache_key = CacheKey::Snapshot(key.clone());
        if let Some(Cached::Snapshot(s)) = self.inner.get(&cache_key).await {
            return Ok((*s).clone());
        }

        tracing::debug!(%key, "snapshot cache miss");
        let snapshot = store.get_snapshot(key).await?;
        self.inner
            .insert(cache_key, Cached::Snapshot(Arc::new(snapshot.clone())))
            .await;
        Ok(snapshot)
    }

    /// Record a snapshot that was just written
    #[inline]
    pub async fn insert_snapshot(&self, snapshot: Snapshot) {
        self.inner
            .insert(CacheKey::Snapshot(snapshot.key()), Cached::Snapshot(Arc::new(snapshot)))
            .await;
    }

    /// Drop a cached snapshot
    #[inline]
    pub async fn invalidate_snapshot(&self, key: &ObjectKey) {
        self.inner.invalidate(&CacheKey::Snapshot(key.clone())).await;
    }

    /// Drop a cached template
    #[inline]
    pub async fn invalidate_template(&self, kind: TemplateKind, key: &ObjectKey) {
        self.inner
            .invalidate(&CacheKey::Template(kind, key.clone()))
            .await;
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for ObjectCache {
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::new(10_000)
    }
}
