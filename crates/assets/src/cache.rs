//! De-duplicating asset cache keyed by `(entity, quality)`.
//!
//! A miss spawns the supplied fetch on the tokio runtime and records a shared
//! pending future, so every concurrent caller for the same key awaits one
//! fetch. The spawned task populates the cache itself, which means a fetch
//! whose waiters were all dropped still lands in the cache.

use crate::asset::{AssetKey, FetchError, LoadedAsset};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Result delivered to every waiter on a key.
pub type FetchResult = Result<Arc<LoadedAsset>, FetchError>;

type PendingFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joined: u64,
}

#[derive(Default)]
struct CacheInner {
    ready: HashMap<AssetKey, Arc<LoadedAsset>>,
    in_flight: HashMap<AssetKey, PendingFetch>,
    /// Bumped by `clear`; fetches started under an older generation never
    /// write back.
    generation: u64,
    hits: u64,
    misses: u64,
    joined: u64,
}

/// Shared, cloneable handle to the asset cache.
#[derive(Clone, Default)]
pub struct AssetCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AssetKey) -> Option<Arc<LoadedAsset>> {
        self.inner.lock().ready.get(key).cloned()
    }

    /// Insert a decoded asset, replacing any previous entry for its key.
    pub fn put(&self, asset: LoadedAsset) -> Arc<LoadedAsset> {
        let asset = Arc::new(asset);
        self.inner
            .lock()
            .ready
            .insert(asset.key.clone(), Arc::clone(&asset));
        asset
    }

    pub fn remove(&self, key: &AssetKey) -> Option<Arc<LoadedAsset>> {
        self.inner.lock().ready.remove(key)
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.inner.lock().ready.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches currently pending.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.ready.len(),
            in_flight: inner.in_flight.len(),
            hits: inner.hits,
            misses: inner.misses,
            joined: inner.joined,
        }
    }

    /// Drop every cached asset and forget pending fetches. Fetches already
    /// running finish for their current waiters but do not repopulate the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.ready.clear();
        inner.in_flight.clear();
        tracing::debug!(generation = inner.generation, "asset cache cleared");
    }

    /// Return the cached asset for `key`, join a pending fetch for it, or start
    /// one with `fetch`. `fetch` is only invoked on a miss.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_fetch<F, Fut>(&self, key: AssetKey, fetch: F) -> BoxFuture<'static, FetchResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoadedAsset, FetchError>> + Send + 'static,
    {
        let mut inner = self.inner.lock();

        if let Some(asset) = inner.ready.get(&key).cloned() {
            inner.hits += 1;
            tracing::trace!(%key, "asset cache hit");
            return futures::future::ready(Ok(asset)).boxed();
        }

        if let Some(pending) = inner.in_flight.get(&key).cloned() {
            inner.joined += 1;
            tracing::trace!(%key, "joined in-flight fetch");
            return pending.boxed();
        }

        inner.misses += 1;
        let generation = inner.generation;
        let cache = Arc::clone(&self.inner);
        let task_key = key.clone();
        let work = fetch();

        // The task locks the cache only after `work` completes, and we hold the
        // lock until the pending entry is recorded.
        let handle = tokio::spawn(async move {
            let mut guard = InFlightGuard {
                cache,
                key: task_key,
                generation,
                settled: false,
            };
            let result = work.await.map(Arc::new);
            let mut inner = guard.cache.lock();
            if inner.generation == generation {
                inner.in_flight.remove(&guard.key);
                match &result {
                    Ok(asset) => {
                        inner.ready.insert(guard.key.clone(), Arc::clone(asset));
                    }
                    Err(err) => {
                        tracing::debug!(key = %guard.key, error = %err, "fetch failed, not cached");
                    }
                }
            }
            drop(inner);
            guard.settled = true;
            result
        });

        let pending: PendingFetch = async move {
            match handle.await {
                Ok(result) => result,
                Err(join) => Err(FetchError::Rejected(join.to_string())),
            }
        }
        .boxed()
        .shared();

        tracing::debug!(%key, "fetch started");
        inner.in_flight.insert(key, pending.clone());
        pending.boxed()
    }
}

/// Clears the pending entry if a fetch task ends without settling, so a
/// panicked or aborted fetch does not block its key.
struct InFlightGuard {
    cache: Arc<Mutex<CacheInner>>,
    key: AssetKey,
    generation: u64,
    settled: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.cache.lock();
        if inner.generation == self.generation {
            inner.in_flight.remove(&self.key);
            tracing::warn!(key = %self.key, "fetch task ended without a result");
        }
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("stats", &self.stats())
            .finish()
    }
}
