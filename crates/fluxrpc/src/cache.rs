//! # Result Cache
//!
//! Shared deferred results of cacheable single-response calls, keyed by
//! `cache_name + ":" + argument hash`.
//!
//! ## Invariants
//!
//! - **Write-Time TTL**: an entry expires a fixed duration after it was written,
//!   regardless of reads.
//! - **Bounded**: at most `max_entries` entries; the least recently used is
//!   evicted first.
//! - **Successes Only**: only calls that produced a value are published.
//! - **Coalesced Misses**: concurrent misses on one key share a single call.
//! - **Detached Calls**: a started call runs to completion on its own task;
//!   dropping or timing out a caller never strands the in-flight marker.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fluxcodec::Value;
use futures::FutureExt;
use futures::future::BoxFuture;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;
use tracing::debug;
use tracing::trace;

use crate::config::CacheConfig;
use crate::reply::SharedResult;
use crate::transport;

struct CacheEntry {
    value: SharedResult,
    written: Instant,
}

pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    in_flight: DashMap<String, SharedResult>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.max_entries, config.ttl())
    }

    /// A zero capacity is raised to one.
    pub fn with_capacity(max_entries: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
            in_flight: DashMap::new(),
        }
    }

    /// `cache_name + ":" + hash(args)`.
    pub fn cache_key(cache_name: &str, args: &[Value]) -> String {
        format!("{cache_name}:{}", fluxcodec::generate_cache_key(args))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live entry for `key`. Expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Option<SharedResult> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(e) if e.written.elapsed() < self.ttl => return Some(e.value.clone()),
            Some(_) => true,
        };
        if expired {
            entries.pop(key);
            trace!(%key, "cache entry expired");
        }
        None
    }

    pub fn put(&self, key: impl Into<String>, value: SharedResult) {
        let key = key.into();
        debug!(%key, "cache write");
        self.entries.lock().put(key, CacheEntry { value, written: Instant::now() });
    }

    /// Removes `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Removes every listed key; absent keys are skipped. Returns the number removed.
    pub fn invalidate_all<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut entries = self.entries.lock();
        keys.into_iter().filter(|k| entries.pop(k.as_ref()).is_some()).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included until read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns the cached result for `key`, joins the in-flight call for it, or
    /// starts a new call with `start`.
    ///
    /// A started call runs on its own task, so it completes even when every
    /// caller goes away. It publishes itself into the cache when it yields a
    /// value, then leaves the in-flight map. Errors and empty results are not
    /// stored.
    pub fn get_or_start<F>(self: &Arc<Self>, key: String, start: F) -> crate::Result<SharedResult>
    where
        F: FnOnce() -> crate::Result<BoxFuture<'static, crate::Result<Option<Value>>>>,
    {
        if let Some(hit) = self.get(&key) {
            trace!(%key, "cache hit");
            return Ok(hit);
        }
        match self.in_flight.entry(key) {
            Entry::Occupied(e) => {
                trace!(key = %e.key(), "joined in-flight call");
                Ok(e.get().clone())
            }
            Entry::Vacant(e) => {
                let call = start()?;
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|err| transport::Error::Io(format!("no async runtime: {err}")))?;
                let (tx, rx) = oneshot::channel::<crate::Result<Option<Value>>>();
                let shared = rx
                    .map(|received| {
                        received.unwrap_or_else(|_| Err(transport::Error::Io("cached call aborted".into()).into()))
                    })
                    .boxed()
                    .shared();
                let guard = InFlight { cache: Arc::clone(self), key: e.key().clone() };
                // The entry lock is released before the task starts; the guard
                // takes it again on drop.
                drop(e.insert(shared.clone()));

                let me = shared.clone();
                runtime.spawn(
                    async move {
                        let result = call.await;
                        if let Ok(Some(_)) = &result {
                            guard.cache.put(guard.key.clone(), me);
                        }
                        drop(guard);
                        let _ = tx.send(result);
                    }
                    .in_current_span(),
                );
                Ok(shared)
            }
        }
    }
}

/// Clears the in-flight marker when the call task finishes or is torn down.
struct InFlight {
    cache: Arc<ResultCache>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.cache.in_flight.remove(&self.key);
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
