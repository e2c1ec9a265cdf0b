//! Short-lived cache for collaborator lookups on the validation path.
//!
//! Keys name a (subject, attribute) pair. There is deliberately no key for
//! time-window availability: that is always computed fresh.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::clock::Clock;
use crate::collaborators::ResourceStatus;
use crate::model::{Ms, ResourceRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ResourceExists(ResourceRef),
    ResourceStatus(ResourceRef),
    RequesterExists(Ulid),
    RequesterExpiry(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedValue {
    Exists(bool),
    Status { status: ResourceStatus, available: bool },
    Expiry(Option<Ms>),
}

#[async_trait]
pub trait ValidationCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<CachedValue>;
    async fn set(&self, key: CacheKey, value: CachedValue, ttl: Duration);
    async fn invalidate(&self, key: &CacheKey);
}

/// Minimum spacing between full purges triggered from `set`.
const PURGE_INTERVAL_MS: Ms = 60_000;

/// Process-local TTL cache. Expired entries are dropped on read, and all of
/// them are purged from `set` at most once per [`PURGE_INTERVAL_MS`].
pub struct InMemoryCache {
    entries: DashMap<CacheKey, (CachedValue, Ms)>,
    clock: Arc<dyn Clock>,
    last_purge: AtomicI64,
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            entries: DashMap::new(),
            clock,
            last_purge: AtomicI64::new(now),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        self.last_purge.store(now, Ordering::Relaxed);
        before.saturating_sub(self.entries.len())
    }

    fn purge_if_stale(&self, now: Ms) {
        let last = self.last_purge.load(Ordering::Relaxed);
        if now.saturating_sub(last) < PURGE_INTERVAL_MS {
            return;
        }
        // One caller wins the purge; the rest carry on.
        if self
            .last_purge
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ValidationCache for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let now = self.clock.now_ms();
        let hit = self
            .entries
            .get(key)
            .map(|e| *e.value());
        match hit {
            Some((value, expires_at)) if expires_at > now => {
                metrics::counter!(crate::observability::CACHE_HITS_TOTAL).increment(1);
                Some(value)
            }
            Some(_) => {
                self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
                metrics::counter!(crate::observability::CACHE_MISSES_TOTAL).increment(1);
                None
            }
            None => {
                metrics::counter!(crate::observability::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    async fn set(&self, key: CacheKey, value: CachedValue, ttl: Duration) {
        let ttl_ms = Ms::try_from(ttl.as_millis()).unwrap_or(Ms::MAX);
        let now = self.clock.now_ms();
        self.purge_if_stale(now);
        self.entries.insert(key, (value, now.saturating_add(ttl_ms)));
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }
}
