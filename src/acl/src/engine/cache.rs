//! Resolved-actions cache for access checks
//!
//! Provides:
//! - In-memory map with DashMap (thread-safe, lock-free reads)
//! - TTL-based expiration
//! - BLAKE3 hashing of `(identity, resource)` for cache keys
//!
//! The engine clears the cache on every write it performs. Each clear
//! starts a new generation; a read resolved under an older generation is
//! not stored.

use blake3::Hasher;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actions::Actions;
use crate::identity::IdentityId;
use crate::resource::Resource;

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached entries, in milliseconds
    pub ttl_ms: u64,
}

impl CacheConfig {
    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_ms: 60_000,
        }
    }
}

/// Cache key type (BLAKE3 hash)
type CacheKey = [u8; 32];

#[derive(Clone, Copy)]
struct CachedEntry {
    actions: Actions,
    cached_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: usize,
    /// Lookups that missed
    pub misses: usize,
    /// Entries dropped for exceeding the TTL
    pub expirations: usize,
    /// Live entries
    pub entries: usize,
    /// Configured capacity
    pub max_entries: usize,
}

/// Cache of allowed actions per `(identity, resource)`
pub struct DecisionCache {
    entries: Arc<DashMap<CacheKey, CachedEntry>>,
    config: CacheConfig,
    generation: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl DecisionCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            generation: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    /// Cached actions, if present and fresh
    pub fn get(&self, identity: &IdentityId, resource: &Resource) -> Option<Actions> {
        let key = Self::compute_key(identity, resource);

        if let Some(entry) = self.entries.get(&key).map(|e| *e) {
            if entry.is_expired(self.config.ttl()) {
                self.entries.remove(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.actions);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store resolved actions
    pub fn put(&self, identity: &IdentityId, resource: &Resource, actions: Actions) {
        if self.entries.len() >= self.config.capacity {
            self.evict();
        }

        self.entries.insert(
            Self::compute_key(identity, resource),
            CachedEntry {
                actions,
                cached_at: Instant::now(),
            },
        );
    }

    /// Current generation, to be passed to [`Self::put_if_current`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store actions resolved under `generation`, unless a clear happened
    /// since. Returns whether the entry was kept.
    pub fn put_if_current(
        &self,
        generation: u64,
        identity: &IdentityId,
        resource: &Resource,
        actions: Actions,
    ) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.put(identity, resource, actions);

        // A clear racing the insert may have missed it
        if self.generation() != generation {
            self.entries.remove(&Self::compute_key(identity, resource));
            return false;
        }
        true
    }

    /// Drop every entry and start a new generation
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    fn compute_key(identity: &IdentityId, resource: &Resource) -> CacheKey {
        let mut hasher = Hasher::new();

        hasher.update(identity.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(resource.entity_class().as_bytes());
        hasher.update(&[0]);

        // Absent components hash differently from empty ones
        match resource.entity_id() {
            Some(id) => {
                hasher.update(&[1]);
                hasher.update(id.to_stored().as_bytes());
            }
            None => {
                hasher.update(&[2]);
            }
        }
        match resource.field() {
            Some(field) => {
                hasher.update(&[1]);
                hasher.update(field.as_bytes());
            }
            None => {
                hasher.update(&[2]);
            }
        }

        *hasher.finalize().as_bytes()
    }

    /// Expired entries first, then an arbitrary 10% of capacity
    fn evict(&self) {
        let ttl = self.config.ttl();
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        if self.entries.len() < self.config.capacity {
            return;
        }

        let to_remove = (self.config.capacity / 10).max(1);
        let victims: Vec<CacheKey> = self
            .entries
            .iter()
            .take(to_remove)
            .map(|entry| *entry.key())
            .collect();
        for key in victims {
            self.entries.remove(&key);
        }
    }
}
