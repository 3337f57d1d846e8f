//! Generic memoizing key-value store

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::key::{CacheStoreKey, KEY_SEPARATOR};

/// Counters describing how a store has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub constructions: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    constructions: AtomicU64,
    evictions: AtomicU64,
}

/// Thread-safe store of lazily constructed values.
///
/// Values are built outside any lock and published with a single insert, so
/// concurrent lookups of the same key may construct more than once; the last
/// write wins and later lookups all observe it. A failed construction stores
/// nothing.
///
/// Entries are reclaimable: once no caller holds a value any more, [`sweep`]
/// may drop it. A store with a soft limit sweeps on its own whenever it grows
/// past the limit.
///
/// [`sweep`]: CacheStore::sweep
pub struct CacheStore<V> {
    name: &'static str,
    entries: DashMap<String, Arc<V>>,
    soft_limit: Option<usize>,
    counters: Counters,
}

impl<V> CacheStore<V>
where
    V: Send + Sync,
{
    pub fn new(name: &'static str) -> Self {
        Self::with_soft_limit(name, None)
    }

    pub fn with_soft_limit(name: &'static str, soft_limit: Option<usize>) -> Self {
        CacheStore {
            name,
            entries: DashMap::new(),
            soft_limit,
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn soft_limit(&self) -> Option<usize> {
        self.soft_limit
    }

    /// Return the live value for `key`, constructing it with `create` if absent.
    pub fn get<K, E, F>(&self, key: &K, create: F) -> Result<Arc<V>, E>
    where
        K: CacheStoreKey + ?Sized,
        F: FnOnce(&K) -> Result<Arc<V>, E>,
    {
        let slot = key.generate_key();
        if let Some(value) = self.peek_slot(&slot) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // No shard guard may be held here: `create` is free to consult other
        // stores, or this one for a different key.
        let value = create(key)?;
        self.counters.constructions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("{}: constructed {}", self.name, slot);

        self.entries.insert(slot, Arc::clone(&value));
        if self.soft_limit.is_some_and(|limit| self.entries.len() > limit) {
            self.sweep();
        }
        Ok(value)
    }

    /// The live value for `key`, without constructing one.
    pub fn peek<K>(&self, key: &K) -> Option<Arc<V>>
    where
        K: CacheStoreKey + ?Sized,
    {
        self.peek_slot(&key.generate_key())
    }

    fn peek_slot(&self, slot: &str) -> Option<Arc<V>> {
        self.entries.get(slot).map(|entry| Arc::clone(entry.value()))
    }

    /// Evict `key`, returning the value it held.
    pub fn remove<K>(&self, key: &K) -> Option<Arc<V>>
    where
        K: CacheStoreKey + ?Sized,
    {
        self.entries.remove(&key.generate_key()).map(|(_, value)| value)
    }

    /// Evict every slot derived from `path`: the path itself and every
    /// `{path}:{entry}` slot. Returns the number of slots dropped.
    pub fn remove_for_file(&self, path: &str) -> usize {
        let prefix = format!("{path}{KEY_SEPARATOR}");
        let before = self.entries.len();
        self.entries
            .retain(|slot, _| slot != path && !slot.starts_with(&prefix));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!("{}: dropped {} entries for {}", self.name, removed, path);
        }
        removed
    }

    /// Number of entries, reclaimable ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry nobody outside the store still holds.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| Arc::strong_count(value) > 1);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!("{}: swept {} unused entries", self.name, evicted);
        }
        evicted
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            constructions: self.counters.constructions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A specialized cache: a [`CacheStore`] plus the construction of its values.
pub trait CacheStoreBase {
    type Key: CacheStoreKey + ?Sized;
    type Value: Send + Sync;
    type Error;

    fn store(&self) -> &CacheStore<Self::Value>;

    /// Build the value for `key`. Must not insert into the store itself.
    fn create_entry_value(&self, key: &Self::Key) -> Result<Arc<Self::Value>, Self::Error>;

    fn get(&self, key: &Self::Key) -> Result<Arc<Self::Value>, Self::Error> {
        self.store().get(key, |key| self.create_entry_value(key))
    }

    fn remove(&self, key: &Self::Key) -> Option<Arc<Self::Value>> {
        self.store().remove(key)
    }

    fn len(&self) -> usize {
        self.store().len()
    }

    fn store_name(&self) -> &'static str {
        self.store().name()
    }

    fn stats(&self) -> CacheStats {
        self.store().stats()
    }
}
