//! Bounded concurrent cache shared by the table cache and the block cache.

use std::collections::hash_map::RandomState;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quick_cache::sync::Cache as QuickCache;
use quick_cache::{Lifecycle, UnitWeighter};

use crate::error::Result;

/// Called with every entry that leaves the cache, whether pushed out by
/// capacity or removed explicitly.
pub type EvictionListener<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

struct Notify<K, V> {
    listener: Option<EvictionListener<K, V>>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> Clone for Notify<K, V> {
    fn clone(&self) -> Self {
        Notify {
            listener: self.listener.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Lifecycle<K, V> for Notify<K, V> {
    type RequestState = ();

    fn begin_request(&self) -> Self::RequestState {}

    fn on_evict(&self, _state: &mut Self::RequestState, key: K, val: V) {
        if let Some(listener) = &self.listener {
            listener(&key, &val);
        }
    }
}

/// Concurrent map with a fixed entry capacity.
///
/// Concurrent misses on the same key perform a single load
/// ([`get_or_insert_with`](Cache::get_or_insert_with)); the other callers
/// wait for it and share the result.
pub struct Cache<K, V> {
    inner: QuickCache<K, V, UnitWeighter, RandomState, Notify<K, V>>,
    listener: Option<EvictionListener<K, V>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_listener(capacity, None)
    }

    pub fn with_listener(capacity: usize, listener: Option<EvictionListener<K, V>>) -> Self {
        let capacity = capacity.max(1);
        let lifecycle = Notify {
            listener: listener.clone(),
            _marker: PhantomData,
        };
        Cache {
            inner: QuickCache::with(
                capacity,
                capacity as u64,
                UnitWeighter,
                RandomState::new(),
                lifecycle,
            ),
            listener,
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Return the cached value, or run `load` once and cache its result.
    /// A failed load caches nothing.
    pub fn get_or_insert_with<F>(&self, key: &K, load: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.inner.get_or_insert_with(key, load)
    }

    /// Drop `key` if present, notifying the listener. Returns whether an
    /// entry was removed.
    pub fn remove(&self, key: &K) -> bool {
        let Some(value) = self.inner.get(key) else {
            return false;
        };
        if self.inner.remove(key).is_none() {
            return false;
        }
        if let Some(listener) = &self.listener {
            listener(key, &value);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A fresh id for partitioning a shared cache's key space between
    /// clients (one id per open table in the block cache).
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
