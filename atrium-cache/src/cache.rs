//  Copyright 2025 Atrium Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    arena::{Arena, Entry, EntryIndex},
    error::{CacheError, Result},
    eviction::{EvictionPolicy, OrderList},
    indexer::BucketIndex,
    metrics::Metrics,
};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Owned snapshot of a cache entry, handed out by [`ObjectCache::get`].
///
/// The payload is a reference-counted [`Bytes`] clone, so the snapshot stays
/// valid however the cache mutates afterwards; no reference into cache
/// internals ever escapes the lock.
#[derive(Debug, Clone)]
pub struct CachedObject {
    data: Bytes,
    size: usize,
    frequency: u64,
    last_access: u64,
}

impl CachedObject {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Wall-clock seconds of the access that produced this snapshot.
    pub fn last_access(&self) -> u64 {
        self.last_access
    }
}

/// The mutable state of the cache, guarded by one exclusive lock.
struct CacheShard {
    arena: Arena,
    indexer: BucketIndex,
    order: OrderList,
    policy: EvictionPolicy,

    capacity: usize,
    usage: Arc<AtomicUsize>,
    len: Arc<AtomicUsize>,

    metrics: Arc<Metrics>,
}

impl CacheShard {
    fn new(
        capacity: usize,
        policy: EvictionPolicy,
        usage: Arc<AtomicUsize>,
        len: Arc<AtomicUsize>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            arena: Arena::new(),
            indexer: BucketIndex::new(),
            order: OrderList::new(),
            policy,
            capacity,
            usage,
            len,
            metrics,
        }
    }

    fn insert(&mut self, key: String, data: Bytes) {
        let size = data.len();

        if let Some(index) = self.indexer.lookup(&self.arena, &key) {
            let old_size = {
                let entry = &mut self.arena[index];
                let old_size = entry.size;
                entry.data = data;
                entry.size = size;
                entry.frequency += 1;
                entry.last_access = unix_now();
                old_size
            };
            if size >= old_size {
                self.usage.fetch_add(size - old_size, Ordering::Relaxed);
            } else {
                self.usage.fetch_sub(old_size - size, Ordering::Relaxed);
            }
            self.order.unlink(&mut self.arena, index);
            self.order.attach(&mut self.arena, self.policy, index);
            self.metrics.replace.fetch_add(1, Ordering::Relaxed);
            // A growing replace can overflow the capacity; shed from the
            // tail, but never the entry that was just replaced.
            self.shed_overflow(index);
            return;
        }

        self.evict_until_fits(size);

        let index = self.arena.insert(Entry::new(key, data, unix_now()));
        self.indexer.insert(&mut self.arena, index);
        self.order.attach(&mut self.arena, self.policy, index);
        self.usage.fetch_add(size, Ordering::Relaxed);
        self.len.fetch_add(1, Ordering::Relaxed);
        self.metrics.insert.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&mut self, key: &str) -> Option<CachedObject> {
        let index = match self.indexer.lookup(&self.arena, key) {
            Some(index) => {
                self.metrics.hit.fetch_add(1, Ordering::Relaxed);
                index
            }
            None => {
                self.metrics.miss.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        {
            let entry = &mut self.arena[index];
            entry.frequency += 1;
            entry.last_access = unix_now();
        }
        self.order.unlink(&mut self.arena, index);
        self.order.attach(&mut self.arena, self.policy, index);

        let entry = &self.arena[index];
        Some(CachedObject {
            data: entry.data.clone(),
            size: entry.size,
            frequency: entry.frequency,
            last_access: entry.last_access,
        })
    }

    fn remove(&mut self, key: &str) {
        if let Some(index) = self.indexer.lookup(&self.arena, key) {
            self.release(index);
            self.metrics.remove.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn clear(&mut self) {
        let removed = self.arena.len();
        self.arena.clear();
        self.indexer.clear();
        self.order.clear();
        self.usage.store(0, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.metrics.remove.fetch_add(removed, Ordering::Relaxed);
    }

    fn set_policy(&mut self, policy: EvictionPolicy) {
        if self.policy == policy {
            return;
        }
        self.policy = policy;

        // Detach everything, then re-insert in the old head→tail order under
        // the new policy's placement rule.
        let ordered = self.order.iter(&self.arena).collect_vec();
        self.order.clear();
        for &index in &ordered {
            self.arena[index].prev = None;
            self.arena[index].next = None;
        }
        for index in ordered {
            self.order.attach(&mut self.arena, policy, index);
        }
        tracing::debug!(policy = %policy, entries = self.arena.len(), "reordered cache");
    }

    /// Evict from the tail until the incoming bytes fit or nothing is left.
    /// An entry larger than the whole capacity is admitted into an empty
    /// cache; the layer above already refuses to cache oversized items.
    fn evict_until_fits(&mut self, incoming: usize) {
        while self.usage.load(Ordering::Relaxed) + incoming > self.capacity {
            match self.order.pop_tail(&mut self.arena) {
                Some(victim) => self.evict(victim),
                None => break,
            }
        }
    }

    /// Evict from the tail while over capacity, stopping short of `protect`.
    fn shed_overflow(&mut self, protect: EntryIndex) {
        while self.usage.load(Ordering::Relaxed) > self.capacity {
            match self.order.tail() {
                Some(victim) if victim != protect => {
                    self.order.unlink(&mut self.arena, victim);
                    self.evict(victim);
                }
                _ => break,
            }
        }
    }

    fn evict(&mut self, index: EntryIndex) {
        self.indexer.remove(&mut self.arena, index);
        let entry = self.arena.remove(index);
        self.usage.fetch_sub(entry.size, Ordering::Relaxed);
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.metrics.evict.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %entry.key, size = entry.size, "evicted cache entry");
    }

    /// Drop an entry that is still linked into the ordering list.
    fn release(&mut self, index: EntryIndex) {
        self.order.unlink(&mut self.arena, index);
        self.indexer.remove(&mut self.arena, index);
        let entry = self.arena.remove(index);
        self.usage.fetch_sub(entry.size, Ordering::Relaxed);
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    fn dump(&self) -> Vec<(String, u64)> {
        self.order
            .iter(&self.arena)
            .map(|index| {
                let entry = &self.arena[index];
                (entry.key.clone(), entry.frequency)
            })
            .collect_vec()
    }
}

/// Concurrent key→blob cache with size-bounded capacity and a runtime
/// switchable eviction discipline.
///
/// Keys are canonical file paths, values are the file contents. All mutable
/// state sits behind one exclusive lock; `usage`/`len` are mirrored into
/// atomics so the accessors never contend with the mutators.
pub struct ObjectCache {
    shard: Mutex<CacheShard>,

    capacity: usize,
    usage: Arc<AtomicUsize>,
    len: Arc<AtomicUsize>,

    metrics: Arc<Metrics>,
}

impl ObjectCache {
    /// An empty cache with the default (LRU) policy.
    pub fn new(capacity: usize) -> Self {
        Self::builder(capacity).build()
    }

    pub fn builder(capacity: usize) -> ObjectCacheBuilder {
        ObjectCacheBuilder {
            capacity,
            policy: EvictionPolicy::default(),
        }
    }

    /// Insert or replace.
    ///
    /// A replace overwrites the payload in place, bumps the entry's access
    /// frequency and re-positions it. A fresh insert evicts from the tail
    /// until the new entry fits or the cache is empty.
    pub fn insert(&self, key: impl Into<String>, data: Bytes) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if data.is_empty() {
            return Err(CacheError::EmptyValue);
        }
        self.shard.lock().insert(key, data);
        Ok(())
    }

    /// Look up a key, counting it as a touch for the eviction order.
    pub fn get(&self, key: &str) -> Option<CachedObject> {
        self.shard.lock().get(key)
    }

    /// Remove a key. Removing a missing key is a no-op.
    pub fn remove(&self, key: &str) {
        self.shard.lock().remove(key)
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.shard.lock().clear()
    }

    /// Total bytes of all live entries.
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.shard.lock().policy
    }

    /// Switch the eviction discipline, reordering every entry in place.
    /// Setting the active policy again is a no-op.
    pub fn set_policy(&self, policy: EvictionPolicy) {
        self.shard.lock().set_policy(policy)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Diagnostic snapshot of `(key, frequency)` in head→tail order.
    pub fn dump(&self) -> Vec<(String, u64)> {
        self.shard.lock().dump()
    }
}

pub struct ObjectCacheBuilder {
    capacity: usize,
    policy: EvictionPolicy,
}

impl ObjectCacheBuilder {
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> ObjectCache {
        let usage = Arc::new(AtomicUsize::new(0));
        let len = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(Metrics::default());
        ObjectCache {
            shard: Mutex::new(CacheShard::new(
                self.capacity,
                self.policy,
                usage.clone(),
                len.clone(),
                metrics.clone(),
            )),
            capacity: self.capacity,
            usage,
            len,
            metrics,
        }
    }
}
