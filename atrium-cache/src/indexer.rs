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

use crate::arena::{Arena, EntryIndex};

/// Number of hash buckets in the key index.
pub const HASH_TABLE_SIZE: usize = 1024;

/// djb2 over the key bytes, reduced to a bucket slot.
fn bucket_of(key: &str) -> usize {
    let mut hash: u32 = 0;
    for &byte in key.as_bytes() {
        hash = (hash << 5)
            .wrapping_add(hash)
            .wrapping_add(u32::from(byte));
    }
    hash as usize % HASH_TABLE_SIZE
}

/// Fixed-size bucket array indexing arena entries by key.
///
/// Collisions chain through each entry's `bucket_next` link; the chain order
/// is most-recently-inserted first.
#[derive(Debug)]
pub(crate) struct BucketIndex {
    buckets: Vec<Option<EntryIndex>>,
}

impl BucketIndex {
    pub fn new() -> Self {
        Self {
            buckets: vec![None; HASH_TABLE_SIZE],
        }
    }

    pub fn lookup(&self, arena: &Arena, key: &str) -> Option<EntryIndex> {
        let mut cursor = self.buckets[bucket_of(key)];
        while let Some(index) = cursor {
            if arena[index].key == key {
                return Some(index);
            }
            cursor = arena[index].bucket_next;
        }
        None
    }

    /// Link a freshly created entry at the head of its bucket chain.
    ///
    /// The key must not already be present; callers look it up first.
    pub fn insert(&mut self, arena: &mut Arena, index: EntryIndex) {
        let bucket = bucket_of(&arena[index].key);
        debug_assert!(self.lookup_index(arena, bucket, index).is_none());
        arena[index].bucket_next = self.buckets[bucket];
        self.buckets[bucket] = Some(index);
    }

    /// Unlink an entry from its bucket chain.
    pub fn remove(&mut self, arena: &mut Arena, index: EntryIndex) {
        let bucket = bucket_of(&arena[index].key);
        let mut cursor = self.buckets[bucket];
        let mut prev: Option<EntryIndex> = None;
        while let Some(current) = cursor {
            if current == index {
                let next = arena[current].bucket_next.take();
                match prev {
                    Some(prev) => arena[prev].bucket_next = next,
                    None => self.buckets[bucket] = next,
                }
                return;
            }
            prev = Some(current);
            cursor = arena[current].bucket_next;
        }
        debug_assert!(false, "entry {index} missing from its bucket chain");
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|bucket| *bucket = None);
    }

    fn lookup_index(&self, arena: &Arena, bucket: usize, index: EntryIndex) -> Option<EntryIndex> {
        let mut cursor = self.buckets[bucket];
        while let Some(current) = cursor {
            if current == index {
                return Some(current);
            }
            cursor = arena[current].bucket_next;
        }
        None
    }
}
