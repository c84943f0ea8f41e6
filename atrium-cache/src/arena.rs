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

use std::ops;

use bytes::Bytes;

/// Stable handle into the [`Arena`]. Indices stay valid until the slot they
/// name is removed; freed slots are recycled for later insertions.
pub(crate) type EntryIndex = usize;

/// A single cached object together with its intrusive links.
///
/// `prev`/`next` thread the entry into the container-wide ordering list,
/// `bucket_next` into its hash-bucket chain. The links are plain arena
/// indices, never pointers.
#[derive(Debug)]
pub(crate) struct Entry {
    pub key: String,
    pub data: Bytes,
    pub size: usize,
    /// Wall-clock seconds of the last access. Observability only; the
    /// eviction order is maintained structurally in the ordering list.
    pub last_access: u64,
    pub frequency: u64,
    pub prev: Option<EntryIndex>,
    pub next: Option<EntryIndex>,
    pub bucket_next: Option<EntryIndex>,
}

impl Entry {
    pub fn new(key: String, data: Bytes, last_access: u64) -> Self {
        let size = data.len();
        Self {
            key,
            data,
            size,
            last_access,
            frequency: 1,
            prev: None,
            next: None,
            bucket_next: None,
        }
    }
}

/// Slab arena holding every live cache entry.
///
/// Removal leaves a vacant slot on a free list so later insertions reuse it,
/// keeping indices stable for the intrusive lists built on top.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Option<Entry>>,
    free: Vec<EntryIndex>,
    len: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: Entry) -> EntryIndex {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index].is_none());
                self.slots[index] = Some(entry);
                index
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, index: EntryIndex) -> Entry {
        match self.slots[index].take() {
            Some(entry) => {
                self.len -= 1;
                self.free.push(index);
                entry
            }
            None => panic!("removed vacant arena slot {index}"),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}

impl ops::Index<EntryIndex> for Arena {
    type Output = Entry;

    fn index(&self, index: EntryIndex) -> &Entry {
        match &self.slots[index] {
            Some(entry) => entry,
            None => panic!("indexed vacant arena slot {index}"),
        }
    }
}

impl ops::IndexMut<EntryIndex> for Arena {
    fn index_mut(&mut self, index: EntryIndex) -> &mut Entry {
        match &mut self.slots[index] {
            Some(entry) => entry,
            None => panic!("indexed vacant arena slot {index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> Entry {
        Entry::new(key.to_string(), Bytes::from_static(b"x"), 0)
    }

    #[test]
    fn test_slot_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(entry("a"));
        let b = arena.insert(entry("b"));
        assert_eq!(arena.len(), 2);

        let removed = arena.remove(a);
        assert_eq!(removed.key, "a");
        assert_eq!(arena.len(), 1);

        // The freed slot is recycled and `b` is untouched.
        let c = arena.insert(entry("c"));
        assert_eq!(c, a);
        assert_eq!(arena[b].key, "b");
        assert_eq!(arena[c].key, "c");
    }

    #[test]
    #[should_panic(expected = "vacant arena slot")]
    fn test_vacant_index_panics() {
        let mut arena = Arena::new();
        let a = arena.insert(entry("a"));
        arena.remove(a);
        let _ = &arena[a];
    }
}
