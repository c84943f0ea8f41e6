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

use std::fmt;
use std::str::FromStr;

use crate::arena::{Arena, EntryIndex};
use crate::error::ParsePolicyError;

/// Eviction discipline of the object cache, switchable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least recently used: any touch moves the entry to the head of the
    /// ordering list; the tail is the next victim.
    #[default]
    Lru,
    /// Least frequently used: the ordering list stays sorted by access
    /// frequency, descending; the tail is the next victim.
    Lfu,
}

impl EvictionPolicy {
    /// The other policy; used by the runtime switch.
    pub fn toggled(self) -> Self {
        match self {
            Self::Lru => Self::Lfu,
            Self::Lfu => Self::Lru,
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lru => write!(f, "lru"),
            Self::Lfu => write!(f, "lfu"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("lru") {
            Ok(Self::Lru)
        } else if s.eq_ignore_ascii_case("lfu") {
            Ok(Self::Lfu)
        } else {
            Err(ParsePolicyError(s.to_string()))
        }
    }
}

/// The container-wide ordering list: an intrusive doubly-linked list threaded
/// through the arena via each entry's `prev`/`next` indices.
///
/// Head is the entry most preferred to keep, tail is the next eviction
/// victim. The placement rule on attach is the only point where the two
/// policies differ.
#[derive(Debug, Default)]
pub(crate) struct OrderList {
    head: Option<EntryIndex>,
    tail: Option<EntryIndex>,
}

impl OrderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tail(&self) -> Option<EntryIndex> {
        self.tail
    }

    /// Attach a detached entry at the position the policy dictates.
    pub fn attach(&mut self, arena: &mut Arena, policy: EvictionPolicy, index: EntryIndex) {
        debug_assert!(arena[index].prev.is_none() && arena[index].next.is_none());
        match policy {
            EvictionPolicy::Lru => self.push_head(arena, index),
            EvictionPolicy::Lfu => self.insert_by_frequency(arena, index),
        }
    }

    /// Unlink an entry from the list, leaving its links cleared.
    pub fn unlink(&mut self, arena: &mut Arena, index: EntryIndex) {
        let prev = arena[index].prev.take();
        let next = arena[index].next.take();
        match prev {
            Some(prev) => arena[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena[next].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Unlink and return the tail, if any.
    pub fn pop_tail(&mut self, arena: &mut Arena) -> Option<EntryIndex> {
        let tail = self.tail?;
        self.unlink(arena, tail);
        Some(tail)
    }

    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
    }

    /// Entry indices in head→tail order.
    pub fn iter<'a>(&self, arena: &'a Arena) -> OrderIter<'a> {
        OrderIter {
            arena,
            cursor: self.head,
        }
    }

    fn push_head(&mut self, arena: &mut Arena, index: EntryIndex) {
        arena[index].next = self.head;
        if let Some(head) = self.head {
            arena[head].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    /// Place an entry after the last entry whose frequency is strictly
    /// greater, so that among equal frequencies the most recently touched
    /// entry sits closest to the head.
    fn insert_by_frequency(&mut self, arena: &mut Arena, index: EntryIndex) {
        let frequency = arena[index].frequency;
        let mut anchor: Option<EntryIndex> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if arena[current].frequency > frequency {
                anchor = Some(current);
                cursor = arena[current].next;
            } else {
                break;
            }
        }
        match anchor {
            None => self.push_head(arena, index),
            Some(anchor) => self.insert_after(arena, anchor, index),
        }
    }

    fn insert_after(&mut self, arena: &mut Arena, anchor: EntryIndex, index: EntryIndex) {
        let next = arena[anchor].next;
        arena[index].prev = Some(anchor);
        arena[index].next = next;
        arena[anchor].next = Some(index);
        match next {
            Some(next) => arena[next].prev = Some(index),
            None => self.tail = Some(index),
        }
    }
}

/// Iterator over the ordering list in head→tail order.
pub(crate) struct OrderIter<'a> {
    arena: &'a Arena,
    cursor: Option<EntryIndex>,
}

impl Iterator for OrderIter<'_> {
    type Item = EntryIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.arena[current].next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use itertools::Itertools;

    use super::*;
    use crate::arena::Entry;

    fn entry(key: &str, frequency: u64) -> Entry {
        let mut entry = Entry::new(key.to_string(), Bytes::from_static(b"v"), 0);
        entry.frequency = frequency;
        entry
    }

    fn keys(list: &OrderList, arena: &Arena) -> Vec<String> {
        list.iter(arena)
            .map(|index| arena[index].key.clone())
            .collect_vec()
    }

    #[test]
    fn test_lru_attach_pushes_head() {
        let mut arena = Arena::new();
        let mut list = OrderList::new();

        for key in ["a", "b", "c"] {
            let index = arena.insert(entry(key, 1));
            list.attach(&mut arena, EvictionPolicy::Lru, index);
        }
        assert_eq!(keys(&list, &arena), ["c", "b", "a"]);
        assert_eq!(list.tail().map(|index| arena[index].key.clone()), Some("a".to_string()));
    }

    #[test]
    fn test_unlink_middle_and_ends() {
        let mut arena = Arena::new();
        let mut list = OrderList::new();

        let indices = ["a", "b", "c"]
            .map(|key| {
                let index = arena.insert(entry(key, 1));
                list.attach(&mut arena, EvictionPolicy::Lru, index);
                index
            });

        // List is [c, b, a]; drop the middle, then both ends.
        list.unlink(&mut arena, indices[1]);
        assert_eq!(keys(&list, &arena), ["c", "a"]);
        list.unlink(&mut arena, indices[2]);
        assert_eq!(keys(&list, &arena), ["a"]);
        list.unlink(&mut arena, indices[0]);
        assert!(keys(&list, &arena).is_empty());
        assert_eq!(list.tail(), None);
    }

    #[test]
    fn test_pop_tail_order() {
        let mut arena = Arena::new();
        let mut list = OrderList::new();

        for key in ["a", "b", "c"] {
            let index = arena.insert(entry(key, 1));
            list.attach(&mut arena, EvictionPolicy::Lru, index);
        }

        let mut popped = Vec::new();
        while let Some(index) = list.pop_tail(&mut arena) {
            popped.push(arena[index].key.clone());
        }
        assert_eq!(popped, ["a", "b", "c"]);
    }

    #[test]
    fn test_frequency_placement_sorts_descending() {
        let mut arena = Arena::new();
        let mut list = OrderList::new();

        for (key, frequency) in [("a", 3), ("b", 1), ("c", 2)] {
            let index = arena.insert(entry(key, frequency));
            list.attach(&mut arena, EvictionPolicy::Lfu, index);
        }
        assert_eq!(keys(&list, &arena), ["a", "c", "b"]);
    }

    #[test]
    fn test_frequency_ties_favor_latest_attach() {
        let mut arena = Arena::new();
        let mut list = OrderList::new();

        for key in ["a", "b", "c"] {
            let index = arena.insert(entry(key, 1));
            list.attach(&mut arena, EvictionPolicy::Lfu, index);
        }
        // Equal frequencies: every newcomer lands ahead of its peers.
        assert_eq!(keys(&list, &arena), ["c", "b", "a"]);
    }

    #[test]
    fn test_policy_parse_round_trip() {
        assert_eq!("lru".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!("LFU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lfu));
        assert!("arc".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::Lru.to_string(), "lru");
        assert_eq!(EvictionPolicy::Lru.toggled(), EvictionPolicy::Lfu);
    }
}
