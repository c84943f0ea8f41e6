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

//! In-memory object cache for atrium.
//!
//! A size-bounded key→blob store whose entries live in a slab arena. Two
//! intrusive structures are threaded through the arena by index: a fixed
//! 1024-bucket hash table for lookup and a doubly-linked ordering list that
//! encodes the eviction preference. The discipline is LRU or LFU and can be
//! switched at runtime, which reorders the list in place.

mod arena;
mod cache;
mod error;
mod eviction;
mod indexer;
mod metrics;

pub use cache::{CachedObject, ObjectCache, ObjectCacheBuilder};
pub use error::{CacheError, ParsePolicyError, Result};
pub use eviction::EvictionPolicy;
pub use indexer::HASH_TABLE_SIZE;
pub use metrics::Metrics;
