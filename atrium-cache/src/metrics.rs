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

use std::sync::atomic::AtomicUsize;

/// Operation counters for the cache.
///
/// Purely observational; updated with relaxed ordering and not synchronized
/// with any particular operation's completion.
#[derive(Debug, Default)]
pub struct Metrics {
    pub hit: AtomicUsize,
    pub miss: AtomicUsize,
    pub insert: AtomicUsize,
    pub replace: AtomicUsize,
    pub evict: AtomicUsize,
    pub remove: AtomicUsize,
}
