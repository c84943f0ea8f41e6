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

use std::path::PathBuf;

use atrium_cache::EvictionPolicy;

/// Hard capacity of the object cache, in bytes.
pub const MAX_CACHE_SIZE: usize = 100 * 1024 * 1024;

/// Largest file admitted into the cache. Bigger files are served straight
/// from disk.
pub const MAX_CACHE_ITEM_SIZE: usize = 10 * 1024 * 1024;

/// Request-read buffer size.
pub const BUFFER_SIZE: usize = 8196;

/// Readiness batch handed back by one `epoll_wait`.
pub const MAX_EVENTS: usize = 1024;

/// Listen backlog.
pub const BACKLOG_SIZE: i32 = 128;

/// Default worker-thread count.
pub const DEFAULT_WORKERS: usize = 8;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 16;

/// Soft cap on the task queue; beyond it submissions are logged, not
/// rejected.
pub const MAX_QUEUE: usize = 256;

/// Files above this size are sent with zero-copy transfer where available.
pub const SENDFILE_THRESHOLD: u64 = 4096;

pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_DOCUMENT_ROOT: &str = "./www";

/// Runtime options carried from the command line into the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub document_root: PathBuf,
    pub policy: EvictionPolicy,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            document_root: PathBuf::from(DEFAULT_DOCUMENT_ROOT),
            policy: EvictionPolicy::default(),
            workers: DEFAULT_WORKERS,
        }
    }
}
