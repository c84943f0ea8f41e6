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

//! The serving side of atrium: a single-threaded epoll acceptor feeding a
//! bounded worker pool, whose workers answer one request per connection from
//! the object cache or from disk.

pub mod config;
mod error;
mod handler;
pub mod mime;
pub mod pool;
pub mod reactor;
pub mod response;
pub mod stats;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use pool::WorkerPool;
pub use reactor::{Control, EventLoop};
pub use stats::{ServerStats, StatsSnapshot};
