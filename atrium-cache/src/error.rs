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

use thiserror::Error;

/// Error type for cache operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,
    #[error("cache value must not be empty")]
    EmptyValue,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Error returned when parsing an eviction policy from a string fails.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown eviction policy: {0:?} (expected \"lru\" or \"lfu\")")]
pub struct ParsePolicyError(pub(crate) String);
