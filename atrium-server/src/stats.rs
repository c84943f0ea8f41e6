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

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotone request counters shared by every worker.
///
/// Observational only; relaxed ordering, no consistency with any single
/// request's completion.
#[derive(Debug)]
pub struct ServerStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    sendfile_used: AtomicU64,
    started_at: Instant,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            sendfile_used: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sendfile(&self) {
        self.sendfile_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn sendfile_used(&self) -> u64 {
        self.sendfile_used.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests(),
            cache_hits: self.cache_hits(),
            sendfile_used: self.sendfile_used(),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Point-in-time view of the counters with derived rates.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub sendfile_used: u64,
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Cache hits as a share of all requests, in percent.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64 * 100.0
        }
    }

    pub fn qps(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds > 0.0 {
            self.total_requests as f64 / seconds
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = ServerStats::new();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);

        stats.record_request();
        stats.record_request();
        stats.record_cache_hit();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert!((snapshot.hit_rate() - 50.0).abs() < f64::EPSILON);
    }
}
