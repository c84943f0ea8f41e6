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

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use atrium_cache::{EvictionPolicy, ObjectCache};
use atrium_server::{
    config::MAX_CACHE_SIZE, Control, EventLoop, ServerConfig, ServerStats, WorkerPool,
};
use tempfile::TempDir;

const MB: usize = 1024 * 1024;

struct TestServer {
    addr: SocketAddr,
    control: Arc<Control>,
    cache: Arc<ObjectCache>,
    stats: Arc<ServerStats>,
    pool: Arc<WorkerPool>,
    loop_thread: Option<JoinHandle<()>>,
    root: TempDir,
}

impl TestServer {
    fn start(policy: EvictionPolicy) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), "<html>hello atrium</html>").unwrap();
        fs::write(root.path().join("style.css"), "body { margin: 0; }").unwrap();

        let config = ServerConfig {
            port: 0,
            document_root: root.path().to_path_buf(),
            policy,
            workers: 4,
        };
        let cache = Arc::new(
            ObjectCache::builder(MAX_CACHE_SIZE)
                .with_policy(policy)
                .build(),
        );
        let stats = Arc::new(ServerStats::new());
        let control = Arc::new(Control::new());
        let pool = Arc::new(WorkerPool::new(config.workers).unwrap());

        let mut event_loop = EventLoop::new(
            &config,
            cache.clone(),
            pool.clone(),
            stats.clone(),
            &control,
        )
        .unwrap();
        let addr = event_loop.local_addr().unwrap();
        let loop_control = control.clone();
        let loop_thread = std::thread::spawn(move || {
            event_loop.run(&loop_control).unwrap();
        });

        Self {
            addr,
            control,
            cache,
            stats,
            pool,
            loop_thread: Some(loop_thread),
            root,
        }
    }

    fn request_bytes(&self, raw: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    }

    fn request(&self, raw: &str) -> String {
        String::from_utf8_lossy(&self.request_bytes(raw)).into_owned()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.control.request_shutdown();
        if let Some(thread) = self.loop_thread.take() {
            let _ = thread.join();
        }
        self.pool.shutdown();
    }
}

fn body_of(response: &[u8]) -> &[u8] {
    let blank = response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("response has no header terminator");
    &response[blank + 4..]
}

#[test_log::test]
fn test_serves_index_for_root() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("GET / HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/html\r\n"));
    assert!(response.contains("Server: MyWebServer/1.0\r\n"));
    assert!(response.ends_with("<html>hello atrium</html>"));
}

#[test_log::test]
fn test_content_type_follows_suffix() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("GET /style.css HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/css\r\n"));
    assert!(response.ends_with("body { margin: 0; }"));
}

#[test_log::test]
fn test_path_traversal_denied() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("GET /../etc/passwd HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(response.contains("<h1>403 Forbidden</h1>"));
}

#[test_log::test]
fn test_missing_file_not_found() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("GET /nope.html HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.contains("<h1>404 Not Found</h1>"));
}

#[test_log::test]
fn test_non_get_not_implemented() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("POST /index.html HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
}

#[test_log::test]
fn test_malformed_request_line_rejected() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let response = server.request("GET\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test_log::test]
fn test_oversized_path_token_rejected() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let request = format!("GET /{} HTTP/1.0\r\n\r\n", "a".repeat(300));
    let response = server.request(&request);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test_log::test]
fn test_repeat_request_hits_cache() {
    let server = TestServer::start(EvictionPolicy::Lru);

    let first = server.request("GET /index.html HTTP/1.0\r\n\r\n");
    assert!(first.ends_with("<html>hello atrium</html>"));
    let second = server.request("GET /index.html HTTP/1.0\r\n\r\n");
    assert!(second.ends_with("<html>hello atrium</html>"));

    assert_eq!(server.stats.total_requests(), 2);
    assert_eq!(server.stats.cache_hits(), 1);
    assert!((server.stats.snapshot().hit_rate() - 50.0).abs() < f64::EPSILON);
    assert_eq!(server.cache.len(), 1);
}

#[test_log::test]
fn test_large_file_served_but_not_cached() {
    let server = TestServer::start(EvictionPolicy::Lru);
    let payload = vec![b'x'; 11 * MB];
    fs::write(server.root.path().join("big.bin"), &payload).unwrap();

    let response = server.request_bytes("GET /big.bin HTTP/1.0\r\n\r\n");
    let body = body_of(&response);
    assert_eq!(body.len(), payload.len());
    assert_eq!(body, payload.as_slice());

    assert_eq!(server.cache.len(), 0);
    #[cfg(target_os = "linux")]
    assert_eq!(server.stats.sendfile_used(), 1);
}

#[test_log::test]
fn test_concurrent_request_burst() {
    let server = Arc::new(TestServer::start(EvictionPolicy::Lru));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let server = server.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let response = server.request("GET /index.html HTTP/1.0\r\n\r\n");
                    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(server.stats.total_requests(), 40);
    // The first wave may race on the miss, but each thread's later requests
    // are guaranteed hits and only one entry can exist.
    assert!(server.stats.cache_hits() >= 32);
    assert_eq!(server.cache.len(), 1);
}

#[test_log::test]
fn test_policy_switch_request_is_applied() {
    let server = TestServer::start(EvictionPolicy::Lru);
    server.control.request_policy_switch();

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.cache.policy() != EvictionPolicy::Lfu {
        assert!(Instant::now() < deadline, "policy switch never applied");
        std::thread::sleep(Duration::from_millis(10));
    }
}
