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
use std::sync::Arc;

use anyhow::Context;
use bytesize::ByteSize;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use atrium_cache::{EvictionPolicy, ObjectCache};
use atrium_server::{
    config::{DEFAULT_DOCUMENT_ROOT, DEFAULT_PORT, DEFAULT_WORKERS, MAX_CACHE_SIZE},
    Control, EventLoop, ServerConfig, ServerStats, WorkerPool,
};

mod signals;

/// Pending control requests, shared with the signal handlers.
static CONTROL: Control = Control::new();

#[derive(Debug, Parser)]
#[command(
    name = "atrium",
    version,
    about = "Static-content web server with a concurrent in-memory object cache"
)]
struct Args {
    /// Server port.
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    port: u16,

    /// Document root directory.
    #[arg(short = 'd', long = "dir", default_value = DEFAULT_DOCUMENT_ROOT)]
    dir: PathBuf,

    /// Cache eviction algorithm: lru or lfu.
    #[arg(short, long, default_value_t = EvictionPolicy::Lru)]
    algorithm: EvictionPolicy,
}

fn main() -> anyhow::Result<()> {
    // Help and version go to stdout and exit 0; bad arguments exit 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            std::process::exit(if error.use_stderr() { 1 } else { 0 });
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if !args.dir.is_dir() {
        anyhow::bail!("document root does not exist: {}", args.dir.display());
    }

    let config = ServerConfig {
        port: args.port,
        document_root: args.dir,
        policy: args.algorithm,
        workers: DEFAULT_WORKERS,
    };

    tracing::info!(
        port = config.port,
        root = %config.document_root.display(),
        policy = %config.policy,
        cache_capacity = %ByteSize::b(MAX_CACHE_SIZE as u64),
        workers = config.workers,
        "starting atrium"
    );

    let cache = Arc::new(
        ObjectCache::builder(MAX_CACHE_SIZE)
            .with_policy(config.policy)
            .build(),
    );
    let stats = Arc::new(ServerStats::new());
    let pool = Arc::new(WorkerPool::new(config.workers).context("failed to start worker pool")?);

    let mut event_loop = EventLoop::new(&config, cache.clone(), pool.clone(), stats.clone(), &CONTROL)
        .context("failed to start event loop")?;

    signals::install().context("failed to install signal handlers")?;
    tracing::info!("SIGINT/SIGTERM shut down, SIGUSR1 switches the eviction policy, SIGUSR2 reports status");

    let outcome = event_loop.run(&CONTROL);
    drop(event_loop);
    pool.shutdown();

    let snapshot = stats.snapshot();
    tracing::info!(
        uptime_secs = snapshot.uptime.as_secs(),
        total_requests = snapshot.total_requests,
        cache_hits = snapshot.cache_hits,
        hit_rate = %format_args!("{:.2}%", snapshot.hit_rate()),
        qps = %format_args!("{:.2}", snapshot.qps()),
        sendfile_used = snapshot.sendfile_used,
        cache_usage = %ByteSize::b(cache.usage() as u64),
        cache_entries = cache.len(),
        "server stopped"
    );

    outcome.context("event loop failed")?;
    Ok(())
}
