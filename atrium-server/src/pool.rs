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

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::config::{MAX_QUEUE, MAX_WORKERS};
use crate::error::{Result, ServerError};

/// A unit of work; owns everything it needs, including the client socket.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct TaskQueue {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<TaskQueue>,
    available: Condvar,
}

/// Bounded pool of worker threads consuming a FIFO task queue.
///
/// One mutex protects the queue and the shutdown flag; one condvar wakes
/// workers. `submit` signals a single waiter, `shutdown` broadcasts, joins
/// every worker and discards whatever was still queued.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads, clamped to `[1, MAX_WORKERS]`.
    ///
    /// If any spawn fails the partially built pool is torn down before the
    /// error is returned.
    pub fn new(workers: usize) -> Result<Self> {
        let worker_count = workers.clamp(1, MAX_WORKERS);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(TaskQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker_shared = shared.clone();
            match thread::Builder::new()
                .name(format!("atrium-worker-{id}"))
                .spawn(move || worker_loop(&worker_shared))
            {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    let pool = Self {
                        shared,
                        workers: Mutex::new(handles),
                        worker_count,
                    };
                    pool.shutdown();
                    return Err(ServerError::Spawn(source));
                }
            }
        }

        tracing::info!(workers = worker_count, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(handles),
            worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Append a task and wake one worker. Fails after shutdown.
    pub fn submit(&self, task: Task) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return Err(ServerError::PoolShutDown);
            }
            queue.tasks.push_back(task);
            if queue.tasks.len() > MAX_QUEUE {
                tracing::warn!(depth = queue.tasks.len(), "task queue beyond soft cap");
            }
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop accepting work, join every worker and drop what was still
    /// queued. Dropping a task drops the socket it owns, which closes the
    /// fd. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
        }
        self.shared.available.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }

        let discarded = {
            let mut queue = self.shared.queue.lock();
            std::mem::take(&mut queue.tasks)
        };
        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "discarded queued tasks");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            while queue.tasks.is_empty() && !queue.shutdown {
                shared.available.wait(&mut queue);
            }
            if queue.shutdown {
                return;
            }
            match queue.tasks.pop_front() {
                Some(task) => task,
                None => continue,
            }
        };
        task();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_every_task_runs_exactly_once() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert!(wait_for(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 100
        }));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        let result = pool.submit(Box::new(|| {}));
        assert!(matches!(result, Err(ServerError::PoolShutDown)));
    }

    #[test]
    fn test_shutdown_discards_queued_tasks() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // The first task parks the single worker; the rest pile up behind it.
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        {
            let gate = gate.clone();
            pool.submit(Box::new(move || {
                let (lock, condvar) = &*gate;
                let mut open = lock.lock();
                while !*open {
                    condvar.wait(&mut open);
                }
            }))
            .unwrap();
        }
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        // Release the worker only after the shutdown flag is set, so it
        // observes shutdown before it could pop another task.
        let gate_opener = {
            let gate = gate.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                let (lock, condvar) = &*gate;
                *lock.lock() = true;
                condvar.notify_all();
            })
        };
        pool.shutdown();
        gate_opener.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Nothing runs later either.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.worker_count(), 1);
        let pool = WorkerPool::new(100).unwrap();
        assert_eq!(pool.worker_count(), MAX_WORKERS);
        let pool = WorkerPool::new(8).unwrap();
        assert_eq!(pool.worker_count(), 8);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        pool.shutdown();
    }
}
