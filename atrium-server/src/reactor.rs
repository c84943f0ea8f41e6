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

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicI32, Ordering},
    Arc,
};

use atrium_cache::ObjectCache;
use hashbrown::HashMap;

use crate::{
    config::{ServerConfig, BACKLOG_SIZE, MAX_EVENTS},
    error::Result,
    handler,
    pool::WorkerPool,
    stats::ServerStats,
};

/// Out-of-band requests delivered to the event loop.
///
/// Every setter is async-signal-safe (an atomic store plus a `write` on the
/// bound eventfd), so signal handlers can drive the loop directly. The loop
/// consumes the flags after each readiness batch.
#[derive(Debug)]
pub struct Control {
    shutdown: AtomicBool,
    switch_policy: AtomicBool,
    report_status: AtomicBool,
    waker: AtomicI32,
}

impl Control {
    pub const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            switch_policy: AtomicBool::new(false),
            report_status: AtomicBool::new(false),
            waker: AtomicI32::new(-1),
        }
    }

    /// Ask the loop to exit; in-flight tasks still run to completion.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake();
    }

    /// Ask the loop to toggle the cache eviction policy.
    pub fn request_policy_switch(&self) {
        self.switch_policy.store(true, Ordering::Release);
        self.wake();
    }

    /// Ask the loop to log a status report.
    pub fn request_status_report(&self) {
        self.report_status.store(true, Ordering::Release);
        self.wake();
    }

    fn bind_waker(&self, fd: RawFd) {
        self.waker.store(fd, Ordering::Release);
    }

    fn wake(&self) {
        let fd = self.waker.load(Ordering::Acquire);
        if fd >= 0 {
            let token: u64 = 1;
            unsafe {
                libc::write(fd, std::ptr::addr_of!(token).cast(), 8);
            }
        }
    }

    fn take_shutdown(&self) -> bool {
        self.shutdown.swap(false, Ordering::AcqRel)
    }

    fn take_policy_switch(&self) -> bool {
        self.switch_policy.swap(false, Ordering::AcqRel)
    }

    fn take_status_report(&self) -> bool {
        self.report_status.swap(false, Ordering::AcqRel)
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

/// Thin wrapper over an epoll instance.
struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn add(&self, fd: RawFd, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until at least one registered fd is ready.
    fn wait(&self, events: &mut [libc::epoll_event]) -> io::Result<usize> {
        let ready = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                -1,
            )
        };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ready as usize)
    }
}

fn set_socket_option(fd: RawFd, option: libc::c_int) -> io::Result<()> {
    let value: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Create the listening socket: reuse options, bind, listen, non-blocking.
fn create_listener(port: u16) -> io::Result<TcpListener> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // From here the fd is owned and closed on any early return.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    set_socket_option(socket.as_raw_fd(), libc::SO_REUSEADDR)?;
    set_socket_option(socket.as_raw_fd(), libc::SO_REUSEPORT)?;

    let address = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY,
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::addr_of!(address).cast(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::listen(socket.as_raw_fd(), BACKLOG_SIZE) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let listener = TcpListener::from(socket);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn create_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Single-threaded readiness loop owning the listening socket and every
/// accepted-but-undispatched client socket.
///
/// The listening fd is level-triggered (one `accept` per notification, the
/// kernel re-notifies while the backlog is non-empty); client fds are
/// edge-triggered and deregistered before their socket is handed to a
/// worker, so a fd can never reach two workers.
pub struct EventLoop {
    epoll: Epoll,
    listener: TcpListener,
    waker: OwnedFd,
    clients: HashMap<RawFd, TcpStream>,

    pool: Arc<WorkerPool>,
    cache: Arc<ObjectCache>,
    stats: Arc<ServerStats>,
    document_root: Arc<PathBuf>,
}

impl EventLoop {
    pub fn new(
        config: &ServerConfig,
        cache: Arc<ObjectCache>,
        pool: Arc<WorkerPool>,
        stats: Arc<ServerStats>,
        control: &Control,
    ) -> Result<Self> {
        let listener = create_listener(config.port)?;
        let epoll = Epoll::new()?;
        epoll.add(listener.as_raw_fd(), libc::EPOLLIN as u32)?;

        let waker = create_eventfd()?;
        epoll.add(waker.as_raw_fd(), libc::EPOLLIN as u32)?;
        control.bind_waker(waker.as_raw_fd());

        tracing::info!(
            addr = %listener.local_addr()?,
            root = %config.document_root.display(),
            "listening"
        );

        Ok(Self {
            epoll,
            listener,
            waker,
            clients: HashMap::new(),
            pool,
            cache,
            stats,
            document_root: Arc::new(config.document_root.clone()),
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until a shutdown request or a fatal readiness error.
    pub fn run(&mut self, control: &Control) -> Result<()> {
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        loop {
            let ready = match self.epoll.wait(&mut events) {
                Ok(ready) => ready,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                    tracing::debug!("readiness wait interrupted");
                    0
                }
                Err(error) => {
                    tracing::error!(%error, "readiness wait failed");
                    return Err(error.into());
                }
            };

            for event in events[..ready].iter().copied() {
                let fd = event.u64 as RawFd;
                if fd == self.listener.as_raw_fd() {
                    self.accept_client();
                } else if fd == self.waker.as_raw_fd() {
                    self.drain_waker();
                } else {
                    self.dispatch_client(fd);
                }
            }

            if self.handle_control(control) {
                return Ok(());
            }
        }
    }

    fn accept_client(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(error) = stream.set_nonblocking(true) {
                    tracing::warn!(%error, "failed to set client non-blocking");
                    return;
                }
                let fd = stream.as_raw_fd();
                if let Err(error) = self.epoll.add(fd, (libc::EPOLLIN | libc::EPOLLET) as u32) {
                    tracing::warn!(%error, "failed to register client");
                    return;
                }
                tracing::info!(%peer, "connection accepted");
                self.clients.insert(fd, stream);
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(error) => tracing::warn!(%error, "accept failed"),
        }
    }

    /// Hand a readable client to the pool.
    ///
    /// The fd leaves the interest set before the socket leaves this thread;
    /// otherwise the loop could queue a second task for a fd a worker is
    /// already reading from, racing `read` against `close`.
    fn dispatch_client(&mut self, fd: RawFd) {
        if let Err(error) = self.epoll.delete(fd) {
            tracing::warn!(fd, %error, "failed to deregister client");
        }
        let Some(stream) = self.clients.remove(&fd) else {
            tracing::debug!(fd, "client vanished before dispatch");
            return;
        };

        let cache = self.cache.clone();
        let stats = self.stats.clone();
        let document_root = self.document_root.clone();
        let task = Box::new(move || {
            handler::serve(stream, &document_root, &cache, &stats);
        });
        if let Err(error) = self.pool.submit(task) {
            // Dropping the task closed the socket.
            tracing::warn!(%error, "failed to submit client task");
        }
    }

    fn drain_waker(&self) {
        let mut token = [0u8; 8];
        loop {
            let read = unsafe {
                libc::read(self.waker.as_raw_fd(), token.as_mut_ptr().cast(), token.len())
            };
            if read <= 0 {
                break;
            }
        }
    }

    /// Apply pending control requests; returns true on shutdown.
    fn handle_control(&self, control: &Control) -> bool {
        if control.take_policy_switch() {
            let policy = self.cache.policy().toggled();
            self.cache.set_policy(policy);
            tracing::info!(%policy, "eviction policy switched");
        }
        if control.take_status_report() {
            let snapshot = self.stats.snapshot();
            tracing::info!(
                uptime_secs = snapshot.uptime.as_secs(),
                total_requests = snapshot.total_requests,
                cache_hits = snapshot.cache_hits,
                hit_rate = %format_args!("{:.2}%", snapshot.hit_rate()),
                sendfile_used = snapshot.sendfile_used,
                cache_usage = self.cache.usage(),
                cache_entries = self.cache.len(),
                policy = %self.cache.policy(),
                "status report"
            );
        }
        if control.take_shutdown() {
            tracing::info!("event loop stopping");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flags_are_consumed() {
        let control = Control::new();
        assert!(!control.take_shutdown());

        control.request_shutdown();
        control.request_policy_switch();
        control.request_status_report();

        assert!(control.take_shutdown());
        assert!(!control.take_shutdown());
        assert!(control.take_policy_switch());
        assert!(control.take_status_report());
    }

    #[test]
    fn test_listener_binds_ephemeral_port() {
        let listener = create_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_waker_wakes_epoll() {
        let epoll = Epoll::new().unwrap();
        let waker = create_eventfd().unwrap();
        epoll.add(waker.as_raw_fd(), libc::EPOLLIN as u32).unwrap();

        let control = Control::new();
        control.bind_waker(waker.as_raw_fd());
        control.request_shutdown();

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 4];
        let ready = epoll.wait(&mut events).unwrap();
        assert_eq!(ready, 1);
        assert_eq!(events[0].u64 as RawFd, waker.as_raw_fd());
        assert!(control.take_shutdown());
    }
}
