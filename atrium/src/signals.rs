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

//! Signal-driven runtime control.
//!
//! `SIGINT`/`SIGTERM` request shutdown, `SIGUSR1` switches the cache
//! eviction policy in place, `SIGUSR2` asks for a status report. The
//! handler only stores an atomic flag and writes the event loop's waker,
//! both async-signal-safe.

use std::io;

/// Invoked in signal context; keep to the async-signal-safe surface.
extern "C" fn handle_signal(signal: libc::c_int) {
    match signal {
        libc::SIGINT | libc::SIGTERM => crate::CONTROL.request_shutdown(),
        libc::SIGUSR1 => crate::CONTROL.request_policy_switch(),
        libc::SIGUSR2 => crate::CONTROL.request_status_report(),
        _ => {}
    }
}

pub fn install() -> io::Result<()> {
    for signal in [libc::SIGINT, libc::SIGTERM, libc::SIGUSR1, libc::SIGUSR2] {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int) = handle_signal;
            action.sa_sigaction = handler as usize;
            // No SA_RESTART: a signal must interrupt epoll_wait.
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
