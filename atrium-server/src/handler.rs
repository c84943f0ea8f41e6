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

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::path::Path;

use atrium_cache::ObjectCache;
use bytes::Bytes;

#[cfg(target_os = "linux")]
use crate::config::SENDFILE_THRESHOLD;
use crate::{
    config::{BUFFER_SIZE, MAX_CACHE_ITEM_SIZE},
    mime,
    response::{self, HttpError},
    stats::ServerStats,
};

const METHOD_CAP: usize = 15;
const PATH_CAP: usize = 255;
const PROTOCOL_CAP: usize = 15;

/// Serve one request on a worker thread.
///
/// The worker owns the socket from here on; it closes when the stream drops
/// at the end of this function, whatever path was taken.
pub(crate) fn serve(
    mut stream: TcpStream,
    document_root: &Path,
    cache: &ObjectCache,
    stats: &ServerStats,
) {
    let mut buffer = [0u8; BUFFER_SIZE];
    let read = loop {
        match stream.read(&mut buffer[..BUFFER_SIZE - 1]) {
            Ok(0) => return,
            Ok(read) => break read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::debug!(%error, "request read failed");
                return;
            }
        }
    };
    stats.record_request();

    if let Err(error) = respond(&mut stream, &buffer[..read], document_root, cache, stats) {
        let _ = write_fully(&mut stream, &response::error_response(error));
    }
}

fn respond(
    stream: &mut TcpStream,
    request: &[u8],
    document_root: &Path,
    cache: &ObjectCache,
    stats: &ServerStats,
) -> Result<(), HttpError> {
    let (method, path) = parse_request_line(request)?;

    if !method.eq_ignore_ascii_case("GET") {
        return Err(HttpError::NotImplemented);
    }
    if path.contains("..") {
        return Err(HttpError::Forbidden);
    }

    let filepath = if path == "/" {
        format!("{}/index.html", document_root.display())
    } else {
        format!("{}{}", document_root.display(), path)
    };

    if let Some(cached) = cache.get(&filepath) {
        stats.record_cache_hit();
        tracing::debug!(path = %filepath, "cache hit");
        let headers = response::success_headers(mime::content_type(&filepath), cached.size() as u64);
        if write_fully(stream, &headers).is_ok() {
            let _ = write_fully(stream, cached.data());
        }
        return Ok(());
    }
    tracing::debug!(path = %filepath, "cache miss");

    let mut file = File::open(&filepath).map_err(|_| HttpError::NotFound)?;
    let metadata = file.metadata().map_err(|_| HttpError::Internal)?;
    let size = metadata.len();

    if (size as usize) < MAX_CACHE_ITEM_SIZE {
        let mut contents = Vec::with_capacity(size as usize);
        file.read_to_end(&mut contents)
            .map_err(|_| HttpError::Internal)?;
        let data = Bytes::from(contents);
        if let Err(error) = cache.insert(filepath.clone(), data.clone()) {
            tracing::debug!(%error, path = %filepath, "response not cached");
        }
        let headers = response::success_headers(mime::content_type(&filepath), data.len() as u64);
        if write_fully(stream, &headers).is_ok() {
            let _ = write_fully(stream, &data);
        }
    } else {
        // Too big for the cache: stream it straight from disk.
        let headers = response::success_headers(mime::content_type(&filepath), size);
        if write_fully(stream, &headers).is_ok() {
            if let Err(error) = send_file(stream, &file, size, stats) {
                tracing::debug!(%error, path = %filepath, "file transfer failed");
            }
        }
    }
    Ok(())
}

/// First request line as (method, path), validated against the token caps.
fn parse_request_line(request: &[u8]) -> Result<(&str, &str), HttpError> {
    let line_end = request
        .iter()
        .position(|&byte| byte == b'\r' || byte == b'\n')
        .unwrap_or(request.len());
    let line = std::str::from_utf8(&request[..line_end]).map_err(|_| HttpError::BadRequest)?;

    let mut tokens = line.split_whitespace();
    let method = tokens.next().ok_or(HttpError::BadRequest)?;
    let path = tokens.next().ok_or(HttpError::BadRequest)?;
    let protocol = tokens.next().ok_or(HttpError::BadRequest)?;

    if method.len() > METHOD_CAP || path.len() > PATH_CAP || protocol.len() > PROTOCOL_CAP {
        return Err(HttpError::BadRequest);
    }
    Ok((method, path))
}

/// Write the whole buffer, riding out `EINTR` and short writes on the
/// non-blocking socket.
fn write_fully(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => buf = &buf[written..],
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => wait_writable(stream)?,
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn wait_writable(stream: &TcpStream) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd: stream.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

/// Zero-copy transfer for files past the threshold.
#[cfg(target_os = "linux")]
fn send_file(stream: &mut TcpStream, file: &File, size: u64, stats: &ServerStats) -> io::Result<()> {
    if size <= SENDFILE_THRESHOLD {
        return copy_file(stream, file);
    }
    let mut offset: libc::off_t = 0;
    while (offset as u64) < size {
        let remaining = (size - offset as u64) as usize;
        let sent = unsafe {
            libc::sendfile(stream.as_raw_fd(), file.as_raw_fd(), &mut offset, remaining)
        };
        if sent < 0 {
            let error = io::Error::last_os_error();
            match error.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    wait_writable(stream)?;
                    continue;
                }
                _ => return Err(error),
            }
        }
        if sent == 0 {
            break;
        }
    }
    stats.record_sendfile();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_file(stream: &mut TcpStream, file: &File, _size: u64, _stats: &ServerStats) -> io::Result<()> {
    copy_file(stream, file)
}

fn copy_file(stream: &mut TcpStream, mut file: &File) -> io::Result<()> {
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            return Ok(());
        }
        write_fully(stream, &chunk[..read])?;
    }
}
