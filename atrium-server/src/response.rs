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

use std::time::SystemTime;

pub const SERVER_NAME: &str = "MyWebServer/1.0";

/// Error outcomes a request can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
    NotImplemented,
}

impl HttpError {
    pub fn status(self) -> (u16, &'static str) {
        match self {
            Self::BadRequest => (400, "Bad Request"),
            Self::Forbidden => (403, "Forbidden"),
            Self::NotFound => (404, "Not Found"),
            Self::Internal => (500, "Internal Server Error"),
            Self::NotImplemented => (501, "Not Implemented"),
        }
    }
}

/// Complete error response, headers and HTML body in one buffer.
pub fn error_response(error: HttpError) -> Vec<u8> {
    let (code, reason) = error.status();
    format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: text/html\r\n\
         Connection: close\r\n\
         \r\n\
         <html><body><h1>{code} {reason}</h1></body></html>"
    )
    .into_bytes()
}

/// Header block of a 200 response; the body follows separately.
///
/// `Connection: keep-alive` is advertised for parity with the wire format of
/// the original server, but the handler still closes after one response.
pub fn success_headers(content_type: &str, content_length: u64) -> Vec<u8> {
    let date = httpdate::fmt_http_date(SystemTime::now());
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Connection: keep-alive\r\n\
         Date: {date}\r\n\
         Server: {SERVER_NAME}\r\n\
         \r\n"
    )
    .into_bytes()
}
