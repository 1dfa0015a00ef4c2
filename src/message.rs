//! The `Request`/`Response` data model shared by `http1` and `http2`.
//!
//! Grounded on `request`/`response` in `original_source/cpp-http/common.hpp`:
//! a flat struct over an unordered, case-insensitive header map, plus a
//! `stringify()` that writes the exact wire format `http1` parses back —
//! request-line/status-line, `key: value\r\n` per header, a blank line,
//! then the body with a trailing `\r\n\r\n` appended only when the body
//! is non-empty (a quirk of the original wire format, not of HTTP/1
//! itself, but one `fetch` and the parser must agree on byte-for-byte).
//!
//! Unlike `runtime::http::Header` (a linear-scan `Vec`),
//! headers here are a case-insensitive-keyed map with last-write-wins
//! semantics, matching `unordered_map<string,string>` in the original.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::url::Url;

/// Case-insensitive-keyed headers. Names are stored lower-cased; a
/// second `insert` under any casing of the same name overwrites the
/// first, matching `request::headers[name] = value` in the original.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An HTTP request. `method` and `url` default to `GET` and `/`, since
/// `fetch` callers usually only have a reason to override the body and
/// a couple of headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub version: (u16, u16),
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            version: (1, 1),
            method: "GET".to_string(),
            url: Url::default(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

impl Request {
    pub fn new(method: impl Into<String>, url: Url, body: Vec<u8>) -> Self {
        Self { method: method.into(), url, body, ..Default::default() }
    }

    /// The wire form `http1::RequestParser` parses back. The request
    /// target is rendered with the authority stripped — `fetch` already
    /// has the host in the `Host` header, and a non-proxy request-target
    /// never carries one.
    pub fn stringify(&self) -> Vec<u8> {
        let mut out = String::new();
        let _ = write!(out, "{} {} HTTP/{}.{}\r\n", self.method, self.url.fullpath(), self.version.0, self.version.1);
        for (name, value) in self.headers.iter() {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        if !self.body.is_empty() {
            bytes.extend_from_slice(b"\r\n\r\n");
        }
        bytes
    }
}

/// An HTTP response. `status` defaults to `-1`, the sentinel the
/// original uses for "not yet received a status line".
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub version: (u16, u16),
    pub status: i32,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Set if the peer asked to switch protocols — `http1` treats this
    /// as a fatal parse error rather than completing the message.
    pub upgrade: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            version: (1, 1),
            status: -1,
            reason: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            upgrade: false,
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn stringify(&self) -> Vec<u8> {
        let mut out = String::new();
        let _ = write!(out, "HTTP/{}.{} {} {}\r\n", self.version.0, self.version.1, self.status, self.reason);
        for (name, value) in self.headers.iter() {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        if !self.body.is_empty() {
            bytes.extend_from_slice(b"\r\n\r\n");
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_stringify_strips_authority_and_trails_body() {
        let mut request = Request::new("POST", Url::parse("http://example.com/a?b=1").unwrap(), b"hi".to_vec());
        request.headers.insert("Content-Length", "2");
        let wire = request.stringify();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("POST /a?b=1 HTTP/1.1\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi\r\n\r\n"));
    }

    #[test]
    fn empty_body_gets_no_trailer() {
        let request = Request::new("GET", Url::parse("http://example.com/").unwrap(), Vec::new());
        let text = String::from_utf8(request.stringify()).unwrap();
        assert!(text.ends_with("HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn headers_are_case_insensitive_and_last_write_wins() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("content-type", "application/json");
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn response_default_status_is_sentinel() {
        let response = Response::default();
        assert_eq!(response.status, -1);
        assert!(!response.is_success());
    }
}
