//! URL parsing and stringification.
//!
//! Grounded on `http::url` in `original_source/cpp-http`'s `common.hpp`:
//! a flat `schema`/`host`/`port`/`path`/`query`/`fragment` struct with a
//! schema-aware default port and a `fullpath()` that concatenates
//! path, query and fragment. Two parse modes exist because the two
//! callers need different grammars — `http1`'s request-line tokenizer
//! only ever sees a request-target (no scheme, no authority), while
//! `fetch` always starts from an absolute URL.

use std::fmt;

use crate::error::{Error, Result};

/// A parsed URL, or the subset of one present in an HTTP/1 request-target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub schema: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

fn default_port(schema: &str) -> u16 {
    match schema {
        "https" | "wss" => 443,
        _ => 80,
    }
}

impl Default for Url {
    fn default() -> Self {
        Self {
            schema: "http".to_string(),
            host: String::new(),
            port: 80,
            path: "/".to_string(),
            query: String::new(),
            fragment: String::new(),
        }
    }
}

impl Url {
    /// Parses an absolute URL: `schema://host[:port][path][?query][#fragment]`.
    pub fn parse(s: &str) -> Result<Self> {
        let (schema, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::http_parse(format!("invalid url: missing schema in {s}")))?;
        let schema = schema.to_ascii_lowercase();

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let remainder = &rest[authority_end..];
        if authority.is_empty() {
            return Err(Error::http_parse(format!("invalid url: missing host in {s}")));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| Error::http_parse(format!("invalid url: bad port in {s}")))?;
                (h.to_string(), port)
            }
            _ => (authority.to_string(), default_port(&schema)),
        };

        let (path, query, fragment) = split_request_target(remainder);
        let path = if path.is_empty() { "/".to_string() } else { path };

        Ok(Self { schema, host, port, path, query, fragment })
    }

    /// Parses an HTTP/1 request-target: `path[?query][#fragment]`, with
    /// no scheme or authority. Used by the request-line tokenizer, which
    /// only ever sees this grammar (absolute-form proxy requests aren't
    /// supported).
    pub fn parse_request_target(s: &str) -> Self {
        let (path, query, fragment) = split_request_target(s);
        Self { path: if path.is_empty() { "/".to_string() } else { path }, query, fragment, ..Default::default() }
    }

    /// `path` + `?query` + `#fragment`, concatenated — what a server
    /// actually sees on the request line and what a client actually
    /// sends on the wire.
    pub fn fullpath(&self) -> String {
        let mut out = self.path.clone();
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            out.push('#');
            out.push_str(&self.fragment);
        }
        out
    }

    pub fn is_default_port(&self) -> bool {
        self.port == default_port(&self.schema)
    }
}

fn split_request_target(s: &str) -> (String, String, String) {
    let (before_fragment, fragment) = match s.find('#') {
        Some(i) => (&s[..i], s[i + 1..].to_string()),
        None => (s, String::new()),
    };
    let (path, query) = match before_fragment.find('?') {
        Some(i) => (before_fragment[..i].to_string(), before_fragment[i + 1..].to_string()),
        None => (before_fragment.to_string(), String::new()),
    };
    (path, query, fragment)
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.schema, self.host)?;
        if !self.is_default_port() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.fullpath())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_url_with_default_port() {
        let url = Url::parse("https://example.com/a/b?x=1#frag").unwrap();
        assert_eq!(url.schema, "https");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/a/b");
        assert_eq!(url.query, "x=1");
        assert_eq!(url.fragment, "frag");
    }

    #[test]
    fn parses_absolute_url_with_explicit_port() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        assert_eq!(url.port, 8080);
        assert!(!url.is_default_port());
    }

    #[test]
    fn display_elides_default_port_but_keeps_explicit_one() {
        let default = Url::parse("http://example.com/path").unwrap();
        assert_eq!(default.to_string(), "http://example.com/path");

        let explicit = Url::parse("http://example.com:9000/path").unwrap();
        assert_eq!(explicit.to_string(), "http://example.com:9000/path");
    }

    #[test]
    fn request_target_has_no_authority() {
        let url = Url::parse_request_target("/a/b?x=1#frag");
        assert_eq!(url.host, "");
        assert_eq!(url.fullpath(), "/a/b?x=1#frag");
    }

    #[test]
    fn missing_path_defaults_to_slash() {
        let url = Url::parse("http://example.com").unwrap();
        assert_eq!(url.path, "/");
        assert_eq!(url.fullpath(), "/");
    }
}
