use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation in the crate surfaces one of these kinds.
///
/// Each source (reactor, TLS, HTTP/1, HTTP/2, DNS, gzip) keeps its own
/// variant rather than being flattened into a single string, so callers
/// can match on kind.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("loop error {code}: {message}")]
    Loop { code: i32, message: String },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("http parse error: {0}")]
    HttpParse(String),

    #[error("unexpected eof before message complete")]
    UnexpectedEof,

    #[error("gzip error: {0}")]
    Gzip(String),

    #[error("dns error {code}: {message}")]
    Dns { code: i32, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn loop_err(code: i32, message: impl Into<String>) -> Self {
        Error::Loop { code, message: message.into() }
    }

    pub fn dns(code: i32, message: impl Into<String>) -> Self {
        Error::Dns { code, message: message.into() }
    }

    pub fn tls(message: impl fmt::Display) -> Self {
        Error::Tls(message.to_string())
    }

    pub fn http_parse(message: impl fmt::Display) -> Self {
        Error::HttpParse(message.to_string())
    }

    pub fn gzip(message: impl fmt::Display) -> Self {
        Error::Gzip(message.to_string())
    }

    /// True for errors that `read_until_eof`-style helpers should fold
    /// into a normal, successful completion rather than propagate.
    pub fn is_benign_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_error_formats_code_and_message() {
        let e = Error::loop_err(-4095, "EOF");
        assert_eq!(e.to_string(), "loop error -4095: EOF");
    }

    #[test]
    fn io_eof_is_benign() {
        let e: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(e.is_benign_eof());
    }
}
