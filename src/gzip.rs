//! Gzip codec for `content-encoding: gzip` bodies.
//!
//! Grounded on `cpp-http/include/http/zlib.hpp`: `deflateInit2`/`inflateInit2`
//! are both called with `16 + MAX_WBITS`, i.e. the gzip wrapper format
//! rather than raw deflate or zlib framing. `flate2`'s `Gz{Encoder,Decoder}`
//! speak the same format, so `inflate`/`deflate` here are direct
//! replacements for `http::uncompress`/`http::compress`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Decodes a gzip-framed body, matching `http::uncompress`.
pub fn inflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::gzip)?;
    Ok(out)
}

/// Gzip-encodes `body`, matching `http::compress`. Unused by `fetch`
/// (the core only ever decodes a server's gzip response), kept for
/// parity with the original module and for round-trip tests.
pub fn deflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(Error::gzip)?;
    encoder.finish().map_err(Error::gzip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_gzip() {
        let original = b"hello, gzip world";
        let compressed = deflate(original).unwrap();
        let decompressed = inflate(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn inflate_rejects_non_gzip_input() {
        assert!(inflate(b"not actually gzip").is_err());
    }
}
