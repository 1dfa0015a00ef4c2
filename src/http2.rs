//! HTTP/2 client session handler.
//!
//! `cpp-http/include/http/http2.hpp` wraps nghttp2's callback-driven
//! session API directly: `on_send` pushes framed bytes to the
//! transport, `execute` feeds received bytes in, and `on_header`/
//! `on_data_chunk_recv`/`on_stream_close` accumulate a single in-flight
//! `Response`. This handler is grounded on the `h2` crate's client API
//! instead, which exposes the same shape through different plumbing:
//! [`h2::client::handshake`] returns a
//! connection-driving future (the `execute`/`on_send` loop, here driven
//! by [`crate::loop_core::LoopHandle::spawn`] instead of manual
//! `nghttp2_session_mem_recv`/`send_callback`) plus a [`h2::client::SendRequest`]
//! handle used to open one stream per call, with the response body
//! polled directly off a [`h2::RecvStream`] rather than delivered
//! through a per-stream callback.
//!
//! Connection-specific headers (`connection`, `transfer-encoding`,
//! `upgrade`, `keep-alive`, `proxy-connection`) are forbidden by RFC 7540
//! §8.1.2.2 and silently dropped before a request is submitted — the
//! original never filters these, but `fetch` always stamps `connection:
//! close` on outgoing requests regardless of which wire protocol ends up
//! selected, so something has to.

use bytes::Bytes;

use crate::compat::TokioCompat;
use crate::error::{Error, Result};
use crate::loop_core::LoopHandle;
use crate::message::{Request, Response};
use crate::stream::{AsyncRead, AsyncWrite};

const CONNECTION_SPECIFIC: &[&str] = &["connection", "transfer-encoding", "upgrade", "keep-alive", "proxy-connection"];

fn h2_err(e: h2::Error) -> Error {
    Error::http_parse(e.to_string())
}

/// A client-side HTTP/2 session over one already-connected (and, for
/// `https://`, already-TLS-handshaked) stream.
pub struct Http2Client {
    send_request: h2::client::SendRequest<Bytes>,
}

impl Http2Client {
    /// Performs the HTTP/2 connection preface and initial `SETTINGS`
    /// exchange (`submit_settings` + `send_session` in the original,
    /// folded into `h2::client::handshake`), then spawns the connection
    /// driver onto `handle` so frames keep flowing for every subsequent
    /// `send` call. `h2`'s `Connection` future pushes frames to the
    /// transport internally against whatever `AsyncWrite` it was built
    /// with, the same role `on_send` plays in the original.
    pub async fn handshake<T>(handle: &LoopHandle, io: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let (send_request, connection) = h2::client::handshake(TokioCompat(io)).await.map_err(h2_err)?;
        handle.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "http/2 connection driver exited with an error");
            }
        });
        Ok(Self { send_request })
    }

    /// Submits `request` as a new stream (`submit_request` in the
    /// original) and awaits the full response, including its body — the
    /// core has no streaming response API, so this drains
    /// [`h2::RecvStream`] to completion before returning, matching
    /// `on_stream_close`'s "gzip post-decode, set done, invoke
    /// on_complete" sequence.
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        let sender = self.send_request.clone();
        let mut sender = sender.ready().await.map_err(h2_err)?;

        let authority = if request.url.is_default_port() {
            request.url.host.clone()
        } else {
            format!("{}:{}", request.url.host, request.url.port)
        };
        let uri: http::Uri = format!("{}://{}{}", request.url.schema, authority, request.url.fullpath())
            .parse()
            .map_err(|e| Error::http_parse(format!("invalid request uri: {e}")))?;

        let mut builder = http::Request::builder()
            .method(request.method.as_str())
            .uri(uri)
            .version(http::Version::HTTP_2);
        for (name, value) in request.headers.iter() {
            if CONNECTION_SPECIFIC.contains(&name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        let http_request = builder.body(()).map_err(|e| Error::http_parse(e.to_string()))?;

        let has_body = !request.body.is_empty();
        let (response_fut, mut send_stream) =
            sender.send_request(http_request, !has_body).map_err(h2_err)?;
        if has_body {
            send_stream.send_data(Bytes::copy_from_slice(&request.body), true).map_err(h2_err)?;
        }

        let response = response_fut.await.map_err(h2_err)?;
        let (parts, mut body) = response.into_parts();

        let mut headers = crate::message::Headers::new();
        for (name, value) in parts.headers.iter() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value.to_string());
            }
        }
        let mut result = Response {
            version: (2, 0),
            status: parts.status.as_u16() as i32,
            reason: parts.status.canonical_reason().unwrap_or("").to_string(),
            headers,
            ..Response::default()
        };

        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(h2_err)?;
            let _ = body.flow_control().release_capacity(chunk.len());
            result.body.extend_from_slice(&chunk);
        }

        if result.headers.get("content-encoding") == Some("gzip") {
            result.body = crate::gzip::inflate(&result.body)?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_specific_headers_are_filtered() {
        assert!(CONNECTION_SPECIFIC.contains(&"connection"));
        assert!(!CONNECTION_SPECIFIC.contains(&"accept-encoding"));
    }
}
