//! `fetch`: a protocol-selecting, one-shot HTTP client.
//!
//! Grounded on `http::fetch` in `original_source/cpp-http/fetch.hpp`:
//! stamp `host`/`connection`/`accept-encoding`, connect (optionally
//! through TLS with an `h2`/`http/1.1` ALPN offer), then branch on the
//! negotiated protocol — an `h2::handler` for `h2`, an `http::parser` for
//! anything else, reading until EOF either way and raising "unexpected
//! EOF" if the engine never reached `done`.

use crate::error::{Error, Result};
use crate::http1::{HttpParser, ResponseParser};
use crate::http2::Http2Client;
use crate::loop_core::LoopHandle;
use crate::message::{Request, Response};
use crate::stream::{AsyncRead, AsyncWrite};
use crate::task::Task;
use crate::tcp::TcpStream;
use crate::tls::TlsContext;
use crate::url::Url;

/// `fetch(request) -> Task<Response>`.
pub fn fetch(handle: &LoopHandle, mut request: Request) -> Task<Response> {
    let handle = handle.clone();
    Task::from_future(async move {
        request.headers.insert("host", request.url.host.clone());
        request.headers.insert("connection", "close");
        request.headers.insert("accept-encoding", "gzip");

        let host = request.url.host.clone();
        let port = request.url.port;

        if request.url.schema == "https" {
            let ctx = TlsContext::client();
            let mut tls = TcpStream::connect_tls(&handle, host, port, &ctx).await?;
            if tls.protocol() == Some("h2") {
                let mut session = Http2Client::handshake(&handle, tls).await?;
                session.send(&request).await
            } else {
                run_http1(&mut tls, &request).await
            }
        } else {
            let mut tcp = TcpStream::connect(&handle, host, port).await?;
            run_http1(&mut tcp, &request).await
        }
    })
}

/// `fetch(method, url, body?)` convenience overload.
pub fn fetch_method(handle: &LoopHandle, method: impl Into<String>, url: Url, body: Vec<u8>) -> Task<Response> {
    fetch(handle, Request::new(method, url, body))
}

/// `fetch(url)` convenience overload — a bodiless `GET`.
pub fn fetch_url(handle: &LoopHandle, url: Url) -> Task<Response> {
    fetch(handle, Request { url, ..Request::default() })
}

/// Serializes `request`, writes it, half-closes the write side, then
/// feeds everything read back into a [`ResponseParser`] until EOF —
/// the HTTP/1.1 leg of `fetch`.
async fn run_http1<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, request: &Request) -> Result<Response> {
    crate::stream::write_all(stream, &request.stringify()).await.map_err(Error::from)?;
    crate::stream::shutdown(stream).await.map_err(Error::from)?;

    let mut parser = ResponseParser::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = crate::stream::read(stream, &mut buf).await.map_err(Error::from)?;
        if n == 0 {
            break;
        }
        parser.execute(&buf[..n])?;
        if parser.done() {
            break;
        }
    }
    parser.finish()?;

    if !parser.done() {
        return Err(Error::UnexpectedEof);
    }
    Ok(parser.result().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_core::EventLoop;
    use std::io::{Read, Write};
    use std::net::TcpListener as StdTcpListener;

    /// Spins up a plain-TCP HTTP/1.1 server on a worker thread that
    /// replies with a fixed response, then drives `fetch` against it on
    /// the event loop thread.
    #[test]
    fn fetches_a_plain_http_response() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .unwrap();
        });

        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let task = fetch_url(&handle, url);
        let response = lp.block_on(async move { task.await }).unwrap();

        server.join().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert_eq!(response.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn unexpected_eof_before_done_is_reported() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n0123456789")
                .unwrap();
            // Close early: declared 20 bytes, only 10 sent.
        });

        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let task = fetch_url(&handle, url);
        let result = lp.block_on(async move { task.await });

        server.join().unwrap();
        assert!(matches!(result, Err(Error::UnexpectedEof)));
    }
}
