//! TLS splice: a shared, immutable [`TlsContext`] plus a per-connection
//! [`TlsStream`] that drives the handshake and decrypt/encrypt cycle
//! over any inner [`crate::stream::AsyncRead`] + [`crate::stream::AsyncWrite`].
//!
//! Grounded on `runtime::async::tls` (the rustls plumbing —
//! `process_io`/`flush_tls`/`fill_tls`, the `Handshaking`/`Ready`/
//! `Shutdown`/`Closed` state machine, `poll_read`/`poll_write` over
//! `conn.reader()`/`conn.writer()`) and on `ssl::context`/`ssl::state` in
//! `original_source/cpp-ssl/include/ssl.hpp` for the context/state split
//! and the ALPN configuration surface (`useCertificateFile`,
//! `usePrivateKeyFile`, `useALPNProtocols`, `useALPNCallback`). A single
//! context type serves both directions here instead of separate
//! client/server configs, and an Accept-side handshake that finishes
//! without a matching ALPN protocol is treated as fatal rather than
//! silently falling back to plain HTTP/1.
//!
//! rustls negotiates ALPN by intersecting its own ordered
//! `alpn_protocols` list with whatever the peer offered — it has no hook
//! for a per-connection predicate. `use_alpn_callback` approximates one
//! by filtering a small candidate list (`h2`, `http/1.1`) through the
//! predicate once, at context-build time, and using the result as that
//! ordered list. Noted in DESIGN.md as a known simplification.

use std::fs::File;
use std::future::poll_fn;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context as TaskContext, Poll};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{Error, Result};
use crate::stream::{AsyncRead, AsyncWrite};

const CANDIDATE_ALPN: &[&str] = &["h2", "http/1.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemFormat {
    Pem,
}

enum Built {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

/// Certificate material and ALPN policy, shared (immutably, once built)
/// across every connection it handshakes. Build one per listener or
/// per `fetch` client, not one per connection.
pub struct TlsContext {
    certs: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    alpn_protocols: Vec<Vec<u8>>,
    alpn_required: bool,
    built: OnceLock<Built>,
}

impl TlsContext {
    /// An empty context, suitable for either direction depending on
    /// which of `use_certificate_file`/`use_alpn_protocols` gets called.
    pub fn new() -> Self {
        Self { certs: Vec::new(), key: None, alpn_protocols: Vec::new(), alpn_required: false, built: OnceLock::new() }
    }

    /// A client context offering the default ALPN candidate list
    /// (`h2`, `http/1.1`) — what `fetch` uses for any `https://` URL.
    pub fn client() -> Self {
        let mut ctx = Self::new();
        ctx.use_alpn_protocols(CANDIDATE_ALPN);
        ctx
    }

    pub fn use_certificate_file(&mut self, path: impl AsRef<Path>, _format: PemFormat) -> Result<()> {
        let file = File::open(path.as_ref()).map_err(Error::from)?;
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::tls(format!("invalid certificate file: {e}")))?;
        self.certs = certs;
        Ok(())
    }

    /// Alias for `use_certificate_file` — a chain file is just a PEM
    /// file with more than one certificate in it, which
    /// `rustls_pemfile::certs` already handles.
    pub fn use_certificate_chain_file(&mut self, path: impl AsRef<Path>, format: PemFormat) -> Result<()> {
        self.use_certificate_file(path, format)
    }

    pub fn use_private_key_file(&mut self, path: impl AsRef<Path>, _format: PemFormat) -> Result<()> {
        let file = File::open(path.as_ref()).map_err(Error::from)?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(file))
            .map_err(|e| Error::tls(format!("invalid private key file: {e}")))?
            .ok_or_else(|| Error::tls("no private key found in file"))?;
        self.key = Some(key);
        Ok(())
    }

    /// Sets the ordered ALPN protocol list offered (client) or accepted
    /// (server) by this context.
    pub fn use_alpn_protocols(&mut self, protocols: &[&str]) {
        self.alpn_protocols = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        self.alpn_required = !self.alpn_protocols.is_empty();
    }

    /// Server-side protocol selection by predicate: each of
    /// [`CANDIDATE_ALPN`] is passed to `predicate` in order, and the ones
    /// that return `true` become this context's offered list. A
    /// predicate that rejects everything makes every handshake fail
    /// ALPN negotiation (see [`TlsStream::handshake`]).
    pub fn use_alpn_callback(&mut self, predicate: impl Fn(&str) -> bool) {
        let accepted: Vec<&str> = CANDIDATE_ALPN.iter().copied().filter(|p| predicate(p)).collect();
        self.use_alpn_protocols(&accepted);
    }

    pub(crate) fn alpn_required(&self) -> bool {
        self.alpn_required
    }

    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
        if let Some(Built::Client(cfg)) = self.built.get() {
            return Ok(cfg.clone());
        }
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        config.alpn_protocols = self.alpn_protocols.clone();
        let config = Arc::new(config);
        let _ = self.built.set(Built::Client(config.clone()));
        Ok(config)
    }

    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>> {
        if let Some(Built::Server(cfg)) = self.built.get() {
            return Ok(cfg.clone());
        }
        let key = self.key.clone().ok_or_else(|| Error::tls("no private key configured"))?;
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), key)
            .map_err(Error::tls)?;
        config.alpn_protocols = self.alpn_protocols.clone();
        let config = Arc::new(config);
        let _ = self.built.set(Built::Server(config.clone()));
        Ok(config)
    }
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Connect,
    Accept,
}

/// Per-connection TLS state. Splices its own read/write through
/// `rustls::Connection`: encrypted bytes move over `inner`,
/// plaintext moves through `conn.reader()`/`conn.writer()`.
pub struct TlsStream<T> {
    inner: T,
    conn: rustls::Connection,
    state: State,
    side: Side,
    alpn_required: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> TlsStream<T> {
    pub fn connect(inner: T, ctx: &TlsContext, server_name: &str) -> Result<Self> {
        Self::connect_with_config(inner, ctx.client_config()?, server_name)
    }

    pub fn accept(inner: T, ctx: &TlsContext) -> Result<Self> {
        Self::accept_with_config(inner, ctx.server_config()?, ctx.alpn_required)
    }

    /// Same as [`Self::connect`], but takes an already-resolved client
    /// config instead of a `&TlsContext` — for callers (like
    /// [`crate::tcp::TcpStream::connect_tls`]) that need to carry the
    /// config across an `await` point into a `'static` future, where a
    /// borrowed `&TlsContext` wouldn't survive.
    pub fn connect_with_config(inner: T, config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let name: ServerName<'static> = server_name.to_string().try_into().map_err(|_| Error::tls("invalid server name"))?;
        let conn = rustls::ClientConnection::new(config, name).map_err(Error::tls)?;
        Ok(Self { inner, conn: rustls::Connection::Client(conn), state: State::Fresh, side: Side::Connect, alpn_required: false })
    }

    /// Same as [`Self::accept`], but takes an already-resolved server
    /// config for the same reason as [`Self::connect_with_config`].
    pub fn accept_with_config(inner: T, config: Arc<ServerConfig>, alpn_required: bool) -> Result<Self> {
        let conn = rustls::ServerConnection::new(config).map_err(Error::tls)?;
        Ok(Self { inner, conn: rustls::Connection::Server(conn), state: State::Fresh, side: Side::Accept, alpn_required })
    }

    /// The ALPN protocol negotiated during the handshake, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.conn.alpn_protocol().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Drives the handshake to completion. Resolves exactly once; a
    /// second call on an already-`Ready` stream returns immediately.
    pub async fn handshake(&mut self) -> Result<()> {
        poll_fn(|cx| self.poll_handshake(cx)).await
    }

    fn poll_handshake(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<()>> {
        if self.state == State::Ready {
            return Poll::Ready(Ok(()));
        }
        if self.state == State::Failed {
            return Poll::Ready(Err(Error::tls("handshake already failed")));
        }
        self.state = State::Handshaking;
        if let Err(e) = self.process_io(cx) {
            self.state = State::Failed;
            return Poll::Ready(Err(Error::tls(e)));
        }
        if self.conn.is_handshaking() {
            return Poll::Pending;
        }
        if self.side == Side::Accept && self.alpn_required && self.conn.alpn_protocol().is_none() {
            self.state = State::Failed;
            return Poll::Ready(Err(Error::tls("ALPN: peer offered no protocol this context accepts")));
        }
        self.state = State::Ready;
        Poll::Ready(Ok(()))
    }

    fn process_io(&mut self, cx: &mut TaskContext<'_>) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.flush_tls(cx)? {
                0 => break,
                _ => continue,
            }
        }
        if self.conn.wants_read() {
            self.fill_tls(cx)?;
        }
        Ok(())
    }

    fn flush_tls(&mut self, cx: &mut TaskContext<'_>) -> io::Result<usize> {
        let mut total = 0;
        let mut scratch = [0u8; 4096];
        loop {
            let mut cursor = io::Cursor::new(&mut scratch[..]);
            match self.conn.write_tls(&mut cursor)? {
                0 => break,
                n => match Pin::new(&mut self.inner).poll_write(cx, &scratch[..n]) {
                    Poll::Ready(Ok(written)) => {
                        total += written;
                        if written < n {
                            break;
                        }
                    }
                    Poll::Ready(Err(e)) => return Err(e),
                    Poll::Pending => break,
                },
            }
        }
        Ok(total)
    }

    fn fill_tls(&mut self, cx: &mut TaskContext<'_>) -> io::Result<()> {
        let mut scratch = [0u8; 4096];
        match Pin::new(&mut self.inner).poll_read(cx, &mut scratch) {
            Poll::Ready(Ok(0)) => {
                self.state = State::Closed;
            }
            Poll::Ready(Ok(n)) => {
                let mut cursor = io::Cursor::new(&scratch[..n]);
                self.conn.read_tls(&mut cursor)?;
                self.conn
                    .process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            }
            Poll::Ready(Err(e)) => return Err(e),
            Poll::Pending => {}
        }
        Ok(())
    }
}

impl<T: Unpin> Unpin for TlsStream<T> {}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for TlsStream<T> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        if let Err(e) = self.process_io(cx) {
            return Poll::Ready(Err(e));
        }
        if self.state == State::Handshaking || self.state == State::Fresh {
            return Poll::Pending;
        }
        if self.state == State::Closed {
            return Poll::Ready(Ok(0));
        }
        match self.conn.reader().read(buf) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Err(e) = self.process_io(cx) {
                    return Poll::Ready(Err(e));
                }
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TlsStream<T> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Err(e) = self.process_io(cx) {
            return Poll::Ready(Err(e));
        }
        if self.state == State::Handshaking || self.state == State::Fresh {
            return Poll::Pending;
        }
        if self.state == State::Closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "tls connection closed")));
        }
        let n = match self.conn.writer().write(buf) {
            Ok(n) => n,
            Err(e) => return Poll::Ready(Err(e)),
        };
        if let Err(e) = self.process_io(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        loop {
            if let Err(e) = self.process_io(cx) {
                return Poll::Ready(Err(e));
            }
            if !self.conn.wants_write() {
                break;
            }
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        if self.state != State::Closed {
            self.conn.send_close_notify();
            self.state = State::Closed;
        }
        if let Err(e) = self.process_io(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_callback_filters_candidate_list_in_order() {
        let mut ctx = TlsContext::new();
        ctx.use_alpn_callback(|p| p == "http/1.1");
        assert_eq!(ctx.alpn_protocols, vec![b"http/1.1".to_vec()]);
        assert!(ctx.alpn_required);
    }

    #[test]
    fn client_context_defaults_to_h2_then_http11() {
        let ctx = TlsContext::client();
        assert_eq!(ctx.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }

    #[test]
    fn server_config_requires_a_private_key() {
        let ctx = TlsContext::new();
        assert!(ctx.server_config().is_err());
    }
}
