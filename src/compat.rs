//! Bridges this crate's own `AsyncRead`/`AsyncWrite` onto `tokio::io`'s,
//! purely so `h2::client::Connection` has something to poll.
//!
//! `h2` 0.4 is generic over `tokio::io::{AsyncRead, AsyncWrite}`, not an
//! executor — driving its `Connection` future is still done by handing
//! it to this crate's own [`crate::loop_core::LoopHandle::spawn`], which
//! tolerates non-`Send` futures since the loop never leaves its thread.
//! No tokio runtime is pulled in; this module only needs the trait
//! definitions from `tokio`'s `io-util` feature.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::ReadBuf;

/// Wraps a `T: crate::stream::{AsyncRead, AsyncWrite}` so it also
/// implements the tokio traits.
pub struct TokioCompat<T>(pub T);

impl<T: Unpin> Unpin for TokioCompat<T> {}

impl<T: crate::stream::AsyncRead + Unpin> tokio::io::AsyncRead for TokioCompat<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let unfilled = buf.initialize_unfilled();
        match Pin::new(&mut this.0).poll_read(cx, unfilled) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: crate::stream::AsyncWrite + Unpin> tokio::io::AsyncWrite for TokioCompat<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}
