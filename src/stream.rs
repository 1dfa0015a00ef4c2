//! Async I/O traits and stream-level helpers shared by plain and
//! TLS-wrapped connections.
//!
//! Grounded on `runtime::async::{AsyncRead, AsyncWrite}` in `mod.rs`.
//! That module's `TcpStream::read`/`write_all` convenience methods await
//! `std::future::pending()` on `WouldBlock`, which never wakes — nothing
//! re-polls a future that's permanently pending. This version parks the
//! task's `Waker` with the loop's reactor instead, via
//! [`crate::loop_core::LoopHandle::register_io`], so a real readiness
//! event drives the retry.

use std::future::poll_fn;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::loop_core::LoopHandle;
use crate::reactor::Interest;

pub trait AsyncRead {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;
}

pub trait AsyncWrite {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
    /// Half-closes the write side (`shutdown(SHUT_WR)` for a socket).
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

/// Parks `cx`'s waker against `fd` becoming ready for `interest` and
/// returns `Pending`. Shared by every `poll_read`/`poll_write` impl that
/// wraps a raw, non-blocking fd — the one piece of plumbing the
/// teacher's version never actually wired up.
pub(crate) fn pending_on_io(handle: &LoopHandle, fd: RawFd, interest: Interest, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
    match handle.register_io(fd, interest, cx.waker().clone()) {
        Ok(()) => Poll::Pending,
        Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e.to_string()))),
    }
}

pub(crate) fn pending_on_io_unit(handle: &LoopHandle, fd: RawFd, interest: Interest, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match handle.register_io(fd, interest, cx.waker().clone()) {
        Ok(()) => Poll::Pending,
        Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e.to_string()))),
    }
}

/// Reads at most `buf.len()` bytes. `Ok(0)` signals EOF, matching `Read::read`.
pub async fn read<T: AsyncRead + Unpin>(stream: &mut T, buf: &mut [u8]) -> io::Result<usize> {
    poll_fn(|cx| Pin::new(&mut *stream).poll_read(cx, buf)).await
}

/// Writes the whole of `buf`, looping on short writes.
pub async fn write_all<T: AsyncWrite + Unpin>(stream: &mut T, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = poll_fn(|cx| Pin::new(&mut *stream).poll_write(cx, buf)).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes"));
        }
        buf = &buf[n..];
    }
    Ok(())
}

pub async fn flush<T: AsyncWrite + Unpin>(stream: &mut T) -> io::Result<()> {
    poll_fn(|cx| Pin::new(&mut *stream).poll_flush(cx)).await
}

/// Half-close. Invariant: once this returns, no further writes should
/// be attempted on `stream`.
pub async fn shutdown<T: AsyncWrite + Unpin>(stream: &mut T) -> io::Result<()> {
    poll_fn(|cx| Pin::new(&mut *stream).poll_shutdown(cx)).await
}

/// Reads until EOF and returns everything received.
pub async fn read_to_end<T: AsyncRead + Unpin>(stream: &mut T) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = read(stream, &mut chunk).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

/// Splits the stream into `\n`-terminated lines (a trailing `\r` is
/// stripped) and invokes `cb` with a zero-copy view into the internal
/// buffer for each one. An unterminated fragment left over at EOF is
/// discarded, not delivered — this is the "view-based" framing the spec
/// calls out, and the copying variant below is required to match it.
pub async fn read_lines<T, F>(stream: &mut T, mut cb: F) -> io::Result<()>
where
    T: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = read(stream, &mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut start = 0;
        while let Some(pos) = memchr_newline(&buf[start..]) {
            let end = start + pos;
            let mut line = &buf[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            cb(line);
            start = end + 1;
        }
        buf.drain(..start);
    }
    // `buf` may still hold an unterminated trailing fragment here —
    // discarded, matching the copying variant's required behavior.
    Ok(())
}

/// Same framing as [`read_lines`], but hands each line to `cb` as an
/// owned `Vec<u8>` — for callers that need to retain lines past the
/// iteration step (e.g. collecting into a `Vec<Vec<u8>>`). Discards an
/// unterminated trailing fragment at EOF, matching `read_lines`.
pub async fn read_lines_owned<T, F>(stream: &mut T, mut cb: F) -> io::Result<()>
where
    T: AsyncRead + Unpin,
    F: FnMut(Vec<u8>),
{
    read_lines(stream, |line| cb(line.to_vec())).await
}

fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CursorStream {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for CursorStream {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            let remaining = &this.data[this.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            this.pos += n;
            Poll::Ready(Ok(n))
        }
    }
    impl Unpin for CursorStream {}

    struct SinkStream {
        written: Arc<Mutex<Vec<u8>>>,
    }
    impl AsyncWrite for SinkStream {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.get_mut().written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
    impl Unpin for SinkStream {}

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        let mut lp = crate::loop_core::EventLoop::new().unwrap();
        lp.block_on(fut)
    }

    #[test]
    fn read_to_end_collects_everything() {
        let mut stream = CursorStream { data: b"hello world".to_vec(), pos: 0 };
        let out = block_on(read_to_end(&mut stream)).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn write_all_writes_every_byte() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut stream = SinkStream { written: written.clone() };
        block_on(write_all(&mut stream, b"payload")).unwrap();
        assert_eq!(*written.lock().unwrap(), b"payload");
    }

    #[test]
    fn read_lines_strips_cr_and_discards_trailing_fragment() {
        let mut stream = CursorStream { data: b"one\r\ntwo\nthree".to_vec(), pos: 0 };
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        block_on(read_lines(&mut stream, move |line| {
            collected.lock().unwrap().push(line.to_vec());
        }))
        .unwrap();
        let lines = lines.lock().unwrap();
        assert_eq!(*lines, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn read_lines_owned_matches_view_based_framing() {
        let mut stream = CursorStream { data: b"a\nb\nc".to_vec(), pos: 0 };
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        block_on(read_lines_owned(&mut stream, move |line| {
            collected.lock().unwrap().push(line);
        }))
        .unwrap();
        assert_eq!(*lines.lock().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
