//! A single-threaded, cooperative I/O runtime: an epoll/kqueue/io_uring
//! event loop, a `Task<T>` single-shot future, TLS splicing over
//! `rustls`, and an HTTP/1.1 + HTTP/2 client (`fetch`).
//!
//! The loop is the kernel everything else plugs into:
//! - [`loop_core`] / [`handle`] — [`EventLoop`], [`LoopHandle`], timers,
//!   checks, cross-thread wakeups.
//! - [`task`] — [`Task`], the crate's future type; everything async
//!   returns one of these instead of a raw `impl Future`.
//! - [`reactor`] — the platform I/O multiplexer `loop_core` polls.
//! - [`work`] — the thread pool backing [`dns`] and [`fs`], which need
//!   to run blocking syscalls off the loop thread.
//! - [`stream`] — the `AsyncRead`/`AsyncWrite` traits every transport
//!   implements, plus the free functions built on them.
//! - [`tcp`] — non-blocking TCP/TTY sockets wired into the reactor.
//! - [`tls`] — TLS splicing over any `AsyncRead + AsyncWrite`.
//! - [`url`] / [`message`] — the URL and request/response data model.
//! - [`http1`] / [`http2`] — the two wire engines `fetch` drives.
//! - [`gzip`] — the `Content-Encoding: gzip` codec both engines use.
//! - [`fetch`] — the client entry point composing all of the above.
//! - [`config`] — runtime-wide tuning knobs (worker count, io_uring,
//!   read buffer size).
//! - [`error`] — the crate-wide `Error`/`Result`.
//! - [`compat`] — a `tokio::io::{AsyncRead, AsyncWrite}` shim, needed
//!   only because the `h2` crate is built against tokio's traits.

pub mod compat;
pub mod config;
pub mod dns;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod gzip;
pub mod handle;
pub mod http1;
pub mod http2;
pub mod loop_core;
pub mod message;
pub mod reactor;
pub mod stream;
pub mod task;
pub mod tcp;
pub mod tls;
pub mod url;
pub mod work;

pub use config::Config;
pub use error::{Error, Result};
pub use fetch::{fetch, fetch_method, fetch_url};
pub use loop_core::{EventLoop, LoopHandle, WakeSender};
pub use message::{Headers, Request, Response};
pub use task::{Resolver, Task};
pub use tcp::{TcpListener, TcpStream, TtyStream};
pub use tls::{TlsContext, TlsStream};
pub use url::Url;
