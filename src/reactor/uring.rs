//! io_uring backend for Linux, used when the `io-uring` feature is enabled.
//!
//! Registers readiness polls the same way `epoll`/`kqueue` do — one
//! [`opcode::PollAdd`] per call to [`IoUringReactor::register`], consumed
//! on the next completion. The richer io_uring read/write/accept
//! opcodes aren't used here; this backend exists to swap the
//! multiplexing primitive, not to bypass the stream-level read/write
//! path.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use io_uring::{opcode, types, IoUring};

use super::{Interest, Token};

const RING_SIZE: u32 = 256;

pub struct IoUringReactor {
    ring: IoUring,
    pending: HashMap<u64, (RawFd, Interest)>,
    next_token: u64,
}

impl IoUringReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self { ring: IoUring::new(RING_SIZE)?, pending: HashMap::new(), next_token: 0 })
    }

    fn alloc_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        token
    }

    pub fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let token = self.alloc_token();
        let poll_flags = match interest {
            Interest::Readable => libc::POLLIN as u32,
            Interest::Writable => libc::POLLOUT as u32,
        };
        let entry = opcode::PollAdd::new(types::Fd(fd), poll_flags).build().user_data(token);
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "io_uring submission queue full"))?;
        }
        self.pending.insert(token, (fd, interest));
        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<(Token, Interest)>> {
        self.ring.submit()?;
        if timeout_ms != 0 {
            // A real deadline would use `opcode::Timeout`; this backend
            // only needs "block until something completes".
            let _ = self.ring.submit_and_wait(1);
        }
        let mut ready = Vec::new();
        for cqe in self.ring.completion() {
            let token = cqe.user_data();
            if let Some((fd, interest)) = self.pending.remove(&token) {
                if cqe.result() >= 0 {
                    ready.push((Token(fd as usize), interest));
                }
            }
        }
        Ok(ready)
    }
}

impl Drop for IoUringReactor {
    fn drop(&mut self) {
        self.pending.clear();
        let _ = self.ring.submit();
    }
}
