//! Platform I/O multiplexing: epoll on Linux, kqueue on macOS, and an
//! optional io_uring backend on Linux behind the `io-uring` feature.
//!
//! A [`ReactorHandle`] owns exactly one kernel-level polling object per
//! loop. Sources register interest by file descriptor and get back
//! ready tokens from [`ReactorHandle::wait`]; waker bookkeeping lives one
//! level up, in [`crate::loop_core`], which is the only place that knows
//! which `Waker` a token belongs to.

use std::io;
use std::os::unix::io::RawFd;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
mod uring;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
use uring::IoUringReactor;

/// A readiness token, numerically equal to the registered file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Readable,
    Writable,
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use libc::{
        epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
        EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_MOD,
    };

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    pub fn add(epoll_fd: RawFd, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: match interest {
                Interest::Readable => (EPOLLIN | EPOLLERR | EPOLLHUP) as u32,
                Interest::Writable => (EPOLLOUT | EPOLLERR | EPOLLHUP) as u32,
            },
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(epoll_fd, EPOLL_CTL_ADD, fd, &mut event) };
        if rc == 0 {
            return Ok(());
        }
        // Already registered from a previous interest — rearm instead.
        let rc = unsafe { epoll_ctl(epoll_fd, EPOLL_CTL_MOD, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn wait(epoll_fd: RawFd, events: &mut [epoll_event], timeout: i32) -> io::Result<usize> {
        let n = unsafe { epoll_wait(epoll_fd, events.as_mut_ptr(), events.len() as i32, timeout) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use super::*;
    use libc::{kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_ENABLE, EV_ONESHOT};

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { kqueue() };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    pub fn add(kq: RawFd, fd: RawFd, interest: Interest) -> io::Result<()> {
        let filter = match interest {
            Interest::Readable => EVFILT_READ,
            Interest::Writable => EVFILT_WRITE,
        };
        let event = kevent {
            ident: fd as usize,
            filter,
            flags: EV_ADD | EV_ENABLE | EV_ONESHOT,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let rc = unsafe { kevent(kq, &event, 1, std::ptr::null_mut(), 0, std::ptr::null()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn wait(kq: RawFd, events: &mut [kevent], timeout_ms: i32) -> io::Result<usize> {
        let ts;
        let ts_ptr = if timeout_ms < 0 {
            std::ptr::null()
        } else {
            ts = timespec {
                tv_sec: (timeout_ms / 1000) as i64,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as i64,
            };
            &ts as *const timespec
        };
        let n = unsafe {
            kevent(kq, std::ptr::null(), 0, events.as_mut_ptr(), events.len() as i32, ts_ptr)
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

const MAX_EVENTS: usize = 1024;

#[cfg(all(target_os = "linux", not(feature = "io-uring")))]
pub struct ReactorHandle {
    epoll_fd: RawFd,
}

#[cfg(all(target_os = "linux", not(feature = "io-uring")))]
impl ReactorHandle {
    pub fn new() -> io::Result<Self> {
        Ok(Self { epoll_fd: sys::create()? })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        sys::add(self.epoll_fd, fd, interest)
    }

    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<(Token, Interest)>> {
        use libc::EPOLLIN;
        let mut events: Vec<libc::epoll_event> = vec![unsafe { std::mem::zeroed() }; MAX_EVENTS];
        let n = sys::wait(self.epoll_fd, &mut events, timeout_ms)?;
        let mut ready = Vec::with_capacity(n);
        for event in &events[..n] {
            let interest = if event.events as i32 & EPOLLIN as i32 != 0 {
                Interest::Readable
            } else {
                Interest::Writable
            };
            ready.push((Token(event.u64 as usize), interest));
        }
        Ok(ready)
    }
}

#[cfg(all(target_os = "linux", not(feature = "io-uring")))]
impl Drop for ReactorHandle {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}

#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub struct ReactorHandle {
    inner: std::sync::Mutex<IoUringReactor>,
}

#[cfg(all(target_os = "linux", feature = "io-uring"))]
impl ReactorHandle {
    pub fn new() -> io::Result<Self> {
        Ok(Self { inner: std::sync::Mutex::new(IoUringReactor::new()?) })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.inner.lock().unwrap().register(fd, interest)
    }

    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<(Token, Interest)>> {
        self.inner.lock().unwrap().wait(timeout_ms)
    }
}

#[cfg(target_os = "macos")]
pub struct ReactorHandle {
    kq_fd: RawFd,
}

#[cfg(target_os = "macos")]
impl ReactorHandle {
    pub fn new() -> io::Result<Self> {
        Ok(Self { kq_fd: sys::create()? })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        sys::add(self.kq_fd, fd, interest)
    }

    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<(Token, Interest)>> {
        use libc::EVFILT_READ;
        let mut events: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; MAX_EVENTS];
        let n = sys::wait(self.kq_fd, &mut events, timeout_ms)?;
        let mut ready = Vec::with_capacity(n);
        for event in &events[..n] {
            let interest = if event.filter == EVFILT_READ {
                Interest::Readable
            } else {
                Interest::Writable
            };
            ready.push((Token(event.ident as usize), interest));
        }
        Ok(ready)
    }
}

#[cfg(target_os = "macos")]
impl Drop for ReactorHandle {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq_fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactor_handle_constructs() {
        ReactorHandle::new().expect("reactor should construct on a supported platform");
    }
}
