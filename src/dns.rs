//! Asynchronous name resolution.
//!
//! Grounded on `uvpp::dns::getaddrinfo` in `original_source/cpp-uv`:
//! libuv dispatches `getaddrinfo` onto its thread pool because the libc
//! call is blocking, then hands the result back on the loop thread.
//! There's no async DNS crate in the dependency stack, so this does the
//! same thing with what the standard library already gives us —
//! `std::net::ToSocketAddrs` performs the same blocking syscall — run
//! through [`crate::work::queue`] instead of on the loop thread.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};
use crate::loop_core::LoopHandle;
use crate::task::Task;

/// Resolves `host:port` to every address the resolver returns, in the
/// order the system gives them (matching getaddrinfo's own ordering —
/// this crate doesn't re-sort by happy-eyeballs preference).
pub fn getaddrinfo(handle: &LoopHandle, node: impl Into<String>, service: u16) -> Task<Vec<SocketAddr>> {
    let node = node.into();
    let pool = handle.work_pool();
    crate::work::queue(&pool, move || resolve(&node, service))
}

fn resolve(node: &str, service: u16) -> Result<Vec<SocketAddr>> {
    let query = format!("{node}:{service}");
    let addrs: Vec<SocketAddr> = query
        .to_socket_addrs()
        .map_err(|e| Error::dns(-1, format!("resolving {node}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::dns(-1, format!("no addresses found for {node}")));
    }
    Ok(addrs)
}

/// Resolves and returns only the first address, the common case for a
/// client connecting to a single host.
pub fn lookup_one(handle: &LoopHandle, node: impl Into<String>, service: u16) -> Task<SocketAddr> {
    let task = getaddrinfo(handle, node, service);
    Task::from_future(async move {
        let addrs = task.await?;
        addrs.into_iter().next().ok_or_else(|| Error::dns(-1, "empty address list"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_core::EventLoop;

    #[test]
    fn resolves_localhost() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let task = lookup_one(&handle, "localhost", 80);
        let addr = lp.block_on(async move { task.await }).unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn unresolvable_host_rejects() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let task = getaddrinfo(&handle, "this.host.does.not.resolve.invalid", 80);
        let result = lp.block_on(async move { task.await });
        assert!(result.is_err());
    }
}
