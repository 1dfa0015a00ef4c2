/// In-process configuration for an [`crate::EventLoop`].
///
/// There is no file or environment-backed configuration in the core —
/// no persisted state, nothing read from the environment; this is
/// purely a builder for the knobs the event loop and work pool need at
/// construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads backing `work::queue` and DNS lookups.
    /// `0` means "pick based on available parallelism", matching the
    /// teacher's `HttpServer::bind` default.
    pub workers: usize,
    /// Opt into the io_uring reactor backend on Linux when the
    /// `io-uring` feature is compiled in. Ignored elsewhere.
    pub io_uring: bool,
    /// Scratch buffer size used by `fs::read` when the caller doesn't
    /// supply one.
    pub read_buf_size: usize,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn io_uring(mut self, enabled: bool) -> Self {
        self.io_uring = enabled;
        self
    }

    pub fn read_buf_size(mut self, size: usize) -> Self {
        self.read_buf_size = size;
        self
    }

    pub(crate) fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get().min(6))
                .unwrap_or(4)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 0,
            io_uring: false,
            read_buf_size: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_read_buf_matches_spec() {
        assert_eq!(Config::default().read_buf_size, 64 * 1024);
    }

    #[test]
    fn resolved_workers_falls_back_to_parallelism() {
        let cfg = Config::new().workers(0);
        assert!(cfg.resolved_workers() >= 1);
    }

    #[test]
    fn explicit_worker_count_is_honored() {
        let cfg = Config::new().workers(3);
        assert_eq!(cfg.resolved_workers(), 3);
    }
}
