//! Filesystem I/O, dispatched to the work pool.
//!
//! Grounded on `uvpp::fs` in `original_source/cpp-uv`: libuv runs every
//! filesystem syscall on its thread pool because none of the OS's
//! filesystem APIs are truly non-blocking. This does the same with
//! `std::fs`'s blocking calls wrapped in [`crate::work::queue`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::loop_core::LoopHandle;
use crate::task::Task;

/// Opens `path` for reading on a worker thread.
pub fn open(handle: &LoopHandle, path: impl AsRef<Path>) -> Task<File> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let pool = handle.work_pool();
    crate::work::queue(&pool, move || File::open(&path).map_err(Into::into))
}

/// Reads up to `buf_len` bytes from `file` at `offset`. An empty
/// `Vec` signals EOF, matching the source's zero-length read.
pub fn read(handle: &LoopHandle, mut file: File, offset: u64, buf_len: usize) -> Task<(File, Vec<u8>)> {
    let pool = handle.work_pool();
    crate::work::queue(&pool, move || -> Result<(File, Vec<u8>)> {
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; buf_len];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok((file, buf))
    })
}

/// Reads the entirety of `path`, using [`crate::config::Config::read_buf_size`]
/// as the chunk size.
pub fn read_all(handle: &LoopHandle, path: impl AsRef<Path>) -> Task<Vec<u8>> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let pool = handle.work_pool();
    let chunk_size = handle.config().read_buf_size;
    crate::work::queue(&pool, move || -> Result<Vec<u8>> {
        let mut file = File::open(&path)?;
        let mut result = Vec::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            result.extend_from_slice(&buf[..n]);
        }
        Ok(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_core::EventLoop;
    use std::io::Write;

    #[test]
    fn reads_a_file_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let task = read_all(&handle, &path);
        let contents = lp.block_on(async move { task.await }).unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn open_then_read_matches_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunked.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let open_task = open(&handle, &path);
        let file = lp.block_on(async move { open_task.await }).unwrap();
        let read_task = read(&handle, file, 0, 4);
        let (_file, chunk) = lp.block_on(async move { read_task.await }).unwrap();
        assert_eq!(chunk, b"0123");
    }

    #[test]
    fn missing_file_rejects() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let task = read_all(&handle, "/nonexistent/path/for/sure");
        assert!(lp.block_on(async move { task.await }).is_err());
    }
}
