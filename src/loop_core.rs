//! The event loop: a single-threaded reactor plus a cooperative `Task`
//! executor, in the spirit of libuv's `uv_loop_t` — one thread drains
//! expired timers, runs check callbacks, polls for I/O, and re-polls
//! whatever tasks are ready, looping until nothing keeps it alive.
//!
//! Grounded on the teacher's `runtime_impl::Runtime`/`task::Executor`
//! pair: same `VecDeque` of scheduled tasks, same "state goes back to
//! idle, a `Waker` is what reschedules it" discipline. This module adds
//! the timer heap, the check-callback list and the cross-thread
//! async-wake primitive the teacher's single-threaded runtime doesn't
//! need (it only ever runs on one thread).

use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::reactor::{Interest, ReactorHandle, Token};

type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

struct ScheduledTask {
    future: Mutex<BoxFuture>,
    scheduled: std::sync::atomic::AtomicBool,
    id: u64,
}

struct TaskWaker {
    task: Arc<ScheduledTask>,
    inbox: InboxSender,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.task.scheduled.swap(true, Ordering::AcqRel) {
            self.inbox.push(self.task.clone());
        }
    }
}

/// Cheap MPSC queue used to feed ready tasks back to the loop thread,
/// whether the wake happened on the loop thread itself or from a work
/// pool / async-wake callback on another thread.
#[derive(Clone)]
struct InboxSender(Arc<Mutex<VecDeque<Arc<ScheduledTask>>>>);

impl InboxSender {
    fn push(&self, task: Arc<ScheduledTask>) {
        self.0.lock().unwrap().push_back(task);
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: `BinaryHeap` is a max-heap, we want the soonest deadline on top.
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Timers {
    heap: BinaryHeap<TimerEntry>,
    seq: u64,
}

impl Timers {
    fn new() -> Self {
        Self { heap: BinaryHeap::new(), seq: 0 }
    }

    fn schedule(&mut self, deadline: Instant, waker: Waker) {
        self.seq += 1;
        self.heap.push(TimerEntry { deadline, seq: self.seq, waker });
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    fn wake_expired(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            entry.waker.wake();
        }
    }
}

/// Registered once per `(fd, interest)` pair; woken by [`EventLoop::run_once`]
/// when the reactor reports that token ready.
struct IoWaiters {
    readable: Vec<Waker>,
    writable: Vec<Waker>,
}

/// The event loop proper. Not `Send`/`Sync` — it lives on one thread;
/// cross-thread interaction goes through [`LoopHandle`] and the
/// async-wake primitive in [`crate::handle::AsyncHandle`].
pub struct EventLoop {
    reactor: Arc<ReactorHandle>,
    timers: Arc<Mutex<Timers>>,
    checks: Arc<Mutex<Vec<Box<dyn FnMut() + 'static>>>>,
    io_waiters: Arc<Mutex<std::collections::HashMap<RawFd, IoWaiters>>>,
    ready: Arc<Mutex<VecDeque<Arc<ScheduledTask>>>>,
    cross_thread: Arc<Mutex<VecDeque<Box<dyn FnOnce() + Send + 'static>>>>,
    id_gen: Arc<AtomicU64>,
    wake_fd: [RawFd; 2],
    alive_refs: Arc<AtomicUsize>,
    config: crate::config::Config,
    work: Arc<std::sync::OnceLock<Arc<crate::work::WorkPool>>>,
}

/// The only cross-thread entry point into the loop (spec §4.B async-wake):
/// a thread-safe handle that posts a boxed closure to run on the loop
/// thread and interrupts a blocked `reactor.wait` so it's noticed
/// promptly. Used by the work pool and DNS resolver to hand results back
/// without ever touching a loop-owned resource from a worker thread.
#[derive(Clone)]
pub struct WakeSender {
    inbox: Arc<Mutex<VecDeque<Box<dyn FnOnce() + Send + 'static>>>>,
    wake_write_fd: RawFd,
}

impl WakeSender {
    /// Posts `cb` for execution on the loop thread. Thread-safe.
    pub fn post(&self, cb: impl FnOnce() + Send + 'static) {
        self.inbox.lock().unwrap().push_back(Box::new(cb));
        self.notify();
    }

    pub fn notify(&self) {
        let byte = [1u8];
        unsafe {
            libc::write(self.wake_write_fd, byte.as_ptr() as *const _, 1);
        }
    }
}

/// A cheap, cloneable reference to the loop, safe to hand to callbacks
/// and other threads. Everything a handle (timer, stream, work item)
/// needs to talk back to the loop goes through here.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Arc<LoopShared>,
}

struct LoopShared {
    ready: Arc<Mutex<VecDeque<Arc<ScheduledTask>>>>,
    timers: Arc<Mutex<Timers>>,
    io_waiters: Arc<Mutex<std::collections::HashMap<RawFd, IoWaiters>>>,
    id_gen: Arc<AtomicU64>,
    wake_write_fd: RawFd,
    alive_refs: Arc<AtomicUsize>,
    reactor: Arc<ReactorHandle>,
    config: crate::config::Config,
    work: Arc<std::sync::OnceLock<Arc<crate::work::WorkPool>>>,
    cross_thread: Arc<Mutex<VecDeque<Box<dyn FnOnce() + Send + 'static>>>>,
    checks: Arc<Mutex<Vec<Box<dyn FnMut() + 'static>>>>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_config(crate::config::Config::default())
    }

    pub fn with_config(config: crate::config::Config) -> Result<Self> {
        let reactor = Arc::new(ReactorHandle::new().map_err(Error::from)?);
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::from(std::io::Error::last_os_error()));
        }
        unsafe {
            let flags = libc::fcntl(fds[0], libc::F_GETFL);
            libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        reactor.add(fds[0], Interest::Readable).map_err(Error::from)?;

        Ok(Self {
            reactor,
            timers: Arc::new(Mutex::new(Timers::new())),
            checks: Arc::new(Mutex::new(Vec::new())),
            io_waiters: Arc::new(Mutex::new(std::collections::HashMap::new())),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            cross_thread: Arc::new(Mutex::new(VecDeque::new())),
            id_gen: Arc::new(AtomicU64::new(0)),
            wake_fd: fds,
            alive_refs: Arc::new(AtomicUsize::new(0)),
            config,
            work: Arc::new(std::sync::OnceLock::new()),
        })
    }

    /// A cloneable reference usable from callbacks and other threads.
    /// Shares the same id counter, work pool and loop-owned collections
    /// as `self` and every other handle — there is exactly one of each
    /// per loop, regardless of how many handles are taken out.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Arc::new(LoopShared {
                ready: self.ready.clone(),
                timers: self.timers.clone(),
                io_waiters: self.io_waiters.clone(),
                id_gen: self.id_gen.clone(),
                wake_write_fd: self.wake_fd[1],
                alive_refs: self.alive_refs.clone(),
                reactor: self.reactor.clone(),
                config: self.config.clone(),
                work: self.work.clone(),
                cross_thread: self.cross_thread.clone(),
                checks: self.checks.clone(),
            }),
        }
    }

    /// A `Send` handle for worker threads (work pool, DNS) to post results
    /// back onto the loop thread. The only primitive in this crate meant
    /// to cross a thread boundary.
    pub fn waker(&self) -> WakeSender {
        WakeSender { inbox: self.cross_thread.clone(), wake_write_fd: self.wake_fd[1] }
    }

    /// Lazily constructs the shared work-pool, sized from `self.config`.
    pub fn work_pool(&self) -> Arc<crate::work::WorkPool> {
        self.work
            .get_or_init(|| Arc::new(crate::work::WorkPool::new(self.config.resolved_workers(), self.waker())))
            .clone()
    }

    pub fn config(&self) -> &crate::config::Config {
        &self.config
    }

    fn inbox(&self) -> InboxSender {
        InboxSender(self.ready.clone())
    }

    /// Registers `future` with the executor. Equivalent to
    /// `self.handle().spawn(future)` but avoids an `Arc` round-trip when
    /// called from inside the loop itself.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.id_gen.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(ScheduledTask {
            future: Mutex::new(Box::pin(future)),
            scheduled: std::sync::atomic::AtomicBool::new(true),
            id,
        });
        self.ready.lock().unwrap().push_back(task);
    }

    pub fn register_check(&self, f: impl FnMut() + 'static) {
        self.checks.lock().unwrap().push(Box::new(f));
    }

    /// Parks the calling task's waker against `deadline`; the loop fires
    /// it when that instant is reached.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: Waker) {
        self.timers.lock().unwrap().schedule(deadline, waker);
    }

    /// Registers interest in `fd` becoming ready for `interest`, to be
    /// woken exactly once (mirrors the kqueue/io_uring one-shot model;
    /// epoll re-arms automatically on the next `register_io` call).
    pub(crate) fn register_io(&self, fd: RawFd, interest: Interest, waker: Waker) -> Result<()> {
        self.reactor.add(fd, interest).map_err(Error::from)?;
        let mut waiters = self.io_waiters.lock().unwrap();
        let entry = waiters.entry(fd).or_insert_with(|| IoWaiters { readable: Vec::new(), writable: Vec::new() });
        match interest {
            Interest::Readable => entry.readable.push(waker),
            Interest::Writable => entry.writable.push(waker),
        }
        Ok(())
    }

    pub(crate) fn forget_io(&self, fd: RawFd) {
        self.io_waiters.lock().unwrap().remove(&fd);
    }

    /// Runs one iteration: timers, checks, I/O poll, then drains and
    /// polls every task currently marked ready.
    pub fn run_once(&self) {
        self.timers.lock().unwrap().wake_expired();

        let mut cross_batch = VecDeque::new();
        std::mem::swap(&mut cross_batch, &mut *self.cross_thread.lock().unwrap());
        for cb in cross_batch {
            cb();
        }

        for check in self.checks.lock().unwrap().iter_mut() {
            check();
        }

        let timeout_ms = match self.timers.lock().unwrap().next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    deadline.duration_since(now).as_millis().min(i32::MAX as u128) as i32
                } else {
                    0
                }
            }
            None if self.ready.lock().unwrap().is_empty() => -1,
            None => 0,
        };

        if let Ok(events) = self.reactor.wait(timeout_ms) {
            let mut waiters = self.io_waiters.lock().unwrap();
            for (token, interest) in events {
                let fd = token.0 as RawFd;
                if fd == self.wake_fd[0] {
                    drain_wake_pipe(fd);
                    continue;
                }
                if let Some(entry) = waiters.get_mut(&fd) {
                    let list = match interest {
                        Interest::Readable => &mut entry.readable,
                        Interest::Writable => &mut entry.writable,
                    };
                    for waker in list.drain(..) {
                        waker.wake();
                    }
                }
            }
        }

        let inbox = self.inbox();
        let mut batch = VecDeque::new();
        std::mem::swap(&mut batch, &mut *self.ready.lock().unwrap());
        for task in batch {
            task.scheduled.store(false, Ordering::Release);
            let waker = Waker::from(Arc::new(TaskWaker { task: task.clone(), inbox: inbox.clone() }));
            let mut cx = Context::from_waker(&waker);
            let mut fut = task.future.lock().unwrap();
            let _ = fut.as_mut().poll(&mut cx);
        }
    }

    /// True while any timer, I/O registration or pending task keeps the
    /// loop from going idle — mirrors libuv's reference-counted "loop
    /// alive" condition. Work-pool bridges are the one source in this
    /// crate that doesn't hold a ref (see `work.rs`), matching the
    /// original's `uv_unref` use on its thread-pool completion handle.
    pub fn is_alive(&self) -> bool {
        !self.ready.lock().unwrap().is_empty()
            || self.timers.lock().unwrap().next_deadline().is_some()
            || !self.io_waiters.lock().unwrap().is_empty()
            || self.alive_refs.load(Ordering::Relaxed) > 0
    }

    /// Drives `future` to completion, running the loop between polls.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        let mut pinned = Box::pin(future);
        struct BlockOnWaker(std::sync::atomic::AtomicBool);
        impl Wake for BlockOnWaker {
            fn wake(self: Arc<Self>) {
                self.wake_by_ref();
            }
            fn wake_by_ref(self: &Arc<Self>) {
                self.0.store(true, Ordering::Release);
            }
        }
        let woken = Arc::new(BlockOnWaker(std::sync::atomic::AtomicBool::new(true)));

        loop {
            if woken.0.swap(false, Ordering::AcqRel) {
                let waker = Waker::from(woken.clone());
                let mut cx = Context::from_waker(&waker);
                if let Poll::Ready(out) = pinned.as_mut().poll(&mut cx) {
                    return out;
                }
            }
            self.run_once();
        }
    }

    /// Runs until no handle keeps the loop alive.
    pub fn run(&mut self) {
        while self.is_alive() {
            self.run_once();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd[0]);
            libc::close(self.wake_fd[1]);
        }
    }
}

fn drain_wake_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

impl LoopHandle {
    /// Spawns a fire-and-forget future on the owning loop. Thread-safe:
    /// this is the path work-pool completions and timers use to hand a
    /// result back without ever touching the loop's reactor directly.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.inner.id_gen.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(ScheduledTask {
            future: Mutex::new(Box::pin(future)),
            scheduled: std::sync::atomic::AtomicBool::new(true),
            id,
        });
        self.inner.ready.lock().unwrap().push_back(task);
        self.notify();
    }

    /// Interrupts a blocked `reactor.wait` so a cross-thread event (a
    /// work-pool completion, an `AsyncHandle::send`) is noticed promptly
    /// instead of waiting out the current timer deadline.
    pub fn notify(&self) {
        let byte = [1u8];
        unsafe {
            libc::write(self.inner.wake_write_fd, byte.as_ptr() as *const _, 1);
        }
    }

    pub(crate) fn inc_ref(&self) {
        self.inner.alive_refs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_ref(&self) {
        self.inner.alive_refs.fetch_sub(1, Ordering::Relaxed);
    }

    /// Parks the calling task's waker against `deadline`.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: Waker) {
        self.inner.timers.lock().unwrap().schedule(deadline, waker);
    }

    pub(crate) fn register_io(&self, fd: RawFd, interest: Interest, waker: Waker) -> Result<()> {
        self.inner.reactor.add(fd, interest).map_err(Error::from)?;
        let mut waiters = self.inner.io_waiters.lock().unwrap();
        let entry = waiters.entry(fd).or_insert_with(|| IoWaiters { readable: Vec::new(), writable: Vec::new() });
        match interest {
            Interest::Readable => entry.readable.push(waker),
            Interest::Writable => entry.writable.push(waker),
        }
        Ok(())
    }

    pub(crate) fn forget_io(&self, fd: RawFd) {
        self.inner.io_waiters.lock().unwrap().remove(&fd);
    }

    /// Registers a callback run once per loop iteration, after I/O
    /// polling — mirrors `uv_check_t`.
    pub fn register_check(&self, f: impl FnMut() + 'static) {
        self.inner.checks.lock().unwrap().push(Box::new(f));
    }

    /// A `Send` handle usable from worker threads.
    pub fn waker(&self) -> WakeSender {
        WakeSender { inbox: self.inner.cross_thread.clone(), wake_write_fd: self.inner.wake_write_fd }
    }

    pub fn work_pool(&self) -> Arc<crate::work::WorkPool> {
        self.inner
            .work
            .get_or_init(|| Arc::new(crate::work::WorkPool::new(self.inner.config.resolved_workers(), self.waker())))
            .clone()
    }

    pub fn config(&self) -> &crate::config::Config {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_resolves_ready_future() {
        let mut lp = EventLoop::new().unwrap();
        let result = lp.block_on(async { 1 + 1 });
        assert_eq!(result, 2);
    }

    #[test]
    fn spawned_task_runs_to_completion() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut lp = EventLoop::new().unwrap();
        lp.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        });
        lp.block_on(async { /* drive one iteration via poll below */ });
        // spawn schedules independently of block_on's own future; give it
        // a couple of ticks to land.
        for _ in 0..4 {
            lp.run_once();
            if ran.load(Ordering::SeqCst) {
                break;
            }
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn handle_notify_does_not_panic_without_a_blocked_waiter() {
        let lp = EventLoop::new().unwrap();
        lp.handle().notify();
    }
}
