//! Timer, check and async-wake handles — the loop-thread-confined
//! primitives built directly on [`crate::loop_core::LoopHandle`].
//!
//! Grounded on `uvpp::timer`/`uvpp::check`/`uvpp::async` in
//! `original_source/cpp-uv`: a `timer` parks a callback until a
//! deadline (with optional repeat), a `check` runs once per loop
//! iteration, and `async` is the only handle meant to be triggered from
//! another thread. Here a deadline parks a `Waker` with the loop's
//! timer heap instead of holding a native handle, and `AsyncHandle` is a
//! thin, `Task`-returning wrapper around [`crate::loop_core::WakeSender`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::loop_core::{LoopHandle, WakeSender};
use crate::task::Task;

/// A future that completes once at `deadline`. Re-registers itself with
/// the loop's timer heap on every poll that hasn't yet reached it,
/// since the heap entry is consumed the moment it fires.
pub struct Sleep {
    handle: LoopHandle,
    deadline: Instant,
    fired: bool,
}

impl Sleep {
    pub fn new(handle: LoopHandle, dur: Duration) -> Self {
        Self { deadline: Instant::now() + dur, handle, fired: false }
    }

    pub fn until(handle: LoopHandle, deadline: Instant) -> Self {
        Self { deadline, handle, fired: false }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.fired || Instant::now() >= this.deadline {
            return Poll::Ready(());
        }
        this.fired = true;
        this.handle.register_timer(this.deadline, cx.waker().clone());
        Poll::Pending
    }
}

/// `uv::timeout` equivalent: a one-shot `Task` that resolves after `dur`.
pub fn timeout(handle: &LoopHandle, dur: Duration) -> Task<()> {
    let sleep = Sleep::new(handle.clone(), dur);
    Task::from_future(async move {
        sleep.await;
        Ok(())
    })
}

/// A repeating timer. Unlike `Sleep`, `Interval` is driven by polling
/// its `tick` method rather than being itself a single-shot future —
/// it has no terminal state.
pub struct Interval {
    handle: LoopHandle,
    period: Duration,
    next: Instant,
}

impl Interval {
    pub fn new(handle: LoopHandle, period: Duration) -> Self {
        let next = Instant::now() + period;
        Self { handle, period, next }
    }

    /// Waits for the next tick, then reschedules.
    pub async fn tick(&mut self) {
        Sleep::until(self.handle.clone(), self.next).await;
        self.next += self.period;
        // Catches up without a burst of immediate ticks if the loop
        // fell behind (a long-running check callback, GC pause, etc).
        let now = Instant::now();
        if self.next < now {
            self.next = now + self.period;
        }
    }
}

/// A callback invoked once per loop iteration, after I/O polling, for
/// as long as the returned guard is held. Mirrors `uv::check`, minus
/// the ability to stop and restart independently — dropping the guard
/// is the only way to remove it.
pub struct CheckGuard {
    active: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CheckGuard {
    pub fn stop(self) {
        self.active.store(false, std::sync::atomic::Ordering::Release);
    }
}

impl Drop for CheckGuard {
    fn drop(&mut self) {
        self.active.store(false, std::sync::atomic::Ordering::Release);
    }
}

pub fn register_check(handle: &LoopHandle, mut f: impl FnMut() + 'static) -> CheckGuard {
    let active = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let guard_flag = active.clone();
    handle.register_check(move || {
        if guard_flag.load(std::sync::atomic::Ordering::Acquire) {
            f();
        }
    });
    CheckGuard { active }
}

/// A `Send` handle that lets another thread wake the loop and run a
/// callback on it, matching `uv::async::send`/`uv::async::queue`.
#[derive(Clone)]
pub struct AsyncHandle {
    waker: WakeSender,
}

impl AsyncHandle {
    pub fn new(handle: &LoopHandle) -> Self {
        Self { waker: handle.waker() }
    }

    /// Fire-and-forget: runs `cb` on the loop thread as soon as it's
    /// next polled.
    pub fn send(&self, cb: impl FnOnce() + Send + 'static) {
        self.waker.post(cb);
    }

    /// `Task`-returning variant, for callers that want to `.await` the
    /// hop back onto the loop thread.
    pub fn queue(&self) -> Task<()> {
        let waker = self.waker.clone();
        Task::create(move |resolver| {
            waker.post(move || resolver.resolve(()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_core::EventLoop;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sleep_resolves_after_its_deadline() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let started = Instant::now();
        lp.block_on(Sleep::new(handle, Duration::from_millis(5)));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn timeout_task_resolves_ok() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let task = timeout(&handle, Duration::from_millis(1));
        lp.block_on(async move { task.await }).unwrap();
    }

    #[test]
    fn check_runs_once_per_iteration_until_dropped() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let guard = register_check(&handle, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..3 {
            lp.run_once();
        }
        assert!(hits.load(Ordering::SeqCst) >= 3);
        guard.stop();
        let before = hits.load(Ordering::SeqCst);
        lp.run_once();
        assert_eq!(hits.load(Ordering::SeqCst), before);
    }

    #[test]
    fn async_handle_delivers_from_another_thread() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let async_handle = AsyncHandle::new(&handle);
        let hit = Arc::new(AtomicUsize::new(0));
        let counter = hit.clone();
        let worker = std::thread::spawn(move || {
            async_handle.send(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });
        worker.join().unwrap();
        for _ in 0..4 {
            lp.run_once();
            if hit.load(Ordering::SeqCst) == 1 {
                break;
            }
        }
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
