//! `Task<T>` — a single-shot, lazily-resumed future.
//!
//! Grounded on the teacher's `runtime::async::task` module: a task owns a
//! boxed continuation, carries an atomic state, and is rescheduled via a
//! `Waker`. Here the continuation is either a `resolve`/`reject` pair
//! handed to the `create` callback (promise-executor style) or, for
//! combinators like `then` and `finally`, a boxed driver future —
//! `Task<T>` implements [`std::future::Future`] either way, so it
//! composes with `.await` regardless of which variant backs it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::loop_core::LoopHandle;

enum State<T> {
    Pending { waker: Option<Waker> },
    Resolved(T),
    Rejected(Error),
    /// The value has already been handed to an awaiter; a second poll
    /// would be a bug in the caller, not a valid state transition.
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    /// Resolve, doing nothing if already settled. Returns `true` only the
    /// first time a resolution sticks — second and later calls are no-ops.
    fn settle(&self, outcome: std::result::Result<T, Error>) -> bool {
        let mut guard = self.state.lock().unwrap();
        if !matches!(&*guard, State::Pending { .. }) {
            return false;
        }
        let waker = match std::mem::replace(&mut *guard, State::Taken) {
            State::Pending { waker } => waker,
            _ => unreachable!(),
        };
        *guard = match outcome {
            Ok(v) => State::Resolved(v),
            Err(e) => State::Rejected(e),
        };
        drop(guard);
        if let Some(w) = waker {
            w.wake();
        }
        true
    }
}

/// Handed to the `create` callback; calling it a second time is a no-op.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Resolver<T> {
    pub fn resolve(&self, value: T) {
        self.shared.settle(Ok(value));
    }

    pub fn reject(&self, err: Error) {
        self.shared.settle(Err(err));
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

enum Inner<T> {
    Settled(Arc<Shared<T>>),
    Driven(Pin<Box<dyn Future<Output = std::result::Result<T, Error>>>>),
}

/// A single-shot future: created suspended, resolved or rejected exactly
/// once, terminal thereafter.
pub struct Task<T>(Inner<T>);

impl<T: 'static> Task<T> {
    /// Runs `f(resolver)` synchronously in the caller's context — `f` may
    /// resolve immediately, stash the resolver for a callback to fire
    /// later, or both race (the first call wins, per `Resolver::resolve`).
    pub fn create<F>(f: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let shared = Arc::new(Shared { state: Mutex::new(State::Pending { waker: None }) });
        let resolver = Resolver { shared: shared.clone() };
        f(resolver);
        Self(Inner::Settled(shared))
    }

    /// A task that is already resolved.
    pub fn resolved(value: T) -> Self {
        let shared = Arc::new(Shared { state: Mutex::new(State::Resolved(value)) });
        Self(Inner::Settled(shared))
    }

    /// A task that is already rejected.
    pub fn rejected(err: Error) -> Self {
        let shared = Arc::new(Shared { state: Mutex::new(State::Rejected(err)) });
        Self(Inner::Settled(shared))
    }

    /// Wraps an arbitrary future as a `Task`, used internally by `then`,
    /// `finally` and anywhere else a combinator needs to drive a future
    /// rather than a resolver pair.
    pub(crate) fn from_future(fut: impl Future<Output = std::result::Result<T, Error>> + 'static) -> Self {
        Self(Inner::Driven(Box::pin(fut)))
    }

    /// Drives the task to completion without anyone awaiting it.
    ///
    /// A fire-and-forget task must never let an uncaught rejection escape
    /// into the process — it's logged instead. The `Task` lives inside the
    /// boxed future handed to the loop's executor, so its final drop
    /// happens when the executor retires a completed entry on a later
    /// tick, mirroring libuv's deferred-close discipline for handles that
    /// finish off the call stack that started them.
    pub fn start(self, on: &LoopHandle) {
        on.spawn(async move {
            if let Err(e) = self.await {
                tracing::error!(error = %e, "uncaught error in fire-and-forget task");
            }
        });
    }

    /// Lifts a two-armed resumption into a `Task<U>`.
    pub fn then<U: 'static>(
        self,
        ok: impl FnOnce(T) -> U + 'static,
        err: impl FnOnce(Error) -> U + 'static,
    ) -> Task<U> {
        Task::from_future(async move {
            match self.await {
                Ok(v) => Ok(ok(v)),
                Err(e) => Ok(err(e)),
            }
        })
    }

    pub fn finally(self, f: impl FnOnce() + 'static) -> Task<()> {
        self.then(move |_| f(), move |_| f())
    }
}

impl<T> Future for Task<T> {
    type Output = std::result::Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.0 {
            Inner::Driven(fut) => fut.as_mut().poll(cx),
            Inner::Settled(shared) => {
                let mut guard = shared.state.lock().unwrap();
                match &mut *guard {
                    State::Pending { waker } => {
                        *waker = Some(cx.waker().clone());
                        Poll::Pending
                    }
                    State::Resolved(_) | State::Rejected(_) => {
                        match std::mem::replace(&mut *guard, State::Taken) {
                            State::Resolved(v) => Poll::Ready(Ok(v)),
                            State::Rejected(e) => Poll::Ready(Err(e)),
                            _ => unreachable!(),
                        }
                    }
                    State::Taken => panic!("Task polled after its value was already taken"),
                }
            }
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &self.0 {
            Inner::Driven(_) => "Driven",
            Inner::Settled(shared) => match &*shared.state.lock().unwrap() {
                State::Pending { .. } => "Pending",
                State::Resolved(_) => "Resolved",
                State::Rejected(_) => "Rejected",
                State::Taken => "Taken",
            },
        };
        f.debug_struct("Task").field("state", &label).finish()
    }
}

/// Completes when the first of `tasks` completes; the rest continue
/// running to completion in the background but their results are
/// discarded. If the winner rejects, `race` rejects.
pub async fn race<T: 'static>(tasks: Vec<Task<T>>) -> std::result::Result<T, Error> {
    use std::future::poll_fn;

    let mut tasks = tasks;
    poll_fn(move |cx| {
        for task in tasks.iter_mut() {
            if let Poll::Ready(out) = Pin::new(task).poll(cx) {
                return Poll::Ready(out);
            }
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_core::EventLoop;

    #[test]
    fn resolve_is_idempotent() {
        let task: Task<i32> = Task::create(|resolver| {
            resolver.resolve(1);
            resolver.resolve(2);
        });
        let mut lp = EventLoop::new().unwrap();
        let result = lp.block_on(async move { task.await });
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn reject_then_resolve_is_no_op() {
        let task: Task<i32> = Task::create(|resolver| {
            resolver.reject(Error::Cancelled);
            resolver.resolve(42);
        });
        let mut lp = EventLoop::new().unwrap();
        let result = lp.block_on(async move { task.await });
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn pre_resolved_task_awaits_immediately() {
        let task = Task::resolved(7);
        let mut lp = EventLoop::new().unwrap();
        assert_eq!(lp.block_on(async move { task.await }).unwrap(), 7);
    }

    #[test]
    fn then_maps_both_arms() {
        let ok_task: Task<i32> = Task::resolved(10);
        let mapped = ok_task.then(|v| v * 2, |_| -1);
        let mut lp = EventLoop::new().unwrap();
        assert_eq!(lp.block_on(async move { mapped.await }).unwrap(), 20);

        let err_task: Task<i32> = Task::rejected(Error::Cancelled);
        let mapped = err_task.then(|v| v * 2, |_| -1);
        let mut lp = EventLoop::new().unwrap();
        assert_eq!(lp.block_on(async move { mapped.await }).unwrap(), -1);
    }

    #[test]
    fn finally_runs_on_both_arms() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task: Task<i32> = Task::resolved(1);
        let wrapped = task.finally(move || { c.fetch_add(1, Ordering::SeqCst); });
        let mut lp = EventLoop::new().unwrap();
        lp.block_on(async move { wrapped.await }).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn race_returns_first_winner_and_ignores_the_rest() {
        let a: Task<i32> = Task::resolved(1);
        let b: Task<i32> = Task::create(|_resolver| {
            // Never resolved: must not block the race.
        });
        let mut lp = EventLoop::new().unwrap();
        let winner = lp.block_on(race(vec![a, b]));
        assert_eq!(winner.unwrap(), 1);
    }
}
