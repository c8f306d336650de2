//! Single-assignment future with cooperative await.
//!
//! A [`Promise`] settles exactly once into fulfilled, rejected or
//! cancelled. Continuations chain with [`then`](Promise::then) /
//! [`catch`](Promise::catch); panics inside a continuation become
//! rejections of the derived promise. Waiting is cooperative: callers
//! block on [`wait`](Promise::wait), bound the wait with
//! [`wait_for`](Promise::wait_for), or `.await` the promise from async
//! code.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use thiserror::Error;

use crate::error::{BoxError, DispatchError, SharedError};

/// Why a promise did not fulfil.
#[derive(Error, Debug, Clone)]
pub enum PromiseError {
    /// The promise was cancelled before settling.
    #[error("promise was cancelled")]
    Cancelled,
    /// The promise was rejected with an error.
    #[error("{0}")]
    Rejected(SharedError),
    /// A panic escaped a promise continuation.
    #[error("panic in promise chain: {0}")]
    Panicked(String),
}

impl PromiseError {
    /// Reject with a boxed domain error.
    pub fn rejected(err: BoxError) -> Self {
        PromiseError::Rejected(Arc::from(err))
    }
}

impl From<PromiseError> for DispatchError {
    fn from(err: PromiseError) -> Self {
        match err {
            PromiseError::Cancelled => DispatchError::Cancelled,
            PromiseError::Rejected(e) => DispatchError::Domain(e),
            PromiseError::Panicked(text) => DispatchError::Panicked(text),
        }
    }
}

/// Terminal state of a promise.
#[derive(Clone, Debug)]
pub enum Settled<T> {
    /// The promise fulfilled with a value.
    Fulfilled(T),
    /// The promise rejected with an error.
    Rejected(PromiseError),
    /// The promise was cancelled.
    Cancelled,
}

type Subscriber<T> = Box<dyn FnOnce(&Settled<T>) + Send>;

enum State<T> {
    Pending {
        subscribers: Vec<Subscriber<T>>,
        wakers: Vec<Waker>,
    },
    Done(Settled<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// A single-assignment future value.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// The settling half of a pending [`Promise`].
pub struct Settle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Settle<T> {
    fn clone(&self) -> Self {
        Settle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// A pending promise and its settling handle.
    pub fn pending() -> (Promise<T>, Settle<T>) {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::Pending {
                subscribers: Vec::new(),
                wakers: Vec::new(),
            }),
            cond: Condvar::new(),
        });
        (
            Promise {
                inner: Arc::clone(&inner),
            },
            Settle { inner },
        )
    }

    /// An already fulfilled promise.
    pub fn resolved(value: T) -> Promise<T> {
        Promise {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Done(Settled::Fulfilled(value))),
                cond: Condvar::new(),
            }),
        }
    }

    /// An already rejected promise.
    pub fn rejected(err: PromiseError) -> Promise<T> {
        Promise {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Done(Settled::Rejected(err))),
                cond: Condvar::new(),
            }),
        }
    }

    /// Run `f` on a background thread, settling with its outcome. A panic
    /// in `f` rejects the promise.
    pub fn spawn(f: impl FnOnce() -> Result<T, BoxError> + Send + 'static) -> Promise<T> {
        let (promise, settle) = Promise::pending();
        std::thread::spawn(move || match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => settle.resolve(value),
            Ok(Err(err)) => settle.reject(PromiseError::rejected(err)),
            Err(panic) => settle.reject(PromiseError::Panicked(panic_text(panic))),
        });
        promise
    }

    /// Whether the promise has settled.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.inner.state.lock().expect("promise poisoned"), State::Done(_))
    }

    /// Cancel the promise if still pending.
    pub fn cancel(&self) {
        settle_inner(&self.inner, Settled::Cancelled);
    }

    /// Register `f` to run when the promise settles. Runs immediately when
    /// already settled.
    pub fn subscribe(&self, f: impl FnOnce(&Settled<T>) + Send + 'static) {
        let mut state = self.inner.state.lock().expect("promise poisoned");
        if let State::Pending { subscribers, .. } = &mut *state {
            subscribers.push(Box::new(f));
            return;
        }
        let terminal = match &*state {
            State::Done(settled) => settled as *const Settled<T>,
            State::Pending { .. } => unreachable!("checked above"),
        };
        drop(state);
        // SAFETY: once Done the state is never mutated again and
        // `self.inner` keeps it alive for the duration of the call.
        // Running outside the lock lets `f` re-enter the promise.
        let terminal: &Settled<T> = unsafe { &*terminal };
        f(terminal);
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Chain a continuation over the fulfilled value.
    pub fn then<U: Send + 'static>(
        &self,
        f: impl FnOnce(T) -> U + Send + 'static,
    ) -> Promise<U> {
        let (next, settle) = Promise::pending();
        self.subscribe(move |settled| match settled {
            Settled::Fulfilled(value) => {
                let value = value.clone();
                match catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(u) => settle.resolve(u),
                    Err(panic) => settle.reject(PromiseError::Panicked(panic_text(panic))),
                }
            }
            Settled::Rejected(err) => settle.reject(err.clone()),
            Settled::Cancelled => settle.cancel(),
        });
        next
    }

    /// Chain a recovery over a rejection. Fulfilled and cancelled states
    /// pass through untouched.
    pub fn catch(
        &self,
        f: impl FnOnce(PromiseError) -> Result<T, PromiseError> + Send + 'static,
    ) -> Promise<T> {
        let (next, settle) = Promise::pending();
        self.subscribe(move |settled| match settled {
            Settled::Fulfilled(value) => settle.resolve(value.clone()),
            Settled::Rejected(err) => {
                let err = err.clone();
                match catch_unwind(AssertUnwindSafe(move || f(err))) {
                    Ok(Ok(value)) => settle.resolve(value),
                    Ok(Err(err)) => settle.reject(err),
                    Err(panic) => settle.reject(PromiseError::Panicked(panic_text(panic))),
                }
            }
            Settled::Cancelled => settle.cancel(),
        });
        next
    }

    /// Block until the promise settles.
    pub fn wait(&self) -> Result<T, PromiseError> {
        let mut state = self.inner.state.lock().expect("promise poisoned");
        loop {
            match &*state {
                State::Done(settled) => return settled.clone().into_result(),
                State::Pending { .. } => {
                    state = self.inner.cond.wait(state).expect("promise poisoned");
                }
            }
        }
    }

    /// Block until the promise settles or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> Option<Result<T, PromiseError>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("promise poisoned");
        loop {
            match &*state {
                State::Done(settled) => return Some(settled.clone().into_result()),
                State::Pending { .. } => {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (next, timed_out) = self
                        .inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .expect("promise poisoned");
                    state = next;
                    if timed_out.timed_out() {
                        if let State::Done(settled) = &*state {
                            return Some(settled.clone().into_result());
                        }
                        return None;
                    }
                }
            }
        }
    }

    /// Join promises: fulfils with every value in order, rejects or
    /// cancels with the first failure.
    pub fn all(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        if promises.is_empty() {
            return Promise::resolved(Vec::new());
        }
        let (joined, settle) = Promise::pending();
        let slots: Arc<Mutex<Vec<Option<T>>>> =
            Arc::new(Mutex::new(promises.iter().map(|_| None).collect()));
        let remaining = Arc::new(AtomicUsize::new(promises.len()));
        for (i, promise) in promises.iter().enumerate() {
            let slots = Arc::clone(&slots);
            let remaining = Arc::clone(&remaining);
            let settle = settle.clone();
            promise.subscribe(move |settled| match settled {
                Settled::Fulfilled(value) => {
                    slots.lock().expect("slots poisoned")[i] = Some(value.clone());
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let values = slots
                            .lock()
                            .expect("slots poisoned")
                            .iter_mut()
                            .map(|slot| slot.take().expect("all slots filled"))
                            .collect();
                        settle.resolve(values);
                    }
                }
                Settled::Rejected(err) => settle.reject(err.clone()),
                Settled::Cancelled => settle.cancel(),
            });
        }
        joined
    }
}

impl<T> Settled<T> {
    fn into_result(self) -> Result<T, PromiseError> {
        match self {
            Settled::Fulfilled(value) => Ok(value),
            Settled::Rejected(err) => Err(err),
            Settled::Cancelled => Err(PromiseError::Cancelled),
        }
    }
}

impl<T: Send + 'static> Settle<T> {
    /// Fulfil the promise. No-op if already settled.
    pub fn resolve(&self, value: T) {
        settle_inner(&self.inner, Settled::Fulfilled(value));
    }

    /// Reject the promise. No-op if already settled.
    pub fn reject(&self, err: PromiseError) {
        settle_inner(&self.inner, Settled::Rejected(err));
    }

    /// Cancel the promise. No-op if already settled.
    pub fn cancel(&self) {
        settle_inner(&self.inner, Settled::Cancelled);
    }
}

fn settle_inner<T>(inner: &Arc<Inner<T>>, settled: Settled<T>) {
    let (subscribers, wakers) = {
        let mut state = inner.state.lock().expect("promise poisoned");
        match &mut *state {
            State::Done(_) => return,
            State::Pending {
                subscribers,
                wakers,
            } => {
                let subscribers = std::mem::take(subscribers);
                let wakers = std::mem::take(wakers);
                *state = State::Done(settled);
                (subscribers, wakers)
            }
        }
    };
    inner.cond.notify_all();
    for waker in wakers {
        waker.wake();
    }
    let state = inner.state.lock().expect("promise poisoned");
    let terminal = match &*state {
        State::Done(s) => s as *const Settled<T>,
        State::Pending { .. } => unreachable!("settled above"),
    };
    drop(state);
    // SAFETY: once Done the state is never mutated again and the caller's
    // Arc keeps it alive; subscribers run outside the lock so they may
    // re-enter the promise.
    let terminal: &Settled<T> = unsafe { &*terminal };
    for subscriber in subscribers {
        subscriber(terminal);
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T, PromiseError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock().expect("promise poisoned");
        match &mut *state {
            State::Done(settled) => Poll::Ready(settled.clone().into_result()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_and_waits() {
        let (p, s) = Promise::pending();
        s.resolve(41);
        assert_eq!(p.wait().unwrap(), 41);
    }

    #[test]
    fn then_chains_values() {
        let (p, s) = Promise::pending();
        let doubled = p.then(|v: i32| v * 2);
        s.resolve(21);
        assert_eq!(doubled.wait().unwrap(), 42);
    }

    #[test]
    fn panic_in_then_becomes_rejection() {
        let (p, s) = Promise::<i32>::pending();
        let chained = p.then(|_| -> i32 { panic!("kaboom") });
        s.resolve(1);
        match chained.wait() {
            Err(PromiseError::Panicked(text)) => assert!(text.contains("kaboom")),
            other => panic!("expected panic rejection, got {other:?}"),
        }
    }

    #[test]
    fn catch_recovers() {
        let p = Promise::<i32>::rejected(PromiseError::rejected("nope".into()));
        let recovered = p.catch(|_| Ok(7));
        assert_eq!(recovered.wait().unwrap(), 7);
    }

    #[test]
    fn cancelled_wait_reports_cancellation() {
        let (p, _s) = Promise::<i32>::pending();
        p.cancel();
        assert!(matches!(p.wait(), Err(PromiseError::Cancelled)));
    }

    #[test]
    fn first_settle_wins() {
        let (p, s) = Promise::pending();
        s.resolve(1);
        s.resolve(2);
        assert_eq!(p.wait().unwrap(), 1);
    }

    #[test]
    fn all_preserves_order() {
        let (p1, s1) = Promise::pending();
        let (p2, s2) = Promise::pending();
        let joined = Promise::all(vec![p1, p2]);
        s2.resolve("b");
        s1.resolve("a");
        assert_eq!(joined.wait().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn all_rejects_on_first_failure() {
        let (p1, _s1) = Promise::<i32>::pending();
        let p2 = Promise::<i32>::rejected(PromiseError::rejected("bad".into()));
        let joined = Promise::all(vec![p1, p2]);
        assert!(matches!(joined.wait(), Err(PromiseError::Rejected(_))));
    }

    #[test]
    fn wait_for_times_out() {
        let (p, _s) = Promise::<i32>::pending();
        assert!(p.wait_for(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn spawn_settles_from_thread() {
        let p = Promise::spawn(|| Ok(5));
        assert_eq!(p.wait().unwrap(), 5);
    }

    #[test]
    fn promises_await_as_futures() {
        let (p, s) = Promise::pending();
        s.resolve(9);
        let value = futures::executor::block_on(p);
        assert_eq!(value.unwrap(), 9);
    }

    #[test]
    fn concurrent_waiters_all_observe() {
        let (p, s) = Promise::pending();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = p.clone();
                std::thread::spawn(move || p.wait().unwrap())
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));
        s.resolve(11);
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 11);
        }
    }
}
