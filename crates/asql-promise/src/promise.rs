//! The promise cell and its two handles.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{BrokenPromise, Rejection};
use crate::executor::{Executor, Task};
use crate::shared::SharedPromise;

type Callback<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

enum Waiter<T, E> {
    /// A registered continuation.
    Callback(Callback<T, E>),
    /// A task awaiting the promise directly.
    Task(Waker),
}

enum State<T, E> {
    Pending(Option<Waiter<T, E>>),
    Settled(Result<T, E>),
    /// The outcome has been handed to its consumer.
    Consumed,
}

impl<T, E> State<T, E> {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending(_) => "pending",
            Self::Settled(Ok(_)) => "resolved",
            Self::Settled(Err(_)) => "rejected",
            Self::Consumed => "consumed",
        }
    }
}

struct Cell<T, E> {
    state: Mutex<State<T, E>>,
    executor: Executor,
}

impl<T: Send + 'static, E: Send + 'static> Cell<T, E> {
    fn new(executor: Executor, state: State<T, E>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            executor,
        })
    }

    /// Store the outcome. Returns `false` if the cell was already settled.
    fn settle(&self, outcome: Result<T, E>) -> bool {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Pending(None) => {
                *state = State::Settled(outcome);
                true
            }
            State::Pending(Some(Waiter::Task(waker))) => {
                *state = State::Settled(outcome);
                drop(state);
                waker.wake();
                true
            }
            State::Pending(Some(Waiter::Callback(callback))) => {
                drop(state);
                self.executor
                    .schedule(Task::new(move || callback(outcome)));
                true
            }
            settled => {
                *state = settled;
                false
            }
        }
    }

    /// Register the single consuming continuation.
    fn subscribe(&self, callback: Callback<T, E>) {
        let mut state = self.state.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Settled(outcome) => {
                drop(state);
                self.executor
                    .schedule(Task::new(move || callback(outcome)));
            }
            State::Pending(_) => {
                *state = State::Pending(Some(Waiter::Callback(callback)));
            }
            // Already awaited to completion; nothing left to deliver.
            State::Consumed => {}
        }
    }
}

/// The read side of a single-assignment result cell.
///
/// Chaining methods consume the promise, so each cell feeds exactly one
/// continuation. Use [`Promise::shared`] to fan an outcome out.
///
/// A promise is also a future resolving to `Result<T, E>`.
#[must_use = "a promise does nothing unless chained or awaited"]
pub struct Promise<T, E> {
    cell: Arc<Cell<T, E>>,
}

/// The write side of a promise.
///
/// Clones share the same cell; whichever settles first wins and later
/// attempts return `false`. When the last clone is dropped without settling,
/// the promise rejects with [`BrokenPromise`].
pub struct Resolver<T: Send + 'static, E: Rejection> {
    guard: Arc<ResolverGuard<T, E>>,
}

struct ResolverGuard<T: Send + 'static, E: Rejection> {
    cell: Arc<Cell<T, E>>,
}

impl<T: Send + 'static, E: Rejection> Drop for ResolverGuard<T, E> {
    fn drop(&mut self) {
        if self.cell.settle(Err(E::from(BrokenPromise))) {
            tracing::debug!("resolver dropped without settling its promise");
        }
    }
}

impl<T: Send + 'static, E: Rejection> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<T: Send + 'static, E: Rejection> Resolver<T, E> {
    /// Fulfil the promise.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Settle with a ready outcome.
    ///
    /// Returns `false`, leaving the first outcome in place, if the promise
    /// was already settled.
    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        let accepted = self.guard.cell.settle(outcome);
        if !accepted {
            tracing::warn!("ignoring second settlement of an already settled promise");
        }
        accepted
    }

    /// Whether the promise has been settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.guard.cell.state.lock(), State::Pending(_))
    }

    fn forward(self, step: Step<T, E>) {
        match step {
            Step::Ready(outcome) => {
                self.settle(outcome);
            }
            Step::Chain(inner) => inner.on_settled(move |outcome| {
                self.settle(outcome);
            }),
        }
    }
}

impl<T: Send + 'static, E: Rejection> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.guard.cell.state.lock().name())
            .finish()
    }
}

/// What a continuation hands to the next promise in a chain.
pub enum Step<T, E> {
    /// An outcome available right away.
    Ready(Result<T, E>),
    /// Another promise whose outcome should be adopted.
    Chain(Promise<T, E>),
}

/// Values a continuation may return.
///
/// `Result<T, E>` settles the next promise directly; a `Promise<T, E>` is
/// flattened into it.
pub trait IntoStep<E> {
    /// Value type of the next promise.
    type Output;

    /// Convert into a [`Step`].
    fn into_step(self) -> Step<Self::Output, E>;
}

impl<T, E> IntoStep<E> for Result<T, E> {
    type Output = T;

    fn into_step(self) -> Step<T, E> {
        Step::Ready(self)
    }
}

impl<T, E> IntoStep<E> for Promise<T, E> {
    type Output = T;

    fn into_step(self) -> Step<T, E> {
        Step::Chain(self)
    }
}

impl<T, E> IntoStep<E> for Step<T, E> {
    type Output = T;

    fn into_step(self) -> Step<T, E> {
        self
    }
}

impl<T: Send + 'static, E: Rejection> Promise<T, E> {
    /// Create an unsettled promise and its resolver.
    pub fn pending(executor: &Executor) -> (Self, Resolver<T, E>) {
        let cell = Cell::new(executor.clone(), State::Pending(None));
        let resolver = Resolver {
            guard: Arc::new(ResolverGuard {
                cell: Arc::clone(&cell),
            }),
        };
        (Self { cell }, resolver)
    }

    /// A promise that is already fulfilled.
    pub fn resolved(executor: &Executor, value: T) -> Self {
        Self {
            cell: Cell::new(executor.clone(), State::Settled(Ok(value))),
        }
    }

    /// A promise that is already rejected.
    pub fn rejected(executor: &Executor, error: E) -> Self {
        Self {
            cell: Cell::new(executor.clone(), State::Settled(Err(error))),
        }
    }

    /// The execution context this promise's continuations run on.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.cell.executor
    }

    /// Whether the promise is still waiting for its outcome.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.cell.state.lock(), State::Pending(_))
    }

    /// Run `callback` with the outcome once the promise settles.
    ///
    /// If it has already settled the callback is queued right away. It
    /// never runs on the calling thread.
    pub fn on_settled<F>(self, callback: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.cell.subscribe(Box::new(callback));
    }

    /// Chain a continuation on success.
    ///
    /// The callback's return value, either a `Result` or another promise,
    /// becomes the outcome of the returned promise. A rejection skips the
    /// callback and propagates unchanged.
    pub fn then<R, F>(self, on_ok: F) -> Promise<R::Output, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoStep<E>,
        R::Output: Send + 'static,
    {
        let (next, resolver) = Promise::pending(&self.cell.executor);
        self.on_settled(move |outcome| match outcome {
            Ok(value) => resolver.forward(on_ok(value).into_step()),
            Err(error) => {
                resolver.reject(error);
            }
        });
        next
    }

    /// Chain continuations for both outcomes.
    pub fn then_else<R, F, G>(self, on_ok: F, on_err: G) -> Promise<R::Output, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(E) -> R + Send + 'static,
        R: IntoStep<E>,
        R::Output: Send + 'static,
    {
        let (next, resolver) = Promise::pending(&self.cell.executor);
        self.on_settled(move |outcome| {
            let step = match outcome {
                Ok(value) => on_ok(value),
                Err(error) => on_err(error),
            };
            resolver.forward(step.into_step());
        });
        next
    }

    /// Transform the fulfilled value.
    pub fn map<U, F>(self, f: F) -> Promise<U, E>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        self.then(move |value| Ok::<U, E>(f(value)))
    }

    /// Recover from a rejection.
    pub fn catch<R, G>(self, on_err: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> R + Send + 'static,
        R: IntoStep<E, Output = T>,
    {
        let (next, resolver) = Promise::pending(&self.cell.executor);
        self.on_settled(move |outcome| match outcome {
            Ok(value) => {
                resolver.resolve(value);
            }
            Err(error) => resolver.forward(on_err(error).into_step()),
        });
        next
    }

    /// Turn this promise into one any number of subscribers can observe.
    pub fn shared(self) -> SharedPromise<T, E>
    where
        T: Clone,
        E: Clone,
    {
        SharedPromise::new(self)
    }
}

impl<T: Send + 'static, E: Rejection> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.state.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Settled(outcome) => Poll::Ready(outcome),
            State::Pending(waiter) => {
                let waker = match waiter {
                    Some(Waiter::Task(waker)) if waker.will_wake(cx.waker()) => waker,
                    _ => cx.waker().clone(),
                };
                *state = State::Pending(Some(Waiter::Task(waker)));
                Poll::Pending
            }
            // Polled again after completion; there is nothing more to yield.
            State::Consumed => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.cell.state.lock().name())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::executor::RunQueue;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Broken,
        Failed(&'static str),
    }

    impl From<BrokenPromise> for TestError {
        fn from(_: BrokenPromise) -> Self {
            Self::Broken
        }
    }

    fn context() -> (Executor, RunQueue) {
        Executor::new()
    }

    fn outcome<T: Send + 'static>(
        promise: Promise<T, TestError>,
    ) -> Arc<Mutex<Option<Result<T, TestError>>>> {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        promise.on_settled(move |o| *out.lock() = Some(o));
        slot
    }

    #[test]
    fn test_resolve_does_not_run_continuation_inline() {
        let (executor, mut queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        let slot = outcome(promise.map(|n| n + 1));

        resolver.resolve(1);
        assert!(slot.lock().is_none());

        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Ok(2)));
    }

    #[test]
    fn test_second_settlement_is_ignored() {
        let (executor, mut queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = outcome(promise.map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            n
        }));

        assert!(resolver.resolve(7));
        assert!(!resolver.resolve(8));
        assert!(!resolver.reject(TestError::Failed("late")));
        queue.run_pending();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*slot.lock(), Some(Ok(7)));
    }

    #[test]
    fn test_continuation_registered_after_settlement_still_runs() {
        let (executor, mut queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        resolver.resolve(5);
        queue.run_pending();

        let slot = outcome(promise);
        assert!(slot.lock().is_none());
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Ok(5)));
    }

    #[test]
    fn test_rejection_skips_on_ok() {
        let (executor, mut queue) = context();
        let promise = Promise::<u32, TestError>::rejected(&executor, TestError::Failed("server"));
        let slot = outcome(promise.then(|_| -> Result<u32, TestError> {
            panic!("on_ok must not run for a rejection")
        }));

        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Failed("server"))));
    }

    #[test]
    fn test_then_else_and_catch_recover() {
        let (executor, mut queue) = context();
        let failed = Promise::<u32, TestError>::rejected(&executor, TestError::Failed("x"));
        let recovered = outcome(failed.then_else(Ok::<u32, TestError>, |_| Ok(0)));

        let failed = Promise::<u32, TestError>::rejected(&executor, TestError::Failed("y"));
        let caught = outcome(failed.catch(|_| Ok::<u32, TestError>(99)));

        queue.run_pending();
        assert_eq!(*recovered.lock(), Some(Ok(0)));
        assert_eq!(*caught.lock(), Some(Ok(99)));
    }

    #[test]
    fn test_then_flattens_returned_promise() {
        let (executor, mut queue) = context();
        let (outer, outer_resolver) = Promise::<u32, TestError>::pending(&executor);
        let (inner, inner_resolver) = Promise::<String, TestError>::pending(&executor);

        let slot = outcome(outer.then(move |_| inner));
        outer_resolver.resolve(1);
        queue.run_pending();
        assert!(slot.lock().is_none());

        inner_resolver.resolve("done".to_string());
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Ok("done".to_string())));
    }

    #[test]
    fn test_chain_composes_like_single_continuation() {
        let (executor, mut queue) = context();
        let f = |n: u32| n * 3;
        let g = |n: u32| n + 4;

        let chained = outcome(Promise::<u32, TestError>::resolved(&executor, 5).map(f).map(g));
        let composed =
            outcome(Promise::<u32, TestError>::resolved(&executor, 5).map(move |n| g(f(n))));

        queue.run_pending();
        assert_eq!(*chained.lock(), *composed.lock());
        assert_eq!(*chained.lock(), Some(Ok(19)));
    }

    #[test]
    fn test_dropped_resolver_breaks_promise() {
        let (executor, mut queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        let slot = outcome(promise);

        let clone = resolver.clone();
        drop(resolver);
        queue.run_pending();
        assert!(slot.lock().is_none());

        drop(clone);
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Broken)));
    }

    #[test]
    fn test_panicking_continuation_breaks_downstream() {
        let (executor, mut queue) = context();
        let promise = Promise::<u32, TestError>::resolved(&executor, 1);
        let slot = outcome(promise.then(|_| -> Result<u32, TestError> { panic!("boom") }));

        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Broken)));
    }

    #[tokio::test]
    async fn test_await_resolved_from_another_task() {
        let executor = Executor::spawn();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            resolver.resolve(42);
        });

        assert_eq!(promise.await, Ok(42));
    }

    #[test]
    fn test_awaiting_task_is_woken_by_settlement() {
        let (executor, _queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        let mut task = tokio_test::task::spawn(promise);

        tokio_test::assert_pending!(task.poll());
        assert!(!task.is_woken());

        resolver.resolve(3);
        assert!(task.is_woken());
        assert_eq!(tokio_test::assert_ready!(task.poll()), Ok(3));
    }

    #[tokio::test]
    async fn test_await_chain() {
        let executor = Executor::spawn();
        let promise = Promise::<u32, TestError>::resolved(&executor, 2)
            .map(|n| n * 10)
            .then(|n| Ok::<_, TestError>(n.to_string()));

        assert_eq!(promise.await, Ok("20".to_string()));
    }

    #[test]
    fn test_debug_reports_state() {
        let (executor, _queue) = context();
        let (promise, resolver) = Promise::<u32, TestError>::pending(&executor);
        assert_eq!(format!("{promise:?}"), "Promise { state: \"pending\" }");
        resolver.reject(TestError::Failed("x"));
        assert_eq!(format!("{promise:?}"), "Promise { state: \"rejected\" }");
        assert!(resolver.is_settled());
    }
}
