//! Fan-out for promises with several consumers.

use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Rejection;
use crate::executor::Executor;
use crate::promise::{Promise, Resolver};

enum Fanout<T: Send + 'static, E: Rejection> {
    Pending(Vec<Resolver<T, E>>),
    Settled(Result<T, E>),
}

/// A promise with a list of subscribers.
///
/// Each call to [`SharedPromise::promise`] registers a new subscriber that
/// receives its own clone of the outcome, including subscribers that arrive
/// after settlement.
pub struct SharedPromise<T: Send + 'static, E: Rejection> {
    fanout: Arc<Mutex<Fanout<T, E>>>,
    executor: Executor,
}

impl<T, E> SharedPromise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Rejection,
{
    pub(crate) fn new(source: Promise<T, E>) -> Self {
        let executor = source.executor().clone();
        let fanout = Arc::new(Mutex::new(Fanout::Pending(Vec::new())));

        let target = Arc::clone(&fanout);
        source.on_settled(move |outcome| {
            let subscribers = match mem::replace(
                &mut *target.lock(),
                Fanout::Settled(outcome.clone()),
            ) {
                Fanout::Pending(subscribers) => subscribers,
                Fanout::Settled(_) => Vec::new(),
            };
            for subscriber in subscribers {
                subscriber.settle(outcome.clone());
            }
        });

        Self { fanout, executor }
    }

    /// Subscribe to the outcome.
    pub fn promise(&self) -> Promise<T, E> {
        let mut fanout = self.fanout.lock();
        match &mut *fanout {
            Fanout::Pending(subscribers) => {
                let (promise, resolver) = Promise::pending(&self.executor);
                subscribers.push(resolver);
                promise
            }
            Fanout::Settled(Ok(value)) => Promise::resolved(&self.executor, value.clone()),
            Fanout::Settled(Err(error)) => Promise::rejected(&self.executor, error.clone()),
        }
    }

    /// Number of subscribers still waiting.
    #[must_use]
    pub fn waiting(&self) -> usize {
        match &*self.fanout.lock() {
            Fanout::Pending(subscribers) => subscribers.len(),
            Fanout::Settled(_) => 0,
        }
    }
}

impl<T: Send + 'static, E: Rejection> Clone for SharedPromise<T, E> {
    fn clone(&self) -> Self {
        Self {
            fanout: Arc::clone(&self.fanout),
            executor: self.executor.clone(),
        }
    }
}

impl<T: Send + 'static, E: Rejection> fmt::Debug for SharedPromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = matches!(&*self.fanout.lock(), Fanout::Settled(_));
        f.debug_struct("SharedPromise")
            .field("settled", &settled)
            .finish()
    }
}
