//! Aggregation over many promises.
//!
//! Both combinators are fail-fast: the first rejection rejects the aggregate
//! at once, without waiting for the remaining inputs. Outcomes arriving after
//! that are discarded.

use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Rejection;
use crate::executor::Executor;
use crate::promise::{Promise, Resolver};

struct Join<T: Send + 'static, E: Rejection> {
    slots: Vec<Option<T>>,
    remaining: usize,
    resolver: Option<Resolver<Vec<T>, E>>,
}

/// Wait for every promise, yielding their values in input order.
///
/// An empty input resolves immediately with an empty vector.
pub fn all<T, E, I>(executor: &Executor, promises: I) -> Promise<Vec<T>, E>
where
    I: IntoIterator<Item = Promise<T, E>>,
    T: Send + 'static,
    E: Rejection,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (aggregate, resolver) = Promise::pending(executor);

    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return aggregate;
    }

    let join = Arc::new(Mutex::new(Join {
        slots: promises.iter().map(|_| None).collect(),
        remaining: promises.len(),
        resolver: Some(resolver),
    }));

    for (index, promise) in promises.into_iter().enumerate() {
        let join = Arc::clone(&join);
        promise.on_settled(move |outcome| {
            let mut join = join.lock();
            match outcome {
                Ok(value) => {
                    join.slots[index] = Some(value);
                    join.remaining -= 1;
                    if join.remaining == 0 {
                        if let Some(resolver) = join.resolver.take() {
                            let values = join.slots.drain(..).flatten().collect();
                            drop(join);
                            resolver.resolve(values);
                        }
                    }
                }
                Err(error) => {
                    if let Some(resolver) = join.resolver.take() {
                        drop(join);
                        tracing::trace!(index, "aggregate rejected by input");
                        resolver.reject(error);
                    }
                }
            }
        });
    }

    aggregate
}

/// Wait for every keyed promise, yielding a map in input order.
///
/// Each key stays attached to its own promise no matter in which order the
/// inputs settle. A repeated key keeps its first position and the value of
/// its last occurrence.
pub fn all_keyed<K, T, E, I>(executor: &Executor, promises: I) -> Promise<IndexMap<K, T>, E>
where
    I: IntoIterator<Item = (K, Promise<T, E>)>,
    K: Hash + Eq + Send + 'static,
    T: Send + 'static,
    E: Rejection,
{
    let (keys, promises): (Vec<K>, Vec<Promise<T, E>>) = promises.into_iter().unzip();
    all(executor, promises).map(move |values| keys.into_iter().zip(values).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::BrokenPromise;
    use crate::executor::RunQueue;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Broken,
        Failed(u32),
    }

    impl From<BrokenPromise> for TestError {
        fn from(_: BrokenPromise) -> Self {
            Self::Broken
        }
    }

    fn capture<T: Send + 'static>(
        promise: Promise<T, TestError>,
    ) -> Arc<Mutex<Option<Result<T, TestError>>>> {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        promise.on_settled(move |o| *out.lock() = Some(o));
        slot
    }

    fn context() -> (Executor, RunQueue) {
        Executor::new()
    }

    #[test]
    fn test_all_preserves_input_order() {
        let (executor, mut queue) = context();
        let (a, ra) = Promise::<u32, TestError>::pending(&executor);
        let (b, rb) = Promise::<u32, TestError>::pending(&executor);
        let (c, rc) = Promise::<u32, TestError>::pending(&executor);
        let slot = capture(all(&executor, [a, b, c]));

        rc.resolve(3);
        ra.resolve(1);
        queue.run_pending();
        assert!(slot.lock().is_none());

        rb.resolve(2);
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Ok(vec![1, 2, 3])));
    }

    #[test]
    fn test_all_empty_resolves_immediately() {
        let (executor, mut queue) = context();
        let slot = capture(all::<u32, TestError, _>(&executor, Vec::new()));
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Ok(Vec::new())));
    }

    #[test]
    fn test_all_keyed_independent_of_resolution_order() {
        let (executor, mut queue) = context();
        let (f1, r1) = Promise::<&'static str, TestError>::pending(&executor);
        let (f2, r2) = Promise::<&'static str, TestError>::pending(&executor);
        let slot = capture(all_keyed(&executor, [("k1", f1), ("k2", f2)]));

        r2.resolve("r2");
        r1.resolve("r1");
        queue.run_pending();

        let map = slot.lock().take().unwrap().unwrap();
        assert_eq!(map.get("k1"), Some(&"r1"));
        assert_eq!(map.get("k2"), Some(&"r2"));
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["k1", "k2"]);
    }

    #[test]
    fn test_all_keyed_fails_fast() {
        let (executor, mut queue) = context();
        let (f1, r1) = Promise::<u32, TestError>::pending(&executor);
        let (f2, r2) = Promise::<u32, TestError>::pending(&executor);
        let slot = capture(all_keyed(&executor, [("k1", f1), ("k2", f2)]));

        r1.reject(TestError::Failed(1));
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Failed(1))));

        // The straggler settling later changes nothing.
        r2.resolve(2);
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Failed(1))));
    }

    #[test]
    fn test_first_rejection_wins() {
        let (executor, mut queue) = context();
        let (a, ra) = Promise::<u32, TestError>::pending(&executor);
        let (b, rb) = Promise::<u32, TestError>::pending(&executor);
        let slot = capture(all(&executor, [a, b]));

        rb.reject(TestError::Failed(2));
        ra.reject(TestError::Failed(1));
        queue.run_pending();
        assert_eq!(*slot.lock(), Some(Err(TestError::Failed(2))));
    }
}
