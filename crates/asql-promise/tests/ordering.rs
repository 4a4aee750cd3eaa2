//! Ordering properties of promise aggregation.
//!
//! Outcomes are settled in arbitrary permutations and the aggregate must
//! always attribute each value to the key it was submitted under.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use asql_promise::{BrokenPromise, Executor, Promise, all_keyed};
use parking_lot::Mutex;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejected(usize);

impl From<BrokenPromise> for Rejected {
    fn from(_: BrokenPromise) -> Self {
        Self(usize::MAX)
    }
}

/// Produce a permutation of `0..n` from a list of random swap indices.
fn permutation(n: usize, swaps: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for (i, s) in swaps.iter().enumerate().take(n) {
        order.swap(i, s % n);
    }
    order
}

proptest! {
    #[test]
    fn keyed_results_follow_keys_not_completion(
        n in 1usize..12,
        swaps in proptest::collection::vec(any::<usize>(), 12),
    ) {
        let (executor, mut queue) = Executor::new();
        let mut resolvers = Vec::new();
        let mut inputs = Vec::new();
        for i in 0..n {
            let (promise, resolver) = Promise::<usize, Rejected>::pending(&executor);
            inputs.push((format!("Query {}", i + 1), promise));
            resolvers.push(resolver);
        }

        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        all_keyed(&executor, inputs).on_settled(move |o| *out.lock() = Some(o));

        for i in permutation(n, &swaps) {
            resolvers[i].resolve(i * 10);
            queue.run_pending();
        }
        queue.run_pending();

        let map = slot.lock().take().expect("aggregate settled").expect("no rejection");
        prop_assert_eq!(map.len(), n);
        for (position, (key, value)) in map.iter().enumerate() {
            prop_assert_eq!(key, &format!("Query {}", position + 1));
            prop_assert_eq!(*value, position * 10);
        }
    }

    #[test]
    fn first_rejection_in_completion_order_wins(
        n in 2usize..10,
        swaps in proptest::collection::vec(any::<usize>(), 10),
    ) {
        let (executor, mut queue) = Executor::new();
        let mut resolvers = Vec::new();
        let mut inputs = Vec::new();
        for i in 0..n {
            let (promise, resolver) = Promise::<usize, Rejected>::pending(&executor);
            inputs.push((i, promise));
            resolvers.push(resolver);
        }

        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        all_keyed(&executor, inputs).on_settled(move |o| *out.lock() = Some(o));

        let order = permutation(n, &swaps);
        for &i in &order {
            resolvers[i].reject(Rejected(i));
            queue.run_pending();
        }

        prop_assert_eq!(slot.lock().take(), Some(Err(Rejected(order[0]))));
    }
}

#[tokio::test(start_paused = true)]
async fn awaiting_aggregate_of_timed_promises() {
    let executor = Executor::spawn();
    let delays = [250u64, 100, 400, 50, 300];

    let mut inputs = Vec::new();
    for (i, delay) in delays.iter().copied().enumerate() {
        let (promise, resolver) = Promise::<u64, Rejected>::pending(&executor);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            resolver.resolve(delay);
        });
        inputs.push((i, promise));
    }

    let start = tokio::time::Instant::now();
    let map = all_keyed(&executor, inputs).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(map.values().copied().collect::<Vec<_>>(), delays.to_vec());
    assert!(elapsed >= std::time::Duration::from_millis(400));
    assert!(elapsed < std::time::Duration::from_millis(450));
}
