//! # asql-promise
//!
//! Single-assignment promises whose continuations run on one execution
//! context.
//!
//! A [`Promise`] is the read side of a result cell; its [`Resolver`] is the
//! write side. Settling a cell never runs user code in place: continuations
//! are queued on the promise's [`Executor`] and executed, one after another,
//! by whoever drains the matching [`RunQueue`]. In `asql-pool` that is the
//! pool scheduler, so continuations and pool bookkeeping share one ordering
//! domain.
//!
//! ## Features
//!
//! - `then`, `then_else`, `map`, `catch` chaining, flattening returned promises
//! - Fail-fast [`all`] and [`all_keyed`] aggregation
//! - [`SharedPromise`] for fan-out to several subscribers
//! - Every promise is also a [`std::future::Future`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use asql_promise::{Executor, Promise, all_keyed};
//!
//! let executor = Executor::spawn();
//! let (promise, resolver) = Promise::<u32, MyError>::pending(&executor);
//!
//! let doubled = promise.map(|n| n * 2);
//! resolver.resolve(21);
//! assert_eq!(doubled.await?, 42);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod combinator;
pub mod error;
pub mod executor;
pub mod promise;
pub mod shared;

pub use combinator::{all, all_keyed};
pub use error::{BrokenPromise, Rejection};
pub use executor::{Executor, RunQueue, Task};
pub use promise::{IntoStep, Promise, Resolver, Step};
pub use shared::SharedPromise;
