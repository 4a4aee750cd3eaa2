//! # asql-bench
//!
//! Measures what pooled, promise-driven query execution buys over running
//! the same statements one after another.
//!
//! Two runs execute the same list of slow statements:
//!
//! - **sequential**: a fresh session per statement, each awaited before the
//!   next starts
//! - **concurrent**: every statement submitted to an [`asql_pool::Pool`] at
//!   once, with completion times recorded by promise continuations
//!
//! The [`Report`] compares both totals and renders a per-query timeline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use asql_bench::{BenchConfig, Report, run_concurrent, run_sequential};
//! use asql_testing::SimulatedConnector;
//!
//! let config = BenchConfig::new(5, 0.25);
//! let server = SimulatedConnector::new();
//!
//! let sequential = run_sequential(&server, &config).await?;
//! let concurrent = run_concurrent(server, &config).await?;
//! println!("{}", Report::new(sequential, concurrent));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod report;
pub mod runner;
pub mod timeline;

pub use error::BenchError;
pub use report::Report;
pub use runner::{BenchConfig, RunResult, run_concurrent, run_sequential};
pub use timeline::{Recorder, Timeline};
