//! # asql-testing
//!
//! Test infrastructure for the asql workspace.
//!
//! [`SimulatedConnector`] stands in for a real database server. Each
//! statement takes a simulated latency, `SLEEP(x)` in the statement text
//! sets it explicitly, and failures can be scripted per statement or per
//! connect attempt. The connector records every execution and tracks how
//! many sessions were busy at once, which makes concurrency bounds
//! observable from tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use asql_testing::{SimulatedConnector, sleep_query};
//!
//! let server = SimulatedConnector::new();
//! let pool = Pool::new(PoolConfig::new().pool_size(2), server.clone()).await?;
//!
//! pool.all((0..5).map(|_| pool.query(sleep_query(0.1)))).await?;
//! assert!(server.peak_active() <= 2);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod latency;
pub mod simulated;

pub use latency::{sleep_duration, sleep_query};
pub use simulated::{Execution, SimulatedConnector};
