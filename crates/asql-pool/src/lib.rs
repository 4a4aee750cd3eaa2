//! # asql-pool
//!
//! Bounded connection pool that runs opaque database queries concurrently
//! and hands back promises.
//!
//! The pool owns a fixed number of sessions. Each query borrows one session
//! for exactly its own duration; when more queries are pending than there
//! are sessions, the rest wait in arrival order. A single scheduler task
//! owns all pool state and also drains the promise run queue, so promise
//! continuations never race pool bookkeeping.
//!
//! ## Features
//!
//! - Fixed pool size with FIFO wait queue
//! - Eager or lazy connection establishment
//! - Broken connections replaced in the background with backoff
//! - Optional per-query timeout
//! - Whole-connection checkout with return on drop
//! - Hard close that rejects all outstanding work with [`Error::PoolClosed`]
//! - Status snapshots and metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use asql_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::from_connection_string(
//!     "Server=localhost,3306;Database=shop;User Id=app;Password=secret;Pool Size=5",
//! )?;
//! let pool = Pool::new(config, connector).await?;
//!
//! let totals = pool
//!     .query("SELECT SUM(total) FROM orders")
//!     .then(|rows| Ok(rows.len()));
//!
//! let by_name = pool
//!     .all_keyed([
//!         ("orders", pool.query("SELECT * FROM orders")),
//!         ("users", pool.query("SELECT * FROM users")),
//!     ])
//!     .await?;
//!
//! println!("Pool utilization: {:.1}%", pool.status().utilization());
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod instrumentation;
pub mod pool;
pub mod query;

mod scheduler;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{Error, ErrorKind, Result};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection, QueryPromise};

// Connection lifecycle
pub use connection::{Connection, ConnectionMetadata, ConnectionState};

pub use query::Query;

// Re-exported so callers need not depend on the lower layers directly.
pub use asql_promise::{BrokenPromise, Executor, Promise, Resolver, SharedPromise, all, all_keyed};
pub use asql_transport::{ConnectOptions, Connector, Credentials, ResultSet, Row, Session, TransportError, Value};
