//! Pool error types.

use std::time::Duration;

use asql_promise::BrokenPromise;
use asql_transport::TransportError;
use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the pool and by query promises.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// The server could not be reached while initializing the pool.
    #[error("cannot reach {host}:{port}: {source}")]
    Unreachable {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// The connect failure.
        #[source]
        source: TransportError,
    },

    /// A transport failure on one connection. The connection is replaced.
    #[error("connection {connection_id} failed: {source}")]
    Connection {
        /// Pool-assigned connection identity.
        connection_id: u64,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// The server rejected this query. The connection stays in the pool.
    #[error("query failed on connection {connection_id}: {message}")]
    Query {
        /// Connection the query ran on.
        connection_id: u64,
        /// Server-provided message.
        message: String,
    },

    /// The query exceeded the configured per-query timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The pool was closed before or while this request was served.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The promise was abandoned, e.g. a continuation panicked.
    #[error(transparent)]
    Broken(#[from] BrokenPromise),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration or unreachable server at init.
    Config,
    /// Transport failure on a connection.
    Connection,
    /// Server-side query failure.
    Query,
    /// Per-query timeout.
    Timeout,
    /// Pool closed.
    PoolClosed,
    /// Promise abandoned.
    Broken,
}

impl Error {
    /// The error's classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Unreachable { .. } => ErrorKind::Config,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Query { .. } => ErrorKind::Query,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::Broken(_) => ErrorKind::Broken,
        }
    }

    /// Whether the whole pool is unusable, as opposed to one query failing.
    #[must_use]
    pub fn is_pool_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::PoolClosed)
    }

    /// Whether only the originating query failed and the pool carries on.
    #[must_use]
    pub fn is_query_failure(&self) -> bool {
        !self.is_pool_fatal()
    }

    /// Whether the connection the query ran on had to be discarded.
    #[must_use]
    pub fn broke_connection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Timeout)
    }
}
