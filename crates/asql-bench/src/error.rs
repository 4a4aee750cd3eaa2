//! Benchmark errors.

use asql_transport::TransportError;
use thiserror::Error;

/// Errors that abort a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A latency was negative or not a number.
    #[error("invalid latency {0}: must be a finite, non-negative number of seconds")]
    InvalidLatency(f64),

    /// No statements to run.
    #[error("at least one query is required")]
    NoQueries,

    /// Opening a session for the sequential run failed.
    #[error("sequential run could not connect: {0}")]
    Connect(#[source] TransportError),

    /// A statement in the sequential run failed.
    #[error("sequential run query failed: {0}")]
    Query(#[source] TransportError),

    /// The pooled run failed.
    #[error("concurrent run failed: {0}")]
    Pool(#[from] asql_pool::Error),
}
