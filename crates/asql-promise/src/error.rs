//! Promise error types.

use thiserror::Error;

/// A promise whose resolver went away without settling it.
///
/// Also produced when a continuation panics or its execution context has
/// shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise abandoned before it was settled")]
pub struct BrokenPromise;

/// Error types a promise can be rejected with.
///
/// Any `Send + 'static` error that can represent a [`BrokenPromise`]
/// qualifies.
pub trait Rejection: From<BrokenPromise> + Send + 'static {}

impl<E: From<BrokenPromise> + Send + 'static> Rejection for E {}
