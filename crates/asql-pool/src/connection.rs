//! Pooled connection lifecycle.
//!
//! A [`Connection`] wraps one transport session and tracks whether it can be
//! reused. Failures are classified as they happen:
//!
//! - server-side query errors leave the connection usable
//! - transport errors and timeouts mark it [`ConnectionState::Broken`]
//!
//! Broken connections are never handed out again; the scheduler closes them
//! and opens a replacement.

use std::fmt;
use std::time::Duration;

use asql_transport::{ConnectOptions, Connector, ResultSet, Session, TransportError};
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::Error;
use crate::instrumentation::span_names;
use crate::query::Query;

/// State of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Available for work.
    Idle,
    /// Running a query or checked out.
    Busy,
    /// Unusable; awaiting replacement.
    Broken,
}

/// Bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-assigned identity.
    pub id: u64,
    /// When the session was established.
    pub created_at: Instant,
    /// When the last query finished.
    pub last_used_at: Instant,
    /// Queries executed on this connection.
    pub queries_executed: u64,
}

impl ConnectionMetadata {
    fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            queries_executed: 0,
        }
    }

    /// Time since the connection was established.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last used.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

/// One session owned by the pool.
pub struct Connection {
    metadata: ConnectionMetadata,
    state: ConnectionState,
    session: Box<dyn Session>,
}

impl Connection {
    /// Establish a session within `timeout`.
    pub(crate) async fn open(
        id: u64,
        connector: &dyn Connector,
        options: &ConnectOptions,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let span = tracing::debug_span!(
            span_names::CONNECT,
            connection_id = id,
            host = %options.host,
            port = options.port
        );

        async {
            let session = tokio::time::timeout(timeout, connector.connect(options))
                .await
                .map_err(|_| TransportError::Timeout(timeout))??;

            tracing::debug!("connection established");

            Ok::<_, TransportError>(Self {
                metadata: ConnectionMetadata::new(id),
                state: ConnectionState::Idle,
                session,
            })
        }
        .instrument(span)
        .await
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Whether the connection must be replaced.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    pub(crate) fn mark_busy(&mut self) {
        if self.state == ConnectionState::Idle {
            self.state = ConnectionState::Busy;
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        if self.state == ConnectionState::Busy {
            self.state = ConnectionState::Idle;
        }
    }

    /// Run one query, classifying any failure.
    pub(crate) async fn execute(
        &mut self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<ResultSet, Error> {
        if self.is_broken() {
            return Err(Error::Connection {
                connection_id: self.id(),
                source: TransportError::ConnectionClosed,
            });
        }

        // Broken until the outcome arrives: a caller that drops this future
        // leaves the session mid-response.
        self.state = ConnectionState::Broken;
        let outcome = match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.session.execute(query.sql())).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.state = ConnectionState::Broken;
                        tracing::warn!(
                            connection_id = self.id(),
                            timeout_ms = limit.as_millis() as u64,
                            "query timed out; connection discarded"
                        );
                        return Err(Error::Timeout(limit));
                    }
                }
            }
            None => self.session.execute(query.sql()).await,
        };
        self.state = ConnectionState::Busy;

        self.metadata.last_used_at = Instant::now();
        self.metadata.queries_executed += 1;

        match outcome {
            Ok(result) => Ok(result),
            Err(TransportError::Server(message)) => Err(Error::Query {
                connection_id: self.id(),
                message,
            }),
            Err(source) => {
                self.state = ConnectionState::Broken;
                tracing::warn!(
                    connection_id = self.id(),
                    error = %source,
                    "transport failure; connection discarded"
                );
                Err(Error::Connection {
                    connection_id: self.id(),
                    source,
                })
            }
        }
    }

    /// Close the session. Errors are logged, not returned.
    pub(crate) async fn close(mut self) {
        let id = self.id();
        if let Err(error) = self.session.close().await {
            tracing::debug!(connection_id = id, error = %error, "error closing session");
        }
        tracing::trace!(connection_id = id, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.metadata.id)
            .field("state", &self.state)
            .field("queries_executed", &self.metadata.queries_executed)
            .finish_non_exhaustive()
    }
}
