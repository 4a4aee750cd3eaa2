//! Connection pool implementation.
//!
//! [`Pool`] is a cheap, cloneable handle. The pool state lives in the
//! scheduler task; handles only submit requests and read published
//! snapshots.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use asql_promise::{Executor, Promise};
use asql_transport::{Connector, Credentials, ResultSet, TransportError};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionMetadata};
use crate::error::Error;
use crate::query::Query;
use crate::scheduler::{Command, Event, Scheduler, Work};

/// Promise of one query's result set.
pub type QueryPromise = Promise<ResultSet, Error>;

/// A bounded pool of database connections.
///
/// Queries never block the caller: each submission returns a [`Promise`]
/// at once. An idle connection takes the query immediately, otherwise the
/// request waits in a FIFO queue until a connection frees up.
///
/// # Example
///
/// ```rust,ignore
/// use asql_pool::{Pool, PoolConfig};
///
/// let pool = Pool::new(PoolConfig::new().pool_size(5), connector).await?;
///
/// let orders = pool.query("SELECT * FROM orders");
/// let users = pool.query("SELECT * FROM users");
/// let both = pool.all([orders, users]).await?;
///
/// pool.close().await;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: Arc<PoolConfig>,
    commands: mpsc::UnboundedSender<Command>,
    executor: Executor,
    shared: Arc<PoolShared>,
}

/// State published by the scheduler for pool handles to read.
pub(crate) struct PoolShared {
    pub(crate) closed: AtomicBool,
    pub(crate) created_at: Instant,
    pub(crate) status: Mutex<PoolStatus>,
    pub(crate) metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) connections_replaced: u64,
    pub(crate) connect_failures: u64,
    pub(crate) queries_submitted: u64,
    pub(crate) queries_succeeded: u64,
    pub(crate) queries_failed: u64,
    pub(crate) checkouts: u64,
    pub(crate) requests_rejected: u64,
    pub(crate) peak_in_use: u32,
    pub(crate) peak_waiting: u32,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool, opening every connection unless `lazy_connect` is set.
    ///
    /// Fails with [`Error::Config`] for an invalid configuration and with
    /// [`Error::Unreachable`] when any initial connection cannot be opened.
    pub async fn new(config: PoolConfig, connector: impl Connector) -> Result<Self, Error> {
        config.validate()?;

        let config = Arc::new(config);
        let connector: Arc<dyn Connector> = Arc::new(connector);

        let initial = if config.lazy_connect {
            Vec::new()
        } else {
            connect_all(&config, &connector).await?
        };

        let shared = Arc::new(PoolShared {
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            status: Mutex::new(PoolStatus {
                available: initial.len() as u32,
                in_use: 0,
                connecting: 0,
                waiting: 0,
                total: initial.len() as u32,
                max: config.pool_size,
            }),
            metrics: Mutex::new(PoolMetricsInner {
                connections_created: initial.len() as u64,
                ..PoolMetricsInner::default()
            }),
        });

        let (executor, run_queue) = Executor::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            Arc::clone(&config),
            connector,
            Arc::clone(&shared),
            command_rx,
            run_queue,
            initial,
        );
        tokio::spawn(scheduler.run());

        tracing::info!(
            host = %config.connect.host,
            port = config.connect.port,
            pool_size = config.pool_size,
            lazy = config.lazy_connect,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                commands,
                executor,
                shared,
            }),
        })
    }

    /// Submit a query.
    pub fn query(&self, sql: impl Into<String>) -> QueryPromise {
        self.with_connection(Query::new(sql))
    }

    /// Submit a prepared [`Query`] value.
    ///
    /// The query runs on the first connection that is free for it; its
    /// promise settles with the result set or with the failure of that one
    /// query.
    pub fn with_connection(&self, query: Query) -> QueryPromise {
        let (promise, resolver) = Promise::pending(&self.inner.executor);
        self.submit(Work::Query { query, resolver });
        promise
    }

    /// Check out a whole connection.
    ///
    /// Checkouts wait in the same FIFO queue as queries. The connection
    /// returns to the pool when the [`PooledConnection`] is dropped.
    pub fn acquire(&self) -> Promise<PooledConnection, Error> {
        let (promise, resolver) = Promise::pending(&self.inner.executor);
        self.submit(Work::Checkout {
            requested_at: Instant::now(),
            resolver,
        });
        promise
    }

    /// Return a checked-out connection.
    pub fn release(&self, connection: PooledConnection) {
        connection.release();
    }

    /// Wait for every promise; see [`asql_promise::all`].
    pub fn all<T, I>(&self, promises: I) -> Promise<Vec<T>, Error>
    where
        I: IntoIterator<Item = Promise<T, Error>>,
        T: Send + 'static,
    {
        asql_promise::all(&self.inner.executor, promises)
    }

    /// Wait for every keyed promise; see [`asql_promise::all_keyed`].
    pub fn all_keyed<K, T, I>(&self, promises: I) -> Promise<IndexMap<K, T>, Error>
    where
        I: IntoIterator<Item = (K, Promise<T, Error>)>,
        K: Hash + Eq + Send + 'static,
        T: Send + 'static,
    {
        asql_promise::all_keyed(&self.inner.executor, promises)
    }

    /// The executor continuations of this pool's promises run on.
    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Close the pool.
    ///
    /// Queued and in-flight requests are rejected with
    /// [`Error::PoolClosed`]; in-flight I/O is aborted and its connection
    /// discarded. Idle sessions are closed. Calling this again is a no-op.
    pub async fn close(&self) {
        if self.inner.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (done, wait) = oneshot::channel();
        if self.inner.commands.send(Command::Close(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Whether the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::Acquire)
    }

    /// Current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        *self.inner.shared.status.lock()
    }

    /// Pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.shared.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            connections_replaced: inner.connections_replaced,
            connect_failures: inner.connect_failures,
            queries_submitted: inner.queries_submitted,
            queries_succeeded: inner.queries_succeeded,
            queries_failed: inner.queries_failed,
            checkouts: inner.checkouts,
            requests_rejected: inner.requests_rejected,
            peak_in_use: inner.peak_in_use,
            peak_waiting: inner.peak_waiting,
            uptime: self.inner.shared.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn submit(&self, work: Work) {
        if self.is_closed() {
            self.inner.shared.metrics.lock().requests_rejected += 1;
            reject(work);
            return;
        }

        if let Err(mpsc::error::SendError(Command::Submit(work))) =
            self.inner.commands.send(Command::Submit(work))
        {
            reject(work);
        }
    }
}

fn reject(work: Work) {
    match work {
        Work::Query { resolver, .. } => {
            resolver.reject(Error::PoolClosed);
        }
        Work::Checkout { resolver, .. } => {
            resolver.reject(Error::PoolClosed);
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Open `pool_size` connections concurrently.
async fn connect_all(
    config: &Arc<PoolConfig>,
    connector: &Arc<dyn Connector>,
) -> Result<Vec<Connection>, Error> {
    let mut attempts = JoinSet::new();
    for id in 1..=u64::from(config.pool_size) {
        let config = Arc::clone(config);
        let connector = Arc::clone(connector);
        attempts.spawn(async move {
            Connection::open(id, &*connector, &config.connect, config.connect_timeout).await
        });
    }

    let mut connections = Vec::with_capacity(config.pool_size as usize);
    let mut failure = None;
    while let Some(joined) = attempts.join_next().await {
        match joined {
            Ok(Ok(connection)) => connections.push(connection),
            Ok(Err(error)) => {
                failure.get_or_insert(error);
            }
            Err(join_error) => {
                failure.get_or_insert(TransportError::Io(join_error.to_string()));
            }
        }
    }

    if let Some(source) = failure {
        tracing::warn!(
            host = %config.connect.host,
            port = config.connect.port,
            error = %source,
            "initial connections failed"
        );
        for connection in connections {
            connection.close().await;
        }
        return Err(Error::Unreachable {
            host: config.connect.host.clone(),
            port: config.connect.port,
            source,
        });
    }

    connections.sort_by_key(Connection::id);
    Ok(connections)
}

/// Builder for creating a connection pool.
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config = self.config.host(host);
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config = self.config.port(port);
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config = self.config.database(database);
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config = self.config.credentials(credentials);
        self
    }

    /// Set the number of connections.
    #[must_use]
    pub fn pool_size(mut self, size: u32) -> Self {
        self.config = self.config.pool_size(size);
        self
    }

    /// Set the per-query timeout.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.query_timeout(timeout);
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Open connections on demand.
    #[must_use]
    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.config = self.config.lazy_connect(lazy);
        self
    }

    /// Build the pool.
    pub async fn build(self, connector: impl Connector) -> Result<Pool, Error> {
        Pool::new(self.config, connector).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections running a query or checked out.
    pub in_use: u32,
    /// Connect attempts under way.
    pub connecting: u32,
    /// Requests waiting for a connection.
    pub waiting: u32,
    /// Total number of live connections.
    pub total: u32,
    /// Configured pool size.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (f64::from(self.in_use) / f64::from(self.max)) * 100.0
    }

    /// Check if every connection is busy.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Connections opened since pool start.
    pub connections_created: u64,
    /// Connections closed since pool start.
    pub connections_closed: u64,
    /// Broken connections that were discarded for replacement.
    pub connections_replaced: u64,
    /// Failed connect attempts after initialization.
    pub connect_failures: u64,
    /// Queries accepted by the scheduler.
    pub queries_submitted: u64,
    /// Queries that produced a result set.
    pub queries_succeeded: u64,
    /// Queries that failed on their connection.
    pub queries_failed: u64,
    /// Whole-connection checkouts.
    pub checkouts: u64,
    /// Requests rejected because the pool closed.
    pub requests_rejected: u64,
    /// Highest number of simultaneously busy connections.
    pub peak_in_use: u32,
    /// Longest wait queue observed.
    pub peak_waiting: u32,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Fraction of finished queries that succeeded (0.0 to 1.0).
    #[must_use]
    pub fn query_success_rate(&self) -> f64 {
        let total = self.queries_succeeded + self.queries_failed;
        if total == 0 {
            return 1.0;
        }
        self.queries_succeeded as f64 / total as f64
    }
}

/// A connection checked out of the pool.
///
/// When dropped, the connection is returned to the pool, or replaced if a
/// query on it broke the session.
pub struct PooledConnection {
    connection: Option<Connection>,
    events: mpsc::UnboundedSender<Event>,
    query_timeout: Option<Duration>,
}

impl PooledConnection {
    pub(crate) fn new(
        connection: Connection,
        events: mpsc::UnboundedSender<Event>,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection: Some(connection),
            events,
            query_timeout,
        }
    }

    /// Run a query on this connection.
    pub async fn execute(&mut self, query: impl Into<Query>) -> Result<ResultSet, Error> {
        let query = query.into();
        let connection = self.connection.as_mut().ok_or(Error::PoolClosed)?;
        connection.execute(&query, self.query_timeout).await
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&ConnectionMetadata> {
        self.connection.as_ref().map(Connection::metadata)
    }

    /// Whether a failure on this connection means it will be replaced.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.connection.as_ref().is_none_or(Connection::is_broken)
    }

    /// Return the connection to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::trace!(
                connection_id = connection.id(),
                "returning connection to pool"
            );
            // Fails only when the scheduler is gone; the session drops with it.
            let _ = self.events.send(Event::Released(connection));
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            connecting: 0,
            waiting: 0,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
        assert!(!status.is_at_capacity());
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 10,
            connecting: 0,
            waiting: 3,
            total: 10,
            max: 10,
        };
        assert!(status.is_at_capacity());
    }

    #[test]
    fn test_query_success_rate() {
        let metrics = PoolMetrics {
            connections_created: 5,
            connections_closed: 0,
            connections_replaced: 0,
            connect_failures: 0,
            queries_submitted: 100,
            queries_succeeded: 90,
            queries_failed: 10,
            checkouts: 0,
            requests_rejected: 0,
            peak_in_use: 5,
            peak_waiting: 95,
            uptime: Duration::from_secs(3600),
        };
        assert!((metrics.query_success_rate() - 0.9).abs() < f64::EPSILON);

        let idle = PoolMetrics {
            queries_succeeded: 0,
            queries_failed: 0,
            ..metrics
        };
        assert!((idle.query_success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_default() {
        let builder = PoolBuilder::new();
        assert_eq!(builder.config.pool_size, 10);
        assert!(!builder.config.lazy_connect);
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder()
            .host("db.internal")
            .pool_size(5)
            .lazy_connect(true)
            .query_timeout(Duration::from_secs(2));

        assert_eq!(builder.config.connect.host, "db.internal");
        assert_eq!(builder.config.pool_size, 5);
        assert!(builder.config.lazy_connect);
        assert_eq!(builder.config.query_timeout, Some(Duration::from_secs(2)));
    }
}
