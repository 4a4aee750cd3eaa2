//! The pool's cooperative scheduler.
//!
//! A single task owns all pool state: the idle connections, the FIFO wait
//! queue, the in-flight table and the counters. Everything else talks to it
//! through channels:
//!
//! - [`Command`]s arrive from [`Pool`](crate::Pool) handles
//! - [`Event`]s arrive from I/O tasks, connect attempts and released
//!   checkouts
//! - continuations arrive on the promise [`RunQueue`]
//!
//! Each assignment moves one connection into its own I/O task, so a
//! connection never serves two queries at once. Completions are matched to
//! their promise by the ticket captured when the task was spawned, which
//! makes completion order follow real latency without losing attribution.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use asql_promise::{Resolver, RunQueue};
use asql_transport::{Connector, ResultSet, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::instrumentation::{extract_operation, span_names};
use crate::pool::{PoolMetricsInner, PoolShared, PoolStatus, PooledConnection};
use crate::query::Query;

/// Requests from pool handles.
pub(crate) enum Command {
    Submit(Work),
    Close(oneshot::Sender<()>),
}

/// A request waiting for a connection.
pub(crate) enum Work {
    Query {
        query: Query,
        resolver: Resolver<ResultSet, Error>,
    },
    Checkout {
        requested_at: Instant,
        resolver: Resolver<PooledConnection, Error>,
    },
}

impl Work {
    fn reject(self, error: Error) {
        match self {
            Self::Query { resolver, .. } => {
                resolver.reject(error);
            }
            Self::Checkout { resolver, .. } => {
                resolver.reject(error);
            }
        }
    }
}

/// Notifications about connections leaving and re-entering the pool.
pub(crate) enum Event {
    Finished {
        ticket: u64,
        connection: Connection,
        outcome: Result<ResultSet, Error>,
    },
    Released(Connection),
    Connected {
        connection_id: u64,
        result: Result<Connection, TransportError>,
    },
}

struct InFlight {
    resolver: Resolver<ResultSet, Error>,
    abort: AbortHandle,
    started_at: Instant,
}

pub(crate) struct Scheduler {
    config: Arc<PoolConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<PoolShared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    run_queue: RunQueue,

    idle: VecDeque<Connection>,
    waiters: VecDeque<Work>,
    in_flight: BTreeMap<u64, InFlight>,
    /// Connections checked out through `acquire`.
    leased: u32,
    /// Connect attempts under way.
    connecting: u32,
    /// Slots with neither a connection nor a connect attempt.
    vacant: u32,
    connect_failures: u32,
    next_ticket: u64,
    next_connection_id: u64,
    closed: bool,
    draining: bool,
}

impl Scheduler {
    pub(crate) fn new(
        config: Arc<PoolConfig>,
        connector: Arc<dyn Connector>,
        shared: Arc<PoolShared>,
        commands: mpsc::UnboundedReceiver<Command>,
        run_queue: RunQueue,
        initial: Vec<Connection>,
    ) -> Self {
        let (events, event_rx) = mpsc::unbounded_channel();
        let next_connection_id = initial.iter().map(Connection::id).max().unwrap_or(0) + 1;
        let vacant = config.pool_size.saturating_sub(initial.len() as u32);

        Self {
            config,
            connector,
            shared,
            commands,
            events,
            event_rx,
            run_queue,
            idle: initial.into(),
            waiters: VecDeque::new(),
            in_flight: BTreeMap::new(),
            leased: 0,
            connecting: 0,
            vacant,
            connect_failures: 0,
            next_ticket: 1,
            next_connection_id,
            closed: false,
            draining: false,
        }
    }

    /// Run until every pool handle and every promise is gone.
    ///
    /// Continuations are drained before anything else so that work they
    /// submit is queued behind nothing that arrived later.
    pub(crate) async fn run(mut self) {
        tracing::debug!(pool_size = self.config.pool_size, "scheduler started");
        self.dispatch();

        let mut accepting = true;
        let mut continuations = true;

        loop {
            tokio::select! {
                biased;

                task = self.run_queue.recv(), if continuations => match task {
                    Some(task) => task.run(),
                    None => continuations = false,
                },

                Some(event) = self.event_rx.recv() => {
                    self.on_event(event);
                }

                command = self.commands.recv(), if accepting => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        accepting = false;
                        self.draining = true;
                        self.finish_drain();
                    }
                },

                else => break,
            }

            if !accepting && !continuations && self.closed && self.connecting == 0 {
                break;
            }
        }

        tracing::debug!(
            continuations = self.run_queue.executed(),
            "scheduler stopped"
        );
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(work) => {
                if self.closed {
                    self.record(|m| m.requests_rejected += 1);
                    work.reject(Error::PoolClosed);
                    return;
                }
                if matches!(work, Work::Query { .. }) {
                    self.record(|m| m.queries_submitted += 1);
                }
                self.waiters.push_back(work);
                tracing::trace!(waiting = self.waiters.len(), "request queued");
                self.dispatch();
            }
            Command::Close(done) => {
                // Completions already delivered settle normally.
                while let Ok(event) = self.event_rx.try_recv() {
                    self.absorb(event);
                }
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        self.absorb(event);
        self.dispatch();
        self.finish_drain();
    }

    fn absorb(&mut self, event: Event) {
        match event {
            Event::Finished {
                ticket,
                connection,
                outcome,
            } => self.on_finished(ticket, connection, outcome),
            Event::Released(connection) => {
                self.leased = self.leased.saturating_sub(1);
                tracing::trace!(connection_id = connection.id(), "connection released");
                self.reclaim(connection);
            }
            Event::Connected {
                connection_id,
                result,
            } => self.on_connected(connection_id, result),
        }
    }

    fn on_finished(&mut self, ticket: u64, connection: Connection, outcome: Result<ResultSet, Error>) {
        let Some(entry) = self.in_flight.remove(&ticket) else {
            // Rejected and counted as closed by teardown.
            tokio::spawn(connection.close());
            return;
        };

        let connection_id = connection.id();
        let elapsed_ms = entry.started_at.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => {
                self.record(|m| m.queries_succeeded += 1);
                tracing::debug!(
                    ticket,
                    connection_id,
                    elapsed_ms,
                    rows = result.len(),
                    "query completed"
                );
            }
            Err(error) => {
                self.record(|m| m.queries_failed += 1);
                tracing::debug!(ticket, connection_id, elapsed_ms, error = %error, "query failed");
            }
        }

        self.reclaim(connection);
        entry.resolver.settle(outcome);
    }

    fn on_connected(&mut self, connection_id: u64, result: Result<Connection, TransportError>) {
        self.connecting = self.connecting.saturating_sub(1);

        match result {
            Ok(connection) => {
                self.connect_failures = 0;
                self.record(|m| m.connections_created += 1);
                if self.closed {
                    self.retire(connection);
                    return;
                }
                tracing::debug!(connection_id, "connection added to pool");
                self.idle.push_back(connection);
            }
            Err(source) => {
                self.connect_failures += 1;
                self.record(|m| m.connect_failures += 1);
                if self.closed {
                    return;
                }
                self.vacant += 1;
                tracing::warn!(
                    connection_id,
                    failures = self.connect_failures,
                    error = %source,
                    "connect attempt failed"
                );

                // Nothing live or on its way can serve the queue; fail its head.
                if self.live() == 0 && self.connecting == 0 {
                    if let Some(work) = self.waiters.pop_front() {
                        work.reject(Error::Connection {
                            connection_id,
                            source,
                        });
                    }
                }
            }
        }
    }

    /// Hand idle connections to waiters in arrival order.
    fn dispatch(&mut self) {
        while !self.waiters.is_empty() && !self.idle.is_empty() {
            if let (Some(work), Some(connection)) = (self.waiters.pop_front(), self.idle.pop_front())
            {
                self.assign(work, connection);
            }
        }

        self.replenish();
        self.publish();
    }

    fn assign(&mut self, work: Work, mut connection: Connection) {
        connection.mark_busy();
        let connection_id = connection.id();

        match work {
            Work::Query { query, resolver } => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;

                tracing::debug!(
                    ticket,
                    connection_id,
                    waited_ms = query.age().as_millis() as u64,
                    operation = extract_operation(query.sql()),
                    statement = %self.config.statement_logging.sanitize(query.sql()),
                    "dispatching query"
                );

                let events = self.events.clone();
                let timeout = self.config.query_timeout;
                let span = tracing::debug_span!(span_names::QUERY, ticket, connection_id);
                let task = tokio::spawn(
                    async move {
                        let outcome = connection.execute(&query, timeout).await;
                        // The scheduler outlives every I/O task it has not aborted.
                        let _ = events.send(Event::Finished {
                            ticket,
                            connection,
                            outcome,
                        });
                    }
                    .instrument(span),
                );

                self.in_flight.insert(
                    ticket,
                    InFlight {
                        resolver,
                        abort: task.abort_handle(),
                        started_at: Instant::now(),
                    },
                );
            }
            Work::Checkout {
                requested_at,
                resolver,
            } => {
                self.leased += 1;
                self.record(|m| m.checkouts += 1);
                tracing::trace!(
                    connection_id,
                    waited_ms = requested_at.elapsed().as_millis() as u64,
                    "connection checked out"
                );
                resolver.resolve(PooledConnection::new(
                    connection,
                    self.events.clone(),
                    self.config.query_timeout,
                ));
            }
        }
    }

    /// Put a connection back, or discard it if it can no longer be used.
    fn reclaim(&mut self, mut connection: Connection) {
        if self.closed {
            self.retire(connection);
            return;
        }

        if connection.is_broken() {
            tracing::info!(connection_id = connection.id(), "replacing broken connection");
            self.record(|m| m.connections_replaced += 1);
            self.retire(connection);
            self.vacant += 1;
            return;
        }

        connection.mark_idle();
        self.idle.push_back(connection);
    }

    /// Open connections for vacant slots.
    ///
    /// Eager pools refill every slot; lazy pools open only as many as the
    /// queue needs.
    fn replenish(&mut self) {
        if self.closed {
            return;
        }

        let wanted = if self.config.lazy_connect {
            (self.waiters.len() as u32).saturating_sub(self.connecting)
        } else {
            self.vacant
        };

        for _ in 0..wanted.min(self.vacant) {
            self.spawn_connect();
        }
    }

    fn spawn_connect(&mut self) {
        self.vacant -= 1;
        self.connecting += 1;

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let delay = self.config.backoff_after(self.connect_failures);
        tracing::debug!(
            connection_id,
            delay_ms = delay.as_millis() as u64,
            "opening connection"
        );

        let connector = Arc::clone(&self.connector);
        let config = Arc::clone(&self.config);
        let events = self.events.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = Connection::open(
                connection_id,
                &*connector,
                &config.connect,
                config.connect_timeout,
            )
            .await;
            let _ = events.send(Event::Connected {
                connection_id,
                result,
            });
        });
    }

    fn retire(&self, connection: Connection) {
        self.record(|m| m.connections_closed += 1);
        tokio::spawn(connection.close());
    }

    /// Reject everything outstanding and close idle sessions.
    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.closed.store(true, Ordering::Release);

        let in_flight = std::mem::take(&mut self.in_flight);
        let aborted = in_flight.len();
        for (_, entry) in in_flight {
            entry.abort.abort();
            entry.resolver.reject(Error::PoolClosed);
        }

        let queued = self.waiters.len();
        for work in self.waiters.drain(..) {
            work.reject(Error::PoolClosed);
        }

        let idle: Vec<_> = self.idle.drain(..).collect();
        for connection in idle {
            self.retire(connection);
        }

        self.record(|m| {
            m.requests_rejected += (aborted + queued) as u64;
            m.connections_closed += aborted as u64;
        });
        tracing::info!(aborted, queued, "connection pool closed");
        self.publish();
    }

    /// Close the pool once every handle is gone and no work remains.
    fn finish_drain(&mut self) {
        if self.draining
            && !self.closed
            && self.waiters.is_empty()
            && self.in_flight.is_empty()
            && self.leased == 0
        {
            tracing::debug!("all pool handles dropped");
            self.shutdown();
        }
    }

    /// Connections that exist right now, idle or busy.
    fn live(&self) -> usize {
        self.idle.len() + self.in_flight.len() + self.leased as usize
    }

    fn record(&self, update: impl FnOnce(&mut PoolMetricsInner)) {
        update(&mut self.shared.metrics.lock());
    }

    fn publish(&self) {
        let in_use = self.in_flight.len() as u32 + self.leased;
        let idle = self.idle.len() as u32;
        let waiting = self.waiters.len() as u32;

        debug_assert!(
            self.closed || idle + in_use + self.connecting + self.vacant == self.config.pool_size,
            "connection accounting out of balance"
        );

        *self.shared.status.lock() = PoolStatus {
            available: idle,
            in_use,
            connecting: self.connecting,
            waiting,
            total: idle + in_use,
            max: self.config.pool_size,
        };

        let mut metrics = self.shared.metrics.lock();
        metrics.peak_in_use = metrics.peak_in_use.max(in_use);
        metrics.peak_waiting = metrics.peak_waiting.max(waiting);
    }
}
