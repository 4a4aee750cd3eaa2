//! Simulated server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use asql_transport::{ConnectOptions, Connector, ResultSet, Session, TransportError, Value};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::latency::sleep_duration;

/// One statement as seen by the simulated server.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Session the statement ran on.
    pub session: u64,
    /// Statement text.
    pub sql: String,
    /// When the server started on it.
    pub started_at: Instant,
    /// When the server answered.
    pub finished_at: Instant,
    /// Whether the answer was a result set.
    pub succeeded: bool,
}

struct Rule {
    pattern: String,
    error: TransportError,
    remaining: Option<u32>,
}

struct Settings {
    default_latency: Duration,
    connect_latency: Duration,
    failing_connects: u32,
    refuse_connects: bool,
    rules: Vec<Rule>,
}

#[derive(Default)]
struct Counters {
    connects: u64,
    connect_failures: u64,
    open_sessions: u32,
    sessions_closed: u64,
    active: u32,
    peak_active: u32,
}

struct Server {
    settings: Mutex<Settings>,
    counters: Mutex<Counters>,
    log: Mutex<Vec<Execution>>,
    next_session: AtomicU64,
}

impl Server {
    /// The scripted failure for `sql`, consuming one use of a limited rule.
    fn scripted_failure(&self, sql: &str) -> Option<TransportError> {
        let mut settings = self.settings.lock();
        let index = settings.rules.iter().position(|rule| {
            sql.contains(rule.pattern.as_str()) && rule.remaining != Some(0)
        })?;
        let rule = &mut settings.rules[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }
}

/// A connector whose sessions talk to an in-process simulated server.
///
/// Clones share the same server, so a test can keep one clone for
/// inspection while the pool owns another.
#[derive(Clone)]
pub struct SimulatedConnector {
    server: Arc<Server>,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedConnector {
    /// A server answering instantly unless a statement asks for `SLEEP(x)`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            server: Arc::new(Server {
                settings: Mutex::new(Settings {
                    default_latency: Duration::ZERO,
                    connect_latency: Duration::ZERO,
                    failing_connects: 0,
                    refuse_connects: false,
                    rules: Vec::new(),
                }),
                counters: Mutex::new(Counters::default()),
                log: Mutex::new(Vec::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Latency for statements without `SLEEP(x)`.
    #[must_use]
    pub fn with_default_latency(self, latency: Duration) -> Self {
        self.server.settings.lock().default_latency = latency;
        self
    }

    /// Time each connect attempt takes.
    #[must_use]
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        self.server.settings.lock().connect_latency = latency;
        self
    }

    /// Refuse the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.server.settings.lock().failing_connects = count;
    }

    /// Refuse every connect attempt until turned off again.
    pub fn refuse_connects(&self, refuse: bool) {
        self.server.settings.lock().refuse_connects = refuse;
    }

    /// Answer every statement containing `pattern` with `error`.
    pub fn fail_statements(&self, pattern: impl Into<String>, error: TransportError) {
        self.server.settings.lock().rules.push(Rule {
            pattern: pattern.into(),
            error,
            remaining: None,
        });
    }

    /// Answer the next statement containing `pattern` with `error`.
    pub fn fail_statement_once(&self, pattern: impl Into<String>, error: TransportError) {
        self.server.settings.lock().rules.push(Rule {
            pattern: pattern.into(),
            error,
            remaining: Some(1),
        });
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.server.counters.lock().connects
    }

    /// Refused connects so far.
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.server.counters.lock().connect_failures
    }

    /// Sessions currently open.
    #[must_use]
    pub fn open_sessions(&self) -> u32 {
        self.server.counters.lock().open_sessions
    }

    /// Sessions closed gracefully.
    #[must_use]
    pub fn sessions_closed(&self) -> u64 {
        self.server.counters.lock().sessions_closed
    }

    /// Statements being executed right now.
    #[must_use]
    pub fn active(&self) -> u32 {
        self.server.counters.lock().active
    }

    /// Most statements ever executed at the same time.
    #[must_use]
    pub fn peak_active(&self) -> u32 {
        self.server.counters.lock().peak_active
    }

    /// Every finished statement, in completion order.
    #[must_use]
    pub fn executions(&self) -> Vec<Execution> {
        self.server.log.lock().clone()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, TransportError> {
        let (latency, refuse) = {
            let mut settings = self.server.settings.lock();
            let refuse = settings.refuse_connects || settings.failing_connects > 0;
            settings.failing_connects = settings.failing_connects.saturating_sub(1);
            (settings.connect_latency, refuse)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if refuse {
            self.server.counters.lock().connect_failures += 1;
            return Err(TransportError::Refused {
                host: options.host.clone(),
                port: options.port,
                reason: "connection refused".into(),
            });
        }

        let id = self.server.next_session.fetch_add(1, Ordering::Relaxed);
        {
            let mut counters = self.server.counters.lock();
            counters.connects += 1;
            counters.open_sessions += 1;
        }
        tracing::trace!(session = id, "simulated session opened");

        Ok(Box::new(SimulatedSession {
            id,
            server: Arc::clone(&self.server),
        }))
    }
}

struct SimulatedSession {
    id: u64,
    server: Arc<Server>,
}

/// Counts one statement as active for as long as it lives.
///
/// Dropped on completion and also when the executing task is aborted.
struct ActiveGuard<'a>(&'a Server);

impl<'a> ActiveGuard<'a> {
    fn enter(server: &'a Server) -> Self {
        let mut counters = server.counters.lock();
        counters.active += 1;
        counters.peak_active = counters.peak_active.max(counters.active);
        Self(server)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.counters.lock().active -= 1;
    }
}

#[async_trait]
impl Session for SimulatedSession {
    async fn execute(&mut self, sql: &str) -> Result<ResultSet, TransportError> {
        let latency = sleep_duration(sql).unwrap_or(self.server.settings.lock().default_latency);
        let failure = self.server.scripted_failure(sql);

        let _active = ActiveGuard::enter(&self.server);
        let started_at = Instant::now();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.server.log.lock().push(Execution {
            session: self.id,
            sql: sql.to_string(),
            started_at,
            finished_at: Instant::now(),
            succeeded: failure.is_none(),
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(answer(sql)),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.server.counters.lock().sessions_closed += 1;
        Ok(())
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.server.counters.lock().open_sessions -= 1;
    }
}

fn answer(sql: &str) -> ResultSet {
    match sleep_duration(sql) {
        Some(latency) => ResultSet::from_rows(
            [format!("SLEEP({})", latency.as_secs_f64())],
            vec![vec![Value::Int(0)]],
        ),
        None => ResultSet::from_rows(["statement"], vec![vec![Value::from(sql)]]),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions::new("sim", 3306)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_statement_takes_its_latency() {
        let server = SimulatedConnector::new();
        let mut session = server.connect(&options()).await.unwrap();

        let start = Instant::now();
        let rows = session.execute("SELECT SLEEP(0.25)").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert_eq!(rows.first().unwrap().get::<i64>(0).unwrap(), 0);

        let log = server.executions();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].session, 1);
        assert!(log[0].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_active_across_sessions() {
        let server = SimulatedConnector::new();
        let mut a = server.connect(&options()).await.unwrap();
        let mut b = server.connect(&options()).await.unwrap();

        let (ra, rb) = tokio::join!(
            a.execute("SELECT SLEEP(0.1)"),
            b.execute("SELECT SLEEP(0.2)")
        );
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(server.peak_active(), 2);
        assert_eq!(server.active(), 0);
        assert_eq!(server.open_sessions(), 2);

        drop(a);
        assert_eq!(server.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let server = SimulatedConnector::new();
        server.fail_next_connects(2);

        assert!(server.connect(&options()).await.is_err());
        assert!(server.connect(&options()).await.is_err());
        assert!(server.connect(&options()).await.is_ok());
        assert_eq!(server.connect_failures(), 2);
        assert_eq!(server.connects(), 1);

        server.refuse_connects(true);
        let err = server.connect(&options()).await.err().unwrap();
        assert!(matches!(err, TransportError::Refused { .. }));
    }

    #[tokio::test]
    async fn test_scripted_statement_failures() {
        let server = SimulatedConnector::new();
        server.fail_statement_once("orders", TransportError::Server("deadlock".into()));
        server.fail_statements("broken", TransportError::ConnectionClosed);
        let mut session = server.connect(&options()).await.unwrap();

        assert!(session.execute("SELECT * FROM orders").await.is_err());
        assert!(session.execute("SELECT * FROM orders").await.is_ok());
        assert!(session.execute("SELECT broken").await.is_err());
        assert!(session.execute("SELECT broken").await.is_err());

        let log = server.executions();
        assert_eq!(
            log.iter().map(|e| e.succeeded).collect::<Vec<_>>(),
            vec![false, true, false, false]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_statement_releases_active_slot() {
        let server = SimulatedConnector::new();
        let mut session = server.connect(&options()).await.unwrap();

        let task = tokio::spawn(async move { session.execute("SELECT SLEEP(10)").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(server.active(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(server.active(), 0);
        assert_eq!(server.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_is_counted() {
        let server = SimulatedConnector::new();
        let mut session = server.connect(&options()).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(server.sessions_closed(), 1);
    }
}
