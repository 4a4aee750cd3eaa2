//! Pool configuration.

use std::time::Duration;

use asql_transport::{ConnectOptions, Credentials};

use crate::error::Error;
use crate::instrumentation::SanitizationConfig;

/// Configuration for a connection pool.
///
/// Immutable once handed to [`Pool::new`](crate::Pool::new).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoint, database and credentials used for every connection.
    pub connect: ConnectOptions,

    /// Number of connections the pool holds. Fixed for the pool's lifetime.
    pub pool_size: u32,

    /// Time allowed for establishing one connection.
    pub connect_timeout: Duration,

    /// Optional per-query timeout. A timed-out connection is discarded.
    pub query_timeout: Option<Duration>,

    /// Open connections on demand instead of all at construction.
    pub lazy_connect: bool,

    /// Delay before retrying after a failed connect. Doubles per failure.
    pub reconnect_backoff: Duration,

    /// Upper bound for the reconnect delay.
    pub max_reconnect_backoff: Duration,

    /// How SQL text is rendered in log events.
    pub statement_logging: SanitizationConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(30),
            query_timeout: None,
            lazy_connect: false,
            reconnect_backoff: Duration::from_millis(100),
            max_reconnect_backoff: Duration::from_secs(5),
            statement_logging: SanitizationConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ADO-style connection string.
    ///
    /// Supports `Server=host,port;Database=db;User Id=user;Password=pw;Pool Size=5`
    /// along with `Port`, `Connect Timeout`, `Query Timeout` (seconds, `0`
    /// disables it) and `Lazy Connect`. Unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        let mut username = String::new();
        let mut password = String::new();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    if let Some((host, port)) = value.split_once(',').or_else(|| value.rsplit_once(':')) {
                        config.connect.host = host.trim().to_string();
                        config.connect.port = parse_port(port.trim())?;
                    } else {
                        config.connect.host = value.to_string();
                    }
                }
                "port" => {
                    config.connect.port = parse_port(value)?;
                }
                "database" | "initial catalog" | "dbname" => {
                    config.connect.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" | "username" => {
                    username = value.to_string();
                }
                "password" | "pwd" => {
                    password = value.to_string();
                }
                "pool size" | "max pool size" | "poolsize" => {
                    config.pool_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid pool size: {value}")))?;
                }
                "connect timeout" | "connection timeout" => {
                    config.connect_timeout = Duration::from_secs(parse_secs(value)?);
                }
                "query timeout" | "command timeout" => {
                    let secs = parse_secs(value)?;
                    config.query_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "lazy connect" | "lazy" => {
                    config.lazy_connect = parse_bool(value);
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        if !username.is_empty() || !password.is_empty() {
            config.connect.credentials = Credentials::new(username, password);
        }

        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.connect.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.connect.port = port;
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.connect.database = Some(database.into());
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.connect.credentials = credentials;
        self
    }

    /// Set the number of pooled connections.
    #[must_use]
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-query timeout.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Open connections on demand.
    #[must_use]
    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    /// Set the initial reconnect delay.
    #[must_use]
    pub fn reconnect_backoff(mut self, delay: Duration) -> Self {
        self.reconnect_backoff = delay;
        self
    }

    /// Set how statements appear in logs.
    #[must_use]
    pub fn statement_logging(mut self, config: SanitizationConfig) -> Self {
        self.statement_logging = config;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".into()));
        }

        if self.connect.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be non-zero".into()));
        }

        if self.query_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("query_timeout must be non-zero".into()));
        }

        if self.max_reconnect_backoff < self.reconnect_backoff {
            return Err(Error::Config(
                "max_reconnect_backoff must be >= reconnect_backoff".into(),
            ));
        }

        Ok(())
    }

    /// Delay before the connect attempt that follows `failures` consecutive failures.
    #[must_use]
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(16);
        self.reconnect_backoff
            .saturating_mul(factor)
            .min(self.max_reconnect_backoff)
    }
}

fn parse_port(value: &str) -> Result<u16, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {value}")))
}

fn parse_secs(value: &str) -> Result<u64, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}
