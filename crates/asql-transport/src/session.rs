//! Session and connector traits.

use std::fmt;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::row::ResultSet;

/// Username/password pair used to open a session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database to select after login.
    pub database: Option<String>,
    /// Login credentials.
    pub credentials: Credentials,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: None,
            credentials: Credentials::default(),
        }
    }
}

impl ConnectOptions {
    /// Options for the given endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// One live database session.
///
/// A session handles one request at a time; `&mut self` makes that a
/// compile-time property.
#[async_trait]
pub trait Session: Send + 'static {
    /// Send query text and wait for its result.
    async fn execute(&mut self, sql: &str) -> Result<ResultSet, TransportError>;

    /// Close the session gracefully.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Factory for sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new session.
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, TransportError> {
        (**self).connect(options).await
    }
}
