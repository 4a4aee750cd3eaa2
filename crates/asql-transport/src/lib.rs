//! # asql-transport
//!
//! The request/response primitive the asql pool is built on.
//!
//! A database session is treated as opaque: it accepts query text and, after
//! some latency, yields either a [`ResultSet`] or a [`TransportError`]. Wire
//! protocols live behind the [`Connector`] and [`Session`] traits, so the pool
//! never needs to know which database it is talking to.
//!
//! ## Example
//!
//! ```rust,ignore
//! use asql_transport::{ConnectOptions, Connector, Credentials};
//!
//! let options = ConnectOptions::new("127.0.0.1", 3306)
//!     .database("demo")
//!     .credentials(Credentials::new("root", "secret"));
//!
//! let mut session = connector.connect(&options).await?;
//! let result = session.execute("SELECT 1").await?;
//! assert_eq!(result.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod row;
pub mod session;
pub mod value;

pub use error::TransportError;
pub use row::{Column, ResultSet, Row};
pub use session::{ConnectOptions, Connector, Credentials, Session};
pub use value::{FromValue, Value, ValueError};
