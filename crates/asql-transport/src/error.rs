//! Transport-level error types.

use thiserror::Error;

/// Errors reported by a [`Session`](crate::Session) or
/// [`Connector`](crate::Connector).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server rejected the request. The session stays usable.
    #[error("server error: {0}")]
    Server(String),

    /// IO failure on the underlying stream.
    #[error("IO error: {0}")]
    Io(String),

    /// The peer closed the session.
    #[error("connection closed")]
    ConnectionClosed,

    /// A session could not be established.
    #[error("connection refused by {host}:{port}: {reason}")]
    Refused {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Why the attempt failed.
        reason: String,
    },

    /// The peer did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TransportError {
    /// Whether the session that produced this error must be discarded.
    ///
    /// Server-side rejections leave the session consistent; everything else
    /// means the stream is in an unknown state.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::Server(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_is_not_fatal() {
        assert!(!TransportError::Server("syntax error".into()).is_connection_fatal());
        assert!(TransportError::ConnectionClosed.is_connection_fatal());
        assert!(TransportError::Io("reset".into()).is_connection_fatal());
    }

    #[test]
    fn test_io_error_mapping() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(matches!(
            TransportError::from(reset),
            TransportError::ConnectionClosed
        ));

        let other = std::io::Error::other("boom");
        assert!(matches!(TransportError::from(other), TransportError::Io(_)));
    }
}
