//! Error values surfaced by the client.

use std::sync::Arc;
use std::time::Duration;

/// Everything that can go wrong between dialing and reading a line.
///
/// Dial and TLS failures are transient and show up on the connection-state
/// stream before the next retry. [`Error::BadProtocol`] is the only fatal one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The server sent a line that is not shaped like IRC.
    #[error("This server does not speak IRC")]
    BadProtocol,

    #[error("TCP connect to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("TCP connect to {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A direct write was attempted while no socket was open.
    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Write(#[source] Arc<std::io::Error>),
}

impl Error {
    pub fn dial(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source: Arc::new(source),
        }
    }

    pub fn tls(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Tls {
            addr: addr.into(),
            source: Arc::new(source),
        }
    }

    /// Whether the client gives up for good after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BadProtocol)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Write(Arc::new(e))
    }
}
