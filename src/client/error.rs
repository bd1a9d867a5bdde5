use thiserror::Error;

use crate::client::proxy::ProxyError;
use crate::scope::Cancelled;
use crate::BoxError;

/// Client error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The proxy specification given at construction was invalid.
    ///
    /// No client is produced when this error is returned.
    #[error("invalid proxy: {0}")]
    Proxy(#[source] ProxyError),

    /// The TLS configuration for the fingerprinting transport could not be built.
    #[error("tls configuration: {0}")]
    Tls(#[source] rustls::Error),

    /// Error occured with the underlying connection.
    #[error("connection: {0}")]
    Connection(#[source] BoxError),

    /// Error occured with the underlying transport.
    ///
    /// Errors returned by an adapted transport are passed through unchanged as
    /// the source of this variant.
    #[error("transport: {0}")]
    Transport(#[source] BoxError),

    /// Error occured with the underlying protocol.
    #[error("protocol: {0}")]
    Protocol(#[source] BoxError),

    /// The connection does not support the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The client was closed, or its scope was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// Request timeout
    #[error("request timeout")]
    RequestTimeout,

    /// The request URI can't be sent by this client.
    #[error("invalid uri: {0}")]
    InvalidUri(http::Uri),

    /// Invalid HTTP Method for the current action.
    #[error("invalid method: {0}")]
    InvalidMethod(http::Method),

    /// Protocol is not supported by this client or transport.
    #[error("unsupported protocol")]
    UnsupportedProtocol,
}

impl Error {
    /// Whether the request was abandoned because the client was closed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether a connection capability was unavailable.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Whether this error was produced while constructing a client.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Proxy(_) | Error::Tls(_))
    }
}

impl Error {
    /// Classify an error raised while reading a response body.
    pub(crate) fn from_body(error: BoxError) -> Self {
        if error.is::<Cancelled>() {
            Error::Cancelled
        } else {
            Error::Protocol(error)
        }
    }
}

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}

impl From<ProxyError> for Error {
    fn from(error: ProxyError) -> Self {
        Error::Proxy(error)
    }
}
