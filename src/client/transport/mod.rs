//! Transport strategies.
//!
//! A client sends requests through exactly one [`Transport`], chosen when the
//! client is built:
//!
//! - The fingerprinting transport dials origins itself, optionally through a
//!   proxy, and shapes the TLS handshake after a browser
//!   [profile][crate::fingerprint::Profile]. Its responses carry a full
//!   [`Connection`][crate::client::Connection].
//! - The adapted transport forwards requests to a caller-supplied
//!   [`RoundTrip`]. Its responses carry a degraded connection.

use crate::client::{Error, Response};
use crate::Body;

mod adapted;
mod fingerprint;

pub use self::adapted::{CloseIdle, RoundTrip, ServiceTransport};
pub(crate) use self::adapted::AdaptedTransport;
pub(crate) use self::fingerprint::FingerprintingTransport;

/// The transport strategy a client sends requests through.
#[derive(Debug)]
pub(crate) enum Transport {
    Fingerprinting(FingerprintingTransport),
    Adapted(AdaptedTransport),
}

impl Transport {
    pub(crate) async fn dispatch(&self, request: http::Request<Body>) -> Result<Response, Error> {
        match self {
            Transport::Fingerprinting(transport) => transport.dispatch(request).await,
            Transport::Adapted(transport) => transport.dispatch(request).await,
        }
    }

    pub(crate) fn close_idle_connections(&self) {
        match self {
            Transport::Fingerprinting(transport) => transport.close_idle_connections(),
            Transport::Adapted(transport) => transport.close_idle_connections(),
        }
    }

    pub(crate) fn shutdown(&self) {
        match self {
            Transport::Fingerprinting(transport) => transport.shutdown(),
            Transport::Adapted(transport) => transport.shutdown(),
        }
    }

    pub(crate) fn is_adapted(&self) -> bool {
        matches!(self, Transport::Adapted(_))
    }
}
