//! Hyperguise
//!
//! An HTTP client built on [hyper] which can send requests through one of two
//! interchangeable transports:
//!
//! - a fingerprinting transport, which owns its connections and shapes the TLS
//!   handshake after a browser [profile][fingerprint::Profile], and
//! - an adapted transport, which forwards requests to an externally owned
//!   [`RoundTrip`][client::transport::RoundTrip] implementation.
//!
//! Both are driven by the same [`Client`], which owns a cancellable
//! [`Scope`] bounding the lifetime of every request it sends.
//!
//! # Security
//!
//! The default TLS configurations do **not** verify server certificates. They
//! favour connectivity over transport security. Callers which require
//! certificate validation must supply their own
//! [`TlsConfig`][client::TlsConfig] and
//! [`FingerprintConfig`][client::FingerprintConfig].
//!
//! # Example
//! ```no_run
//! # use hyperguise::Client;
//! # async fn run() -> Result<(), hyperguise::client::Error> {
//! let client = Client::builder().build()?;
//! let response = client.get("https://example.com".parse().unwrap()).await?;
//! println!("status: {}", response.status());
//! client.close();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod body;
pub use body::Body;
pub mod bridge;
pub mod client;
pub use client::Client;
pub mod fingerprint;
pub mod scope;
pub use scope::Scope;

/// A boxed error which can be sent across threads.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use futures_util::future::BoxFuture;
