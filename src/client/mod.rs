//! HTTP client built on top of [hyper].
//!
//! The [`Client`] is the entry point. It is built from [`ClientOptions`],
//! usually through a [`Builder`], and sends each request through one of two
//! [transport strategies][transport]:
//!
//! 1. The fingerprinting transport, used by default, which dials origins
//!    itself and pools its connections. Responses carry a full
//!    [`Connection`], which can be upgraded to a [`DuplexStream`] or used to
//!    send further requests with [ordered headers][OrderedHeaders].
//! 2. The adapted transport, used when [`ClientOptions::transport`] is set,
//!    which forwards requests to an external [`RoundTrip`][transport::RoundTrip].
//!    Responses carry a degraded connection, which can only be closed.
//!
//! Every client owns a [`Scope`]. Closing the client cancels the scope, which
//! abandons in-flight requests and ends the connections the client opened.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use tracing::{debug, trace, warn};

use self::transport::{AdaptedTransport, FingerprintingTransport, Transport};
use crate::scope::Scope;
use crate::Body;

mod builder;
pub mod config;
pub mod conn;
pub mod cookies;
mod error;
pub mod pool;
pub mod proxy;
mod response;
pub mod transport;

pub use self::builder::{Builder, ClientOptions};
pub use self::config::{FingerprintConfig, ResolvedConfig, SessionCache, TlsConfig};
pub use self::conn::{Connection, DuplexStream, OrderedHeaders, TcpConfig};
pub use self::cookies::{CookieStore, Jar};
pub use self::error::Error;
pub use self::pool::PoolConfig;
pub use self::proxy::{Proxy, ProxyError};
pub use self::response::Response;

/// Shared state behind every clone of a [`Client`].
struct ClientRef {
    scope: Scope,
    config: ResolvedConfig,
    transport: Transport,
    cookies: Option<Arc<dyn CookieStore>>,
    proxy: Option<Proxy>,
    timeout: Option<Duration>,
    user_agent: Option<HeaderValue>,
    closed: AtomicBool,
}

impl ClientRef {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.transport.shutdown();
        self.scope.cancel();
        debug!("client closed");
    }
}

impl Drop for ClientRef {
    fn drop(&mut self) {
        // Responses already handed out keep their connections until they are
        // dropped. Only an explicit close abandons them.
        if !*self.closed.get_mut() {
            self.transport.shutdown();
            trace!("client dropped");
        }
    }
}

/// A high-level async HTTP client.
///
/// Clones share the same transport, cookie storage and scope. The client is
/// closed when [`Client::close`] is called on any clone, which abandons every
/// request and response body still in flight. Dropping the last clone only
/// releases idle connections, so responses outliving the client can still be
/// read.
///
/// # Example
/// ```no_run
/// # use hyperguise::client::{Client, Error};
/// # async fn run() -> Result<(), Error> {
/// let client = Client::builder()
///     .with_proxy("socks5h://127.0.0.1:9050")
///     .build()?;
/// let response = client.get("http://example.com".parse().unwrap()).await?;
/// println!("Response: {}", response.text().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.transport)
            .field("proxy", &self.inner.proxy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Create a new builder with default options.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create a client from options.
    ///
    /// The client's scope is derived from `parent` when one is given. Fails
    /// when the proxy specification is invalid or a TLS configuration can't be
    /// built, in which case no client is produced.
    pub fn new(parent: Option<&Scope>, options: ClientOptions) -> Result<Self, Error> {
        let scope = match parent {
            Some(parent) => parent.child(),
            None => Scope::background(),
        };

        let config = ResolvedConfig::resolve(options.tls_config, options.fingerprint_config);

        let proxy = options
            .proxy
            .as_deref()
            .map(Proxy::parse)
            .transpose()?;

        let transport = match options.transport {
            Some(external) => {
                if let Some(proxy) = &proxy {
                    debug!(host = proxy.host(), "proxy is left to the external transport");
                }
                Transport::Adapted(AdaptedTransport::new(external, scope.clone()))
            }
            None => Transport::Fingerprinting(FingerprintingTransport::new(
                scope.clone(),
                &config,
                proxy.clone(),
                options.tcp,
                options.pool,
                options.user_agent.clone(),
            )?),
        };

        let cookies = if options.disable_cookies {
            None
        } else {
            Some(
                options
                    .jar
                    .unwrap_or_else(|| Arc::new(Jar::new()) as Arc<dyn CookieStore>),
            )
        };

        Ok(Client {
            inner: Arc::new(ClientRef {
                scope,
                config,
                transport,
                cookies,
                proxy,
                timeout: options.timeout,
                user_agent: options.user_agent,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Send a request.
    ///
    /// Stored cookies are attached first, unless the request carries its own
    /// `Cookie` header. Cookies set by the response are stored before it is
    /// returned.
    pub async fn request(&self, mut request: http::Request<Body>) -> Result<Response, Error> {
        let inner = &self.inner;
        if self.is_closed() || inner.scope.is_cancelled() {
            warn!(uri = %request.uri(), "request refused, client is closed");
            return Err(Error::Cancelled);
        }

        if let Some(user_agent) = &inner.user_agent {
            request
                .headers_mut()
                .entry(http::header::USER_AGENT)
                .or_insert_with(|| user_agent.clone());
        }

        if let Some(store) = &inner.cookies {
            cookies::inject(store.as_ref(), &mut request);
        }

        let uri = request.uri().clone();
        let dispatch = inner.scope.run(inner.transport.dispatch(request));
        let response = match inner.timeout {
            Some(timeout) => tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| Error::RequestTimeout)???,
            None => dispatch.await??,
        };

        if let Some(store) = &inner.cookies {
            cookies::capture(store.as_ref(), &uri, response.headers());
        }

        Ok(response)
    }

    /// Make a GET request to the given URI.
    pub async fn get(&self, uri: http::Uri) -> Result<Response, Error> {
        let mut request = http::Request::new(Body::empty());
        *request.uri_mut() = uri;
        self.request(request).await
    }

    /// Release connections which are not carrying a request.
    ///
    /// The client remains usable.
    pub fn close_idle_connections(&self) {
        self.inner.transport.close_idle_connections();
    }

    /// Close the client.
    ///
    /// The transport is shut down, releasing idle connections, and the
    /// client's scope is cancelled. Response bodies which have not been read
    /// to the end fail with [`Error::Cancelled`]. Only the first call has any
    /// effect.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`Client::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The scope bounding this client's lifetime.
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// The TLS configurations this client runs with.
    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// The validated proxy, if one was configured.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.inner.proxy.as_ref()
    }

    /// Whether requests are forwarded to an external transport.
    pub fn is_adapted(&self) -> bool {
        self.inner.transport.is_adapted()
    }
}
