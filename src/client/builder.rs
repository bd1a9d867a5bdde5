use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;

use super::config::{FingerprintConfig, TlsConfig};
use super::conn::TcpConfig;
use super::cookies::CookieStore;
use super::pool::PoolConfig;
use super::transport::RoundTrip;
use super::{Client, Error};
use crate::scope::Scope;

/// Options used to construct a [`Client`].
///
/// Every field is optional. Missing TLS and fingerprint configurations are
/// replaced by permissive defaults when the client is built.
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// An external transport. When set, the client forwards requests here
    /// instead of dialing connections itself.
    pub transport: Option<Arc<dyn RoundTrip>>,

    /// TLS configuration used to reach HTTPS proxies.
    pub tls_config: Option<Arc<TlsConfig>>,

    /// TLS configuration used to reach origins.
    pub fingerprint_config: Option<Arc<FingerprintConfig>>,

    /// Do not store or send cookies.
    pub disable_cookies: bool,

    /// Cookie storage. A fresh [`Jar`][super::Jar] is used when unset.
    pub jar: Option<Arc<dyn CookieStore>>,

    /// Proxy specification, such as `socks5h://127.0.0.1:9050`.
    pub proxy: Option<String>,

    /// Total time allowed for a request to produce a response.
    pub timeout: Option<Duration>,

    /// Default `User-Agent` header.
    pub user_agent: Option<HeaderValue>,

    /// TCP settings for dialed connections.
    pub tcp: TcpConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("transport", &self.transport.is_some())
            .field("tls_config", &self.tls_config)
            .field("fingerprint_config", &self.fingerprint_config)
            .field("disable_cookies", &self.disable_cookies)
            .field("jar", &self.jar.is_some())
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("tcp", &self.tcp)
            .field("pool", &self.pool)
            .finish()
    }
}

/// A builder for a client.
#[derive(Debug, Default)]
pub struct Builder {
    parent: Option<Scope>,
    options: ClientOptions,
}

impl Builder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of options.
    pub fn from_options(options: ClientOptions) -> Self {
        Self {
            parent: None,
            options,
        }
    }

    /// Bound the client's lifetime by `scope`.
    ///
    /// Cancelling the parent scope cancels the client, but closing the client
    /// never cancels the parent.
    pub fn with_parent(mut self, scope: Scope) -> Self {
        self.parent = Some(scope);
        self
    }

    /// Get a mutable reference to the client options.
    pub fn options(&mut self) -> &mut ClientOptions {
        &mut self.options
    }

    /// Set a timeout for each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Disable the request timeout.
    pub fn without_timeout(mut self) -> Self {
        self.options.timeout = None;
        self
    }

    /// Set the default `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: HeaderValue) -> Self {
        self.options.user_agent = Some(user_agent);
        self
    }

    /// Use the provided TCP configuration.
    pub fn with_tcp(mut self, config: TcpConfig) -> Self {
        self.options.tcp = config;
        self
    }

    /// Use the provided connection pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.options.pool = pool;
        self
    }

    /// Send every request through a proxy.
    ///
    /// The specification is validated when the client is built.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.options.proxy = Some(proxy.into());
        self
    }

    /// Forward requests to an external transport.
    pub fn with_transport(mut self, transport: Arc<dyn RoundTrip>) -> Self {
        self.options.transport = Some(transport);
        self
    }

    /// TLS configuration used to reach HTTPS proxies.
    pub fn with_tls_config(mut self, config: Arc<TlsConfig>) -> Self {
        self.options.tls_config = Some(config);
        self
    }

    /// TLS configuration used to reach origins.
    pub fn with_fingerprint_config(mut self, config: Arc<FingerprintConfig>) -> Self {
        self.options.fingerprint_config = Some(config);
        self
    }

    /// Use the provided cookie store.
    pub fn with_cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.options.jar = Some(store);
        self.options.disable_cookies = false;
        self
    }

    /// Disable cookie storage.
    pub fn without_cookies(mut self) -> Self {
        self.options.disable_cookies = true;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, Error> {
        Client::new(self.parent.as_ref(), self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::client::Jar;

    #[test]
    fn builder_sets_options() {
        let builder = Builder::new()
            .with_timeout(Duration::from_secs(3))
            .with_proxy("http://proxy.local:3128")
            .with_user_agent(HeaderValue::from_static("test/1.0"))
            .without_cookies();

        assert_eq!(builder.options.timeout, Some(Duration::from_secs(3)));
        assert_eq!(
            builder.options.proxy.as_deref(),
            Some("http://proxy.local:3128")
        );
        assert!(builder.options.disable_cookies);

        let builder = builder
            .without_timeout()
            .with_cookie_store(Arc::new(Jar::new()));
        assert!(builder.options.timeout.is_none());
        assert!(!builder.options.disable_cookies);
        assert!(builder.options.jar.is_some());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let options = ClientOptions {
            jar: Some(Arc::new(Jar::new())),
            ..Default::default()
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("jar: true"));
        assert!(debug.contains("transport: false"));
    }
}
