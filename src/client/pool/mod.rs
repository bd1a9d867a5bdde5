//! Connection pooling for the fingerprinting transport.
//!
//! Connections are pooled per origin ([`UriKey`]). Connections which can be
//! multiplexed (HTTP/2) stay in the pool while in use, and every checkout
//! receives a handle to the same connection. Other connections (HTTP/1.1)
//! are removed from the pool while in use, and returned once they are ready
//! for another request.
//!
//! Pool configuration happens in the [`PoolConfig`] type, which sets the
//! maximum idle duration of a connection and the maximum number of idle
//! connections per origin.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

mod idle;
mod key;

use self::idle::IdleConnections;
pub use self::key::UriKey;

/// The URI of a request can't be used to open a connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UriError {
    /// The URI is missing a scheme.
    #[error("missing scheme in uri: {0}")]
    MissingScheme(http::Uri),

    /// The URI is missing an authority.
    #[error("missing authority in uri: {0}")]
    MissingAuthority(http::Uri),

    /// The URI scheme is neither `http` nor `https`.
    #[error("unsupported scheme in uri: {0}")]
    UnsupportedScheme(http::Uri),
}

impl UriError {
    pub(crate) fn into_uri(self) -> http::Uri {
        match self {
            UriError::MissingScheme(uri)
            | UriError::MissingAuthority(uri)
            | UriError::UnsupportedScheme(uri) => uri,
        }
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// The maximum idle duration of a connection.
    pub idle_timeout: Option<Duration>,

    /// The maximum number of idle connections per origin.
    pub max_idle_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_host: 32,
        }
    }
}

impl PoolConfig {
    /// Set the maximum idle duration of a connection.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per origin.
    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }
}

/// A connection that can be pooled.
///
/// These connections must report to the pool whether they remain open,
/// and whether they can be shared / multiplexed.
pub(crate) trait PoolableConnection: Send + Sized + 'static {
    /// Returns `true` if the connection is open.
    fn is_open(&self) -> bool;

    /// Returns `true` if the connection can be shared / multiplexed.
    fn can_share(&self) -> bool;

    /// Returns a new handle multiplexed against this connection, if possible.
    fn reuse(&self) -> Option<Self>;
}

/// A pool of idle connections to remote origins.
pub(crate) struct Pool<C> {
    inner: Arc<Mutex<PoolInner<C>>>,
}

impl<C> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Pool")
            .field("config", &inner.config)
            .field("origins", &inner.idle.len())
            .finish()
    }
}

impl<C: PoolableConnection> Pool<C> {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                config,
                idle: HashMap::new(),
            })),
        }
    }

    /// Take a connection to `key` out of the pool.
    ///
    /// Shared connections are left in the pool, and a new handle is returned.
    #[tracing::instrument(skip_all, fields(%key), level = "trace")]
    pub(crate) fn checkout(&self, key: &UriKey) -> Option<C> {
        self.inner.lock().pop(key)
    }

    /// Offer a connection to the pool.
    pub(crate) fn checkin(&self, key: UriKey, connection: C) {
        self.inner.lock().push(key, connection);
    }

    /// Drop every idle connection.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        let origins = inner.idle.len();
        inner.idle.clear();
        trace!(origins, "idle connections released");
    }

    pub(crate) fn downgrade(&self) -> PoolRef<C> {
        PoolRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[cfg(test)]
    fn idle_count(&self, key: &UriKey) -> usize {
        self.inner.lock().idle.get(key).map_or(0, |idle| idle.len())
    }
}

/// Weak handle to a [`Pool`], held by connections so that they can be
/// returned without keeping the pool alive.
pub(crate) struct PoolRef<C> {
    inner: Weak<Mutex<PoolInner<C>>>,
}

impl<C> Clone for PoolRef<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> fmt::Debug for PoolRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolRef")
            .field(&(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<C: PoolableConnection> PoolRef<C> {
    /// Return a connection to the pool, if the pool still exists.
    pub(crate) fn checkin(&self, key: UriKey, connection: C) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().push(key, connection);
        } else {
            trace!(%key, "pool is gone, dropping connection");
        }
    }
}

struct PoolInner<C> {
    config: PoolConfig,
    idle: HashMap<UriKey, IdleConnections<C>>,
}

impl<C: PoolableConnection> PoolInner<C> {
    fn push(&mut self, key: UriKey, connection: C) {
        if !connection.is_open() {
            trace!(%key, "closed connection not pooled");
            return;
        }

        let idle = self.idle.entry(key).or_default();
        if connection.can_share() {
            // One handle is enough for a multiplexed connection.
            idle.clear();
        } else if idle.len() >= self.config.max_idle_per_host {
            trace!("idle pool full, dropping connection");
            return;
        }

        trace!("connection returned to pool");
        idle.push(connection);
    }

    fn pop(&mut self, key: &UriKey) -> Option<C> {
        let idle = self.idle.get_mut(key)?;
        let connection = idle.pop(self.config.idle_timeout);

        if let Some(shared) = connection.as_ref().and_then(|conn| conn.reuse()) {
            trace!("shared connection stays in pool");
            idle.push(shared);
        }

        if idle.is_empty() {
            trace!("removing empty idle list");
            self.idle.remove(key);
        }

        connection
    }
}

#[cfg(test)]
pub(super) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Debug)]
    pub(crate) struct TestConnection {
        pub(crate) id: usize,
        open: Arc<AtomicBool>,
        shared: bool,
    }

    impl TestConnection {
        pub(crate) fn new(id: usize) -> Self {
            Self {
                id,
                open: Arc::new(AtomicBool::new(true)),
                shared: false,
            }
        }

        pub(crate) fn closed(id: usize) -> Self {
            let conn = Self::new(id);
            conn.open.store(false, Ordering::SeqCst);
            conn
        }

        fn shared(id: usize) -> Self {
            Self {
                shared: true,
                ..Self::new(id)
            }
        }
    }

    impl PoolableConnection for TestConnection {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn can_share(&self) -> bool {
            self.shared
        }

        fn reuse(&self) -> Option<Self> {
            self.shared.then(|| Self {
                id: self.id,
                open: self.open.clone(),
                shared: true,
            })
        }
    }

    fn key() -> UriKey {
        UriKey::try_from(&http::Uri::from_static("http://localhost:8080")).unwrap()
    }

    #[test]
    fn exclusive_connection_is_removed() {
        let pool = Pool::new(PoolConfig::default());
        pool.checkin(key(), TestConnection::new(1));

        assert_eq!(pool.checkout(&key()).map(|c| c.id), Some(1));
        assert!(pool.checkout(&key()).is_none());
    }

    #[test]
    fn shared_connection_stays() {
        let pool = Pool::new(PoolConfig::default());
        pool.checkin(key(), TestConnection::shared(7));

        assert_eq!(pool.checkout(&key()).map(|c| c.id), Some(7));
        assert_eq!(pool.checkout(&key()).map(|c| c.id), Some(7));
        assert_eq!(pool.idle_count(&key()), 1);
    }

    #[test]
    fn idle_limit_per_host() {
        let pool = Pool::new(PoolConfig::default().with_max_idle_per_host(1));
        pool.checkin(key(), TestConnection::new(1));
        pool.checkin(key(), TestConnection::new(2));

        assert_eq!(pool.idle_count(&key()), 1);
    }

    #[test]
    fn clear_drops_idle() {
        let pool = Pool::new(PoolConfig::default());
        pool.checkin(key(), TestConnection::new(1));
        pool.clear();

        assert!(pool.checkout(&key()).is_none());

        pool.checkin(key(), TestConnection::new(2));
        assert_eq!(pool.checkout(&key()).map(|c| c.id), Some(2));
    }

    #[test]
    fn weak_ref_does_not_keep_pool() {
        let pool = Pool::new(PoolConfig::default());
        let weak = pool.downgrade();

        weak.checkin(key(), TestConnection::new(1));
        assert_eq!(pool.idle_count(&key()), 1);

        drop(pool);
        weak.checkin(key(), TestConnection::new(2));
        assert_eq!(format!("{weak:?}"), "PoolRef(false)");
    }

    #[test]
    fn closed_connection_not_pooled() {
        let pool = Pool::new(PoolConfig::default());
        pool.checkin(key(), TestConnection::closed(1));
        assert_eq!(pool.idle_count(&key()), 0);
    }
}
