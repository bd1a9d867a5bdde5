//! TLS configuration resolution.
//!
//! A client carries two TLS configurations: a standard [`TlsConfig`] and a
//! [`FingerprintConfig`] for the browser-shaped handshake to origin servers.
//! Either may be supplied by the caller. A supplied configuration is used as
//! the caller's object, unchanged. Only missing configurations are filled in
//! with defaults.
//!
//! # Security
//!
//! The defaults disable certificate verification. They favour connectivity
//! over transport security, so callers which need verified connections must
//! supply their own configurations, e.g. [`TlsConfig::default`].

use std::fmt;
use std::sync::Arc;

use rustls::client::{ClientSessionMemoryCache, ClientSessionStore};
use rustls::RootCertStore;

use crate::client::conn::tls::{self, SessionResumption, Verification};
use crate::fingerprint::Profile;

/// Capacity of a [`SessionCache`] created with a capacity of zero.
pub const DEFAULT_SESSION_CACHE_CAPACITY: usize = 64;

/// A bounded in-memory TLS session cache.
///
/// Cloning the cache shares the underlying storage.
#[derive(Clone)]
pub struct SessionCache {
    capacity: usize,
    store: Arc<ClientSessionMemoryCache>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` sessions.
    ///
    /// A capacity of zero selects [`DEFAULT_SESSION_CACHE_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_SESSION_CACHE_CAPACITY
        } else {
            capacity
        };

        Self {
            capacity,
            store: Arc::new(ClientSessionMemoryCache::new(capacity)),
        }
    }

    /// The maximum number of sessions held by this cache.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn store(&self) -> Arc<dyn ClientSessionStore> {
        self.store.clone()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Settings for standard TLS handshakes.
///
/// The `Default` value verifies certificates against the platform roots and
/// does not resume sessions.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Accept any certificate chain.
    pub insecure_skip_verify: bool,

    /// Cache used for session resumption. Sessions are not resumed when unset.
    pub session_cache: Option<SessionCache>,

    /// Trusted roots. The platform roots are used when unset.
    pub roots: Option<Arc<RootCertStore>>,

    /// ALPN protocols offered in the handshake.
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl TlsConfig {
    /// The configuration used when the caller supplies none.
    ///
    /// Certificate verification is disabled and sessions are cached in a
    /// bounded cache of the default capacity.
    pub fn permissive() -> Self {
        Self {
            insecure_skip_verify: true,
            session_cache: Some(SessionCache::default()),
            roots: None,
            alpn_protocols: Vec::new(),
        }
    }

    /// Build a `rustls` client configuration with the ring provider.
    pub fn client_config(&self) -> Result<rustls::ClientConfig, rustls::Error> {
        let verification = if self.insecure_skip_verify {
            Verification::Skip
        } else {
            Verification::Strict(self.roots.clone())
        };

        let resumption = match &self.session_cache {
            Some(cache) => SessionResumption::Store {
                store: cache.store(),
                tickets: true,
            },
            None => SessionResumption::Disabled,
        };

        tls::client_config(
            Arc::new(rustls::crypto::ring::default_provider()),
            verification,
            resumption,
            self.alpn_protocols.clone(),
        )
    }
}

/// Settings for the fingerprinted handshake to origin servers.
///
/// The `Default` value uses the default [`Profile`], verifies certificates
/// against the platform roots and does not resume sessions.
#[derive(Debug, Clone, Default)]
pub struct FingerprintConfig {
    /// The handshake profile.
    pub profile: Profile,

    /// Accept any certificate chain.
    pub insecure_skip_verify: bool,

    /// Verify certificate chains, but ignore their validity periods.
    pub insecure_skip_time_verify: bool,

    /// Cache used for session resumption. Sessions are not resumed when unset.
    pub session_cache: Option<SessionCache>,

    /// Omit an empty pre-shared key extension from the handshake.
    ///
    /// `rustls` never sends an empty extension, so this only records intent.
    pub omit_empty_psk: bool,

    /// Skip session resumption when the profile offers no session ticket
    /// extension.
    pub prefer_skip_resumption_on_nil_extension: bool,

    /// Trusted roots. The platform roots are used when unset.
    pub roots: Option<Arc<RootCertStore>>,
}

impl FingerprintConfig {
    /// The configuration used when the caller supplies none.
    ///
    /// Certificate verification is disabled, sessions are cached in a bounded
    /// cache of the default capacity, validity periods are ignored, empty PSK
    /// extensions are omitted and resumption is skipped for profiles without a
    /// session ticket extension.
    pub fn permissive() -> Self {
        Self {
            profile: Profile::default(),
            insecure_skip_verify: true,
            insecure_skip_time_verify: true,
            session_cache: Some(SessionCache::default()),
            omit_empty_psk: true,
            prefer_skip_resumption_on_nil_extension: true,
            roots: None,
        }
    }

    /// Build a `rustls` client configuration shaped by the profile.
    pub fn client_config(&self) -> Result<rustls::ClientConfig, rustls::Error> {
        let verification = if self.insecure_skip_verify {
            Verification::Skip
        } else if self.insecure_skip_time_verify {
            Verification::RelaxedTime(self.roots.clone())
        } else {
            Verification::Strict(self.roots.clone())
        };

        let tickets = self.profile.session_tickets();
        let resumption = match &self.session_cache {
            Some(_) if !tickets && self.prefer_skip_resumption_on_nil_extension => {
                tracing::trace!(
                    profile = self.profile.name(),
                    "skipping session resumption"
                );
                SessionResumption::Disabled
            }
            Some(cache) => SessionResumption::Store {
                store: cache.store(),
                tickets,
            },
            None => SessionResumption::Disabled,
        };

        tls::client_config(
            self.profile.crypto_provider(),
            verification,
            resumption,
            self.profile.alpn_protocols().to_vec(),
        )
    }
}

/// The TLS configurations a client runs with.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    tls: Arc<TlsConfig>,
    fingerprint: Arc<FingerprintConfig>,
}

impl ResolvedConfig {
    /// Fill in missing configurations with their permissive defaults.
    ///
    /// Supplied configurations are kept as given.
    pub fn resolve(
        tls: Option<Arc<TlsConfig>>,
        fingerprint: Option<Arc<FingerprintConfig>>,
    ) -> Self {
        Self {
            tls: tls.unwrap_or_else(|| Arc::new(TlsConfig::permissive())),
            fingerprint: fingerprint.unwrap_or_else(|| Arc::new(FingerprintConfig::permissive())),
        }
    }

    /// Standard TLS settings.
    pub fn tls(&self) -> &Arc<TlsConfig> {
        &self.tls
    }

    /// Fingerprinted TLS settings.
    pub fn fingerprint(&self) -> &Arc<FingerprintConfig> {
        &self.fingerprint
    }
}
