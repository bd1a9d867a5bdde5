//! Handshake profiles for the fingerprinting transport.
//!
//! A [`Profile`] describes the observable shape of a client: the order of its
//! offered cipher suites and key-exchange groups, the application protocols it
//! advertises, whether it offers session tickets, and the settings it sends
//! when opening an HTTP/2 connection.
//!
//! Profiles are applied on top of the [ring](rustls::crypto::ring) crypto
//! provider. Entries the provider does not implement are skipped, so a profile
//! shapes the handshake as closely as `rustls` allows rather than byte-for-byte.

use std::sync::Arc;

use hyper::client::conn::http2::Builder as Http2Builder;
use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, NamedGroup};

use crate::bridge::TokioExecutor;

mod profiles;

/// HTTP/2 connection settings sent by a profile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    /// `SETTINGS_INITIAL_WINDOW_SIZE`
    pub initial_stream_window_size: Option<u32>,

    /// Connection-level flow control window.
    pub initial_connection_window_size: Option<u32>,

    /// `SETTINGS_MAX_FRAME_SIZE`
    pub max_frame_size: Option<u32>,

    /// `SETTINGS_MAX_HEADER_LIST_SIZE`
    pub max_header_list_size: Option<u32>,
}

impl Http2Settings {
    pub(crate) fn apply(&self, builder: &mut Http2Builder<TokioExecutor>) {
        if let Some(size) = self.initial_stream_window_size {
            builder.initial_stream_window_size(size);
        }
        if let Some(size) = self.initial_connection_window_size {
            builder.initial_connection_window_size(size);
        }
        if let Some(size) = self.max_frame_size {
            builder.max_frame_size(size);
        }
        if let Some(size) = self.max_header_list_size {
            builder.max_header_list_size(size);
        }
    }
}

/// The handshake shape of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    name: &'static str,
    cipher_suites: Vec<CipherSuite>,
    kx_groups: Vec<NamedGroup>,
    alpn_protocols: Vec<Vec<u8>>,
    session_tickets: bool,
    http2: Http2Settings,
}

impl Default for Profile {
    fn default() -> Self {
        Self::chrome()
    }
}

impl Profile {
    /// Build a custom profile.
    ///
    /// Cipher suites and groups are offered in the order given.
    pub fn new(
        name: &'static str,
        cipher_suites: Vec<CipherSuite>,
        kx_groups: Vec<NamedGroup>,
    ) -> Self {
        Self {
            name,
            cipher_suites,
            kx_groups,
            alpn_protocols: vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            session_tickets: true,
            http2: Http2Settings::default(),
        }
    }

    /// Set the ALPN protocols advertised by this profile.
    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Set whether this profile offers the session ticket extension.
    pub fn with_session_tickets(mut self, enabled: bool) -> Self {
        self.session_tickets = enabled;
        self
    }

    /// Set the HTTP/2 settings sent by this profile.
    pub fn with_http2(mut self, settings: Http2Settings) -> Self {
        self.http2 = settings;
        self
    }

    /// The name of the profile, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cipher suites, in offer order.
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Key-exchange groups, in offer order.
    pub fn kx_groups(&self) -> &[NamedGroup] {
        &self.kx_groups
    }

    /// ALPN protocols, in offer order.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// Whether the session ticket extension is offered.
    pub fn session_tickets(&self) -> bool {
        self.session_tickets
    }

    /// HTTP/2 settings.
    pub fn http2(&self) -> &Http2Settings {
        &self.http2
    }

    /// A ring crypto provider with cipher suites and groups reordered to match
    /// this profile.
    pub fn crypto_provider(&self) -> Arc<CryptoProvider> {
        let mut provider = rustls::crypto::ring::default_provider();

        let suites = reorder(&provider.cipher_suites, &self.cipher_suites, |suite| {
            suite.suite()
        });
        if suites.is_empty() {
            tracing::warn!(
                profile = self.name,
                "no profile cipher suites are supported, using provider order"
            );
        } else {
            provider.cipher_suites = suites;
        }

        let groups = reorder(&provider.kx_groups, &self.kx_groups, |group| group.name());
        if groups.is_empty() {
            tracing::warn!(
                profile = self.name,
                "no profile key exchange groups are supported, using provider order"
            );
        } else {
            provider.kx_groups = groups;
        }

        Arc::new(provider)
    }
}

/// Pick entries from `available` in the order given by `wanted`.
fn reorder<T, K, F>(available: &[T], wanted: &[K], key: F) -> Vec<T>
where
    T: Clone,
    K: PartialEq,
    F: Fn(&T) -> K,
{
    wanted
        .iter()
        .filter_map(|want| available.iter().find(|item| key(item) == *want).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_is_default() {
        assert_eq!(Profile::default().name(), "chrome");
    }

    #[test]
    fn provider_follows_profile_order() {
        let profile = Profile::new(
            "custom",
            vec![
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS13_AES_128_GCM_SHA256,
            ],
            vec![NamedGroup::secp256r1, NamedGroup::X25519],
        );

        let provider = profile.crypto_provider();
        let suites: Vec<_> = provider.cipher_suites.iter().map(|s| s.suite()).collect();
        assert_eq!(
            suites,
            vec![
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS13_AES_128_GCM_SHA256,
            ]
        );

        let groups: Vec<_> = provider.kx_groups.iter().map(|g| g.name()).collect();
        assert_eq!(groups, vec![NamedGroup::secp256r1, NamedGroup::X25519]);
    }

    #[test]
    fn unsupported_entries_fall_back() {
        let profile = Profile::new(
            "empty",
            vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA],
            vec![NamedGroup::FFDHE2048],
        );

        let provider = profile.crypto_provider();
        let default = rustls::crypto::ring::default_provider();
        assert_eq!(provider.cipher_suites.len(), default.cipher_suites.len());
        assert_eq!(provider.kx_groups.len(), default.kx_groups.len());
    }

    #[test]
    fn builtin_profiles_are_supported() {
        for profile in [
            Profile::chrome(),
            Profile::firefox(),
            Profile::safari(),
            Profile::rustls(),
        ] {
            let provider = profile.crypto_provider();
            assert_eq!(
                provider.cipher_suites.len(),
                profile.cipher_suites().len(),
                "{} lists a suite ring lacks",
                profile.name()
            );
        }
    }
}
