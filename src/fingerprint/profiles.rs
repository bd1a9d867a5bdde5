//! Builtin browser profiles.
//!
//! Orders follow the browsers' ClientHello, restricted to the suites and
//! groups the ring provider implements.

use rustls::{CipherSuite, NamedGroup};

use super::{Http2Settings, Profile};

const CHROME_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

const FIREFOX_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
];

const SAFARI_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

const BROWSER_GROUPS: &[NamedGroup] = &[
    NamedGroup::X25519,
    NamedGroup::secp256r1,
    NamedGroup::secp384r1,
];

impl Profile {
    /// Chrome on desktop.
    pub fn chrome() -> Self {
        Self::new("chrome", CHROME_CIPHER_SUITES.to_vec(), BROWSER_GROUPS.to_vec()).with_http2(
            Http2Settings {
                initial_stream_window_size: Some(6_291_456),
                initial_connection_window_size: Some(15_728_640),
                max_frame_size: None,
                max_header_list_size: Some(262_144),
            },
        )
    }

    /// Firefox on desktop.
    pub fn firefox() -> Self {
        Self::new(
            "firefox",
            FIREFOX_CIPHER_SUITES.to_vec(),
            BROWSER_GROUPS.to_vec(),
        )
        .with_http2(Http2Settings {
            initial_stream_window_size: Some(131_072),
            initial_connection_window_size: Some(12_582_912),
            max_frame_size: Some(16_384),
            max_header_list_size: None,
        })
    }

    /// Safari on macOS.
    pub fn safari() -> Self {
        Self::new("safari", SAFARI_CIPHER_SUITES.to_vec(), BROWSER_GROUPS.to_vec())
            .with_session_tickets(false)
            .with_http2(Http2Settings {
                initial_stream_window_size: Some(2_097_152),
                initial_connection_window_size: Some(10_485_760),
                max_frame_size: None,
                max_header_list_size: None,
            })
    }

    /// The unmodified order of the ring provider.
    pub fn rustls() -> Self {
        let provider = rustls::crypto::ring::default_provider();
        Self::new(
            "rustls",
            provider
                .cipher_suites
                .iter()
                .map(|suite| suite.suite())
                .collect(),
            provider.kx_groups.iter().map(|group| group.name()).collect(),
        )
    }
}
