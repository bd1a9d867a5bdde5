//! Construction of `rustls` client configurations.
//!
//! Certificate verification is selected by [`Verification`]:
//!
//! - [`Verification::Skip`] accepts any certificate chain, but still checks
//!   handshake signatures so that the peer must hold the key for the
//!   certificate it presented.
//! - [`Verification::RelaxedTime`] performs WebPKI verification, but tolerates
//!   certificates which are expired or not yet valid.
//! - [`Verification::Strict`] performs WebPKI verification.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ClientSessionStore, Resumption, Tls12Resumption, WebPkiServerVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// How server certificates are checked during the handshake.
#[derive(Debug, Clone)]
pub(crate) enum Verification {
    Skip,
    RelaxedTime(Option<Arc<RootCertStore>>),
    Strict(Option<Arc<RootCertStore>>),
}

/// How TLS sessions are resumed.
#[derive(Debug, Clone)]
pub(crate) enum SessionResumption {
    Disabled,
    Store {
        store: Arc<dyn ClientSessionStore>,
        tickets: bool,
    },
}

/// Build a client configuration from the given parts.
pub(crate) fn client_config(
    provider: Arc<CryptoProvider>,
    verification: Verification,
    resumption: SessionResumption,
    alpn_protocols: Vec<Vec<u8>>,
) -> Result<ClientConfig, rustls::Error> {
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?;

    let verifier: Arc<dyn ServerCertVerifier> = match verification {
        Verification::Skip => Arc::new(NoVerifier::new(&provider)),
        Verification::RelaxedTime(roots) => Arc::new(RelaxedTimeVerifier {
            inner: webpki_verifier(roots, provider.clone())?,
        }),
        Verification::Strict(roots) => webpki_verifier(roots, provider.clone())?,
    };

    let mut config = builder
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    config.alpn_protocols = alpn_protocols;
    config.resumption = match resumption {
        SessionResumption::Disabled => Resumption::disabled(),
        SessionResumption::Store { store, tickets } => {
            let resumption = Resumption::store(store);
            if tickets {
                resumption.tls12_resumption(Tls12Resumption::SessionIdOrTickets)
            } else {
                resumption.tls12_resumption(Tls12Resumption::SessionIdOnly)
            }
        }
    };

    Ok(config)
}

fn webpki_verifier(
    roots: Option<Arc<RootCertStore>>,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<WebPkiServerVerifier>, rustls::Error> {
    let roots = roots.unwrap_or_else(native_roots);
    WebPkiServerVerifier::builder_with_provider(roots, provider)
        .build()
        .map_err(|error| rustls::Error::General(error.to_string()))
}

/// Load the platform's trusted root certificates.
pub(crate) fn native_roots() -> Arc<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        tracing::warn!("error loading platform certificates: {error}");
    }

    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    tracing::trace!(added, ignored, "loaded platform certificates");
    Arc::new(roots)
}

/// Accepts any certificate chain.
#[derive(Debug)]
struct NoVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl NoVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// WebPKI verification which ignores certificate validity periods.
///
/// When verification fails on a certificate error, the chain is verified again
/// as of a moment inside the leaf certificate's validity window.
#[derive(Debug)]
struct RelaxedTimeVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for RelaxedTimeVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let error = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(error @ rustls::Error::InvalidCertificate(_)) => error,
            Err(error) => return Err(error),
        };

        let Some(valid_at) = validity_start(end_entity) else {
            return Err(error);
        };

        tracing::debug!(%error, "retrying certificate verification inside the validity window");
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            valid_at,
        )
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// One second after the leaf certificate's `notBefore`.
fn validity_start(end_entity: &CertificateDer<'_>) -> Option<UnixTime> {
    let (_, certificate) = x509_parser::parse_x509_certificate(end_entity.as_ref()).ok()?;
    let not_before = certificate.validity().not_before.timestamp();
    let seconds = u64::try_from(not_before).ok()?.checked_add(1)?;
    Some(UnixTime::since_unix_epoch(Duration::from_secs(seconds)))
}
