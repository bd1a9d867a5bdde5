use std::fmt;

use http::uri::{Authority, Scheme};

use super::UriError;

/// Pool key identifying the origin a connection was opened to: scheme
/// and authority.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct UriKey(Scheme, Authority);

impl UriKey {
    /// The scheme of the origin.
    pub fn scheme(&self) -> &Scheme {
        &self.0
    }

    /// The authority of the origin.
    pub fn authority(&self) -> &Authority {
        &self.1
    }

    /// The host, without IPv6 brackets.
    pub fn host(&self) -> &str {
        self.1
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    /// The port, defaulting by scheme.
    pub fn port(&self) -> u16 {
        self.1.port_u16().unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    /// Whether the origin is reached over TLS.
    pub fn is_https(&self) -> bool {
        self.0 == Scheme::HTTPS
    }
}

impl fmt::Display for UriKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.0, self.1)
    }
}

impl TryFrom<&http::Uri> for UriKey {
    type Error = UriError;

    fn try_from(uri: &http::Uri) -> Result<Self, Self::Error> {
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| UriError::MissingScheme(uri.clone()))?;

        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(UriError::UnsupportedScheme(uri.clone()));
        }

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| UriError::MissingAuthority(uri.clone()))?;

        Ok(Self(scheme, authority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_uri() {
        let uri = http::Uri::from_static("http://localhost:8080/path?query");
        let key = UriKey::try_from(&uri).unwrap();
        assert_eq!(key.scheme(), &Scheme::HTTP);
        assert_eq!(key.authority().as_str(), "localhost:8080");
        assert_eq!(key.to_string(), "http://localhost:8080");
    }

    #[test]
    fn default_ports() {
        let key = UriKey::try_from(&http::Uri::from_static("https://example.com")).unwrap();
        assert_eq!(key.port(), 443);
        assert!(key.is_https());

        let key = UriKey::try_from(&http::Uri::from_static("http://[::1]")).unwrap();
        assert_eq!(key.port(), 80);
        assert_eq!(key.host(), "::1");
    }

    #[test]
    fn relative_uri_is_rejected() {
        let uri = http::Uri::from_static("/path");
        assert!(matches!(
            UriKey::try_from(&uri),
            Err(UriError::MissingScheme(_))
        ));
    }

    #[test]
    fn other_schemes_are_rejected() {
        let uri = http::Uri::from_static("grpc://example.com");
        assert!(matches!(
            UriKey::try_from(&uri),
            Err(UriError::UnsupportedScheme(_))
        ));
    }
}
