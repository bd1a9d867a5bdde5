//! Request preparation before a request is written to a connection.

use http::uri::{Port, Scheme};
use http::{HeaderValue, Method, Uri, Version};
use tracing::warn;

use crate::client::Error;

/// How the request target is written on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// Directly to the origin, or through a tunnel.
    Origin,

    /// Through a forwarding HTTP proxy, optionally authenticating.
    Forward(Option<HeaderValue>),
}

/// Prepare a request for sending over a connection speaking `version`.
pub(crate) fn prepare_request<B>(
    request: &mut http::Request<B>,
    version: Version,
    target: &Target,
    user_agent: Option<&HeaderValue>,
) -> Result<(), Error> {
    if let Some(user_agent) = user_agent {
        request
            .headers_mut()
            .entry(http::header::USER_AGENT)
            .or_insert_with(|| user_agent.clone());
    }

    if version == Version::HTTP_11 {
        if request.version() == Version::HTTP_2 || request.version() == Version::HTTP_3 {
            warn!(
                "refusing to send {:?} request to HTTP/1.1 connection",
                request.version()
            );
            return Err(Error::UnsupportedProtocol);
        }

        set_host_header(request);

        if request.method() == Method::CONNECT {
            authority_form(request.uri_mut());
        } else if let Target::Forward(authorization) = target {
            if let Some(value) = authorization {
                request
                    .headers_mut()
                    .entry(http::header::PROXY_AUTHORIZATION)
                    .or_insert_with(|| value.clone());
            }
        } else {
            origin_form(request.uri_mut());
        }
    } else if request.method() == Method::CONNECT {
        warn!("refusing to send CONNECT request to HTTP/2 connection");
        return Err(Error::InvalidMethod(Method::CONNECT));
    } else {
        *request.version_mut() = Version::HTTP_2;
    }

    Ok(())
}

/// Convert the URI to authority-form, used by HTTP/1 CONNECT requests.
fn authority_form(uri: &mut Uri) {
    if let Some(authority) = uri.authority() {
        let mut parts = http::uri::Parts::default();
        parts.authority = Some(authority.clone());
        if let Ok(authority) = Uri::from_parts(parts) {
            *uri = authority;
        }
    }
}

/// Convert the URI to origin-form: just the path and query.
fn origin_form(uri: &mut Uri) {
    *uri = match uri.path_and_query() {
        Some(path) if path.as_str() != "/" => {
            let mut parts = http::uri::Parts::default();
            parts.path_and_query = Some(path.clone());
            Uri::from_parts(parts).unwrap_or_default()
        }
        _none_or_just_slash => Uri::default(),
    };
}

/// Returns the port if it is not the default port for the scheme.
fn non_default_port(uri: &Uri) -> Option<Port<&str>> {
    let secure = uri.scheme() == Some(&Scheme::HTTPS);
    match (uri.port_u16(), secure) {
        (Some(443), true) | (Some(80), false) => None,
        _ => uri.port(),
    }
}

/// Set the Host header from the URI authority, unless already set.
fn set_host_header<B>(request: &mut http::Request<B>) {
    let Some(host) = request.uri().host() else {
        return;
    };

    let value = match non_default_port(request.uri()) {
        Some(port) => HeaderValue::from_str(&format!("{host}:{port}")),
        None => HeaderValue::from_str(host),
    };

    if let Ok(value) = value {
        request
            .headers_mut()
            .entry(http::header::HOST)
            .or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &'static str) -> http::Request<()> {
        http::Request::get(uri).body(()).unwrap()
    }

    #[test]
    fn http1_origin_form_with_host() {
        let mut req = request("http://example.com:8080/path?q=1");
        prepare_request(&mut req, Version::HTTP_11, &Target::Origin, None).unwrap();

        assert_eq!(req.uri(), "/path?q=1");
        assert_eq!(req.headers()[http::header::HOST], "example.com:8080");
    }

    #[test]
    fn default_port_omitted_from_host() {
        let mut req = request("https://example.com:443/");
        prepare_request(&mut req, Version::HTTP_11, &Target::Origin, None).unwrap();

        assert_eq!(req.uri(), "/");
        assert_eq!(req.headers()[http::header::HOST], "example.com");
    }

    #[test]
    fn forwarded_request_keeps_absolute_form() {
        let mut req = request("http://example.com/index.html");
        let target = Target::Forward(Some(HeaderValue::from_static("Basic abc")));
        prepare_request(&mut req, Version::HTTP_11, &target, None).unwrap();

        assert_eq!(req.uri(), "http://example.com/index.html");
        assert_eq!(req.headers()[http::header::PROXY_AUTHORIZATION], "Basic abc");
    }

    #[test]
    fn caller_user_agent_wins() {
        let ua = HeaderValue::from_static("hyperguise/test");

        let mut req = request("http://example.com/");
        prepare_request(&mut req, Version::HTTP_11, &Target::Origin, Some(&ua)).unwrap();
        assert_eq!(req.headers()[http::header::USER_AGENT], "hyperguise/test");

        let mut req = http::Request::get("http://example.com/")
            .header(http::header::USER_AGENT, "custom")
            .body(())
            .unwrap();
        prepare_request(&mut req, Version::HTTP_11, &Target::Origin, Some(&ua)).unwrap();
        assert_eq!(req.headers()[http::header::USER_AGENT], "custom");
    }

    #[test]
    fn http2_request_refused_on_http1() {
        let mut req = request("http://example.com/");
        *req.version_mut() = Version::HTTP_2;

        let error = prepare_request(&mut req, Version::HTTP_11, &Target::Origin, None).unwrap_err();
        assert!(matches!(error, Error::UnsupportedProtocol));
    }

    #[test]
    fn connect_refused_on_http2() {
        let mut req = http::Request::connect("https://example.com")
            .body(())
            .unwrap();

        let error = prepare_request(&mut req, Version::HTTP_2, &Target::Origin, None).unwrap_err();
        assert!(matches!(error, Error::InvalidMethod(Method::CONNECT)));
    }

    #[test]
    fn connect_uses_authority_form() {
        let mut req = http::Request::connect("http://example.com:443")
            .body(())
            .unwrap();
        prepare_request(&mut req, Version::HTTP_11, &Target::Origin, None).unwrap();

        assert_eq!(req.uri(), "example.com:443");
    }
}
