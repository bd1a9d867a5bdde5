//! Cookie storage.

use std::fmt;

use bytes::Bytes;
use http::HeaderValue;
use parking_lot::RwLock;
use url::Url;

/// Storage for cookies across requests.
pub trait CookieStore: Send + Sync {
    /// Store the cookies from `Set-Cookie` headers received from `url`.
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url);

    /// The `Cookie` header value to send to `url`, if any cookies apply.
    fn cookies(&self, url: &Url) -> Option<HeaderValue>;
}

/// The default cookie store, an in-memory jar.
#[derive(Default)]
pub struct Jar(RwLock<cookie_store::CookieStore>);

impl Jar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie in `Set-Cookie` syntax, as though `url` had sent it.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        let cookies = cookie_store::RawCookie::parse(cookie)
            .ok()
            .map(|cookie| cookie.into_owned())
            .into_iter();
        self.0.write().store_response_cookies(cookies, url);
    }
}

impl fmt::Debug for Jar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jar").finish_non_exhaustive()
    }
}

impl CookieStore for Jar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies = cookie_headers.filter_map(|value| {
            let value = value.to_str().ok()?;
            cookie_store::RawCookie::parse(value)
                .map(|cookie| cookie.into_owned())
                .ok()
        });

        self.0.write().store_response_cookies(cookies, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .0
            .read()
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            return None;
        }

        HeaderValue::from_maybe_shared(Bytes::from(header)).ok()
    }
}

/// Attach stored cookies to an outgoing request, unless the caller set a
/// `Cookie` header already.
pub(crate) fn inject(store: &dyn CookieStore, request: &mut http::Request<crate::Body>) {
    if request.headers().contains_key(http::header::COOKIE) {
        return;
    }

    let Some(url) = request_url(request.uri()) else {
        return;
    };

    if let Some(value) = store.cookies(&url) {
        request.headers_mut().insert(http::header::COOKIE, value);
    }
}

/// Store the cookies set by a response to a request for `uri`.
pub(crate) fn capture(store: &dyn CookieStore, uri: &http::Uri, headers: &http::HeaderMap) {
    let Some(url) = request_url(uri) else {
        return;
    };

    let mut values = headers.get_all(http::header::SET_COOKIE).iter();
    store.set_cookies(&mut values, &url);
}

fn request_url(uri: &http::Uri) -> Option<Url> {
    Url::parse(&uri.to_string()).ok()
}
