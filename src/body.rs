//! A [Body](http_body::Body) which can wrap the different bodies produced by
//! the transports in this crate.
//!
//! Responses from the fingerprinting transport carry [hyper::body::Incoming],
//! responses from an adapted transport carry whatever body the external
//! transport produced. Both are exposed as [`Body`], and both are bound to the
//! scope of the connection which produced them.

use std::fmt;
use std::future::Future as _;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Full;

use crate::scope::{Cancellation, Cancelled, Scope};
use crate::BoxError;

/// An http request using [Body] as the body.
pub type Request = http::Request<Body>;

/// An http response using [Body] as the body.
pub type Response = http::Response<Body>;

/// A wrapper for different internal body types which implements [http_body::Body](http_body::Body)
///
/// Bodies can be created from [`Bytes`](bytes::Bytes), [`String`](std::string::String),
/// or [`&'static str`](str) using [`From`](std::convert::From) implementations.
///
/// An empty body can be created with [Body::empty](Body::empty).
#[derive(Debug)]
#[pin_project::pin_project]
pub struct Body {
    #[pin]
    inner: InnerBody,
}

impl Body {
    /// Create a new `Body` that wraps another [`http_body::Body`].
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        try_downcast(body).unwrap_or_else(|body| Self {
            inner: InnerBody::Boxed(Box::pin(body.map_err(Into::into))),
        })
    }

    /// Create a new empty body.
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }

    /// Bind this body to a scope.
    ///
    /// Once the scope is cancelled the wrapped body is dropped, releasing
    /// whatever resources it held. A body which had not reached its end
    /// yields a [`Cancelled`] error, so truncation is never mistaken for a
    /// complete body.
    pub(crate) fn scoped(self, scope: &Scope) -> Self {
        Self {
            inner: InnerBody::Scoped(Box::new(ScopedBody {
                body: self,
                closed: scope.cancelled(),
                finished: false,
            })),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(body: Bytes) -> Self {
        Self {
            inner: InnerBody::Full(body.into()),
        }
    }
}

impl From<String> for Body {
    fn from(body: String) -> Self {
        if body.is_empty() {
            Self::empty()
        } else {
            Self {
                inner: InnerBody::Full(body.into()),
            }
        }
    }
}

impl From<&'static str> for Body {
    fn from(body: &'static str) -> Self {
        Self {
            inner: InnerBody::Full(body.into()),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(body: Vec<u8>) -> Self {
        Self {
            inner: InnerBody::Full(body.into()),
        }
    }
}

impl From<Full<Bytes>> for Body {
    fn from(body: Full<Bytes>) -> Self {
        Self {
            inner: InnerBody::Full(body),
        }
    }
}

impl From<hyper::body::Incoming> for Body {
    fn from(body: hyper::body::Incoming) -> Self {
        Self {
            inner: InnerBody::Incoming(body),
        }
    }
}

fn try_downcast<T, K>(k: K) -> Result<T, K>
where
    T: 'static,
    K: Send + 'static,
{
    let mut k = Some(k);
    if let Some(k) = <dyn std::any::Any>::downcast_mut::<Option<T>>(&mut k) {
        Ok(k.take().expect("downcast value is present"))
    } else {
        Err(k.expect("value is present when downcast fails"))
    }
}

#[pin_project::pin_project(project = InnerBodyProj)]
enum InnerBody {
    Empty,
    Full(#[pin] Full<Bytes>),
    Boxed(#[pin] Pin<Box<dyn http_body::Body<Data = Bytes, Error = BoxError> + Send + 'static>>),
    Incoming(#[pin] hyper::body::Incoming),
    Scoped(Box<ScopedBody>),
}

/// A body which is abandoned when its scope is cancelled.
struct ScopedBody {
    body: Body,
    closed: Cancellation,

    /// Set once the body has ended, either normally or by cancellation.
    finished: bool,
}

impl ScopedBody {
    fn poll_frame(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, BoxError>>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if Pin::new(&mut self.closed).poll(cx).is_ready() {
            self.finished = true;
            if http_body::Body::is_end_stream(&self.body) {
                return Poll::Ready(None);
            }

            tracing::trace!("connection closed, abandoning response body");
            self.body = Body::empty();
            return Poll::Ready(Some(Err(Cancelled.into())));
        }

        let frame = ready!(http_body::Body::poll_frame(Pin::new(&mut self.body), cx));
        if frame.is_none() {
            self.finished = true;
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.finished || http_body::Body::is_end_stream(&self.body)
    }
}

macro_rules! poll_frame {
    ($body:ident, $cx:ident) => {
        $body
            .poll_frame($cx)
            .map(|opt| opt.map(|res| res.map_err(Into::into)))
    };
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.inner.project() {
            InnerBodyProj::Empty => Poll::Ready(None),
            InnerBodyProj::Full(body) => poll_frame!(body, cx),
            InnerBodyProj::Boxed(body) => poll_frame!(body, cx),
            InnerBodyProj::Incoming(body) => poll_frame!(body, cx),
            InnerBodyProj::Scoped(body) => body.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.inner {
            InnerBody::Empty => true,
            InnerBody::Full(ref body) => body.is_end_stream(),
            InnerBody::Boxed(ref body) => body.is_end_stream(),
            InnerBody::Incoming(ref body) => body.is_end_stream(),
            InnerBody::Scoped(ref body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self.inner {
            InnerBody::Empty => http_body::SizeHint::with_exact(0),
            InnerBody::Full(ref body) => body.size_hint(),
            InnerBody::Boxed(ref body) => body.size_hint(),
            InnerBody::Incoming(ref body) => body.size_hint(),
            InnerBody::Scoped(ref body) => body.body.size_hint(),
        }
    }
}

impl fmt::Debug for InnerBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerBody::Empty => f.debug_struct("Empty").finish(),
            InnerBody::Full(_) => f.debug_struct("Full").finish(),
            InnerBody::Boxed(_) => f.debug_struct("Boxed").finish(),
            InnerBody::Incoming(_) => f.debug_struct("Incoming").finish(),
            InnerBody::Scoped(body) => f.debug_tuple("Scoped").field(&body.body).finish(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Body: Send, Unpin);

    #[tokio::test]
    async fn full_body_collects() {
        let body = Body::from("hello");
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn boxed_body_is_downcast() {
        let body = Body::new(Body::from("inner"));
        assert!(matches!(body.inner, InnerBody::Full(_)));
    }

    #[tokio::test]
    async fn scoped_body_fails_on_cancel() {
        let scope = Scope::background();
        let body = Body::from("never read").scoped(&scope);
        scope.cancel();

        let error = body.collect().await.unwrap_err();
        assert!(error.is::<Cancelled>());
    }

    #[tokio::test]
    async fn scoped_body_cancelled_mid_stream() {
        use futures_util::StreamExt as _;

        let scope = Scope::background();
        let frames = futures_util::stream::iter([Ok::<_, std::convert::Infallible>(
            http_body::Frame::data(Bytes::from("partial")),
        )])
        .chain(futures_util::stream::pending());
        let mut body = Body::new(http_body_util::StreamBody::new(frames)).scoped(&scope);

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "partial");

        scope.cancel();
        let error = body.frame().await.unwrap().unwrap_err();
        assert!(error.is::<Cancelled>());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn finished_body_ignores_cancel() {
        let scope = Scope::background();
        let mut body = Body::from("done").scoped(&scope);

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "done");

        scope.cancel();
        assert!(body.frame().await.is_none());
        assert!(http_body::Body::is_end_stream(&body));
    }

    #[tokio::test]
    async fn empty_body_ends_cleanly_on_cancel() {
        let scope = Scope::background();
        let body = Body::empty().scoped(&scope);
        scope.cancel();

        let bytes = body.collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn scoped_body_reads_while_open() {
        let scope = Scope::background();
        let body = Body::from("open").scoped(&scope);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"open");
    }
}
