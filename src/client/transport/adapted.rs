//! Transport adapted from an externally owned round tripper.
//!
//! The external transport owns its connections. Responses it produces carry
//! a [`DegradedConnection`], which supports closing the response and nothing
//! else.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt as _;
use tower::ServiceExt as _;

use crate::client::conn::{Connection, DegradedConnection};
use crate::client::{Error, Response};
use crate::scope::Scope;
use crate::{Body, BoxError, BoxFuture};

/// Releases idle connections held by an external transport.
pub trait CloseIdle: Send + Sync {
    /// Release idle connections.
    fn close_idle_connections(&self);
}

/// An externally owned transport which sends one request and produces one
/// response.
pub trait RoundTrip: Send + Sync + 'static {
    /// Send a request.
    fn round_trip(
        &self,
        request: http::Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, BoxError>>;

    /// Access to idle-connection release, if this transport supports it.
    fn idle_closer(&self) -> Option<&dyn CloseIdle> {
        None
    }
}

/// Adapts a [`tower::Service`] into a [`RoundTrip`].
#[derive(Clone)]
pub struct ServiceTransport<S> {
    service: S,
    closer: Option<Arc<dyn CloseIdle>>,
}

impl<S> ServiceTransport<S> {
    /// Wrap a service.
    pub fn new(service: S) -> Self {
        Self {
            service,
            closer: None,
        }
    }

    /// Expose idle-connection release for the wrapped service.
    pub fn with_idle_closer(mut self, closer: Arc<dyn CloseIdle>) -> Self {
        self.closer = Some(closer);
        self
    }
}

impl<S> fmt::Debug for ServiceTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTransport")
            .field("service", &std::any::type_name::<S>())
            .field("closer", &self.closer.is_some())
            .finish()
    }
}

impl<S, B> RoundTrip for ServiceTransport<S>
where
    S: tower::Service<http::Request<Body>, Response = http::Response<B>>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    fn round_trip(
        &self,
        request: http::Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, BoxError>> {
        let service = self.service.clone();
        async move {
            service
                .oneshot(request)
                .await
                .map(|response| response.map(Body::new))
                .map_err(Into::into)
        }
        .boxed()
    }

    fn idle_closer(&self) -> Option<&dyn CloseIdle> {
        self.closer.as_deref()
    }
}

/// Transport which forwards requests to a caller-supplied [`RoundTrip`].
///
/// The round tripper is shared with the caller and is never torn down by
/// this transport.
#[derive(Clone)]
pub(crate) struct AdaptedTransport {
    inner: Arc<dyn RoundTrip>,
    scope: Scope,
}

impl fmt::Debug for AdaptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptedTransport")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl AdaptedTransport {
    pub(crate) fn new(inner: Arc<dyn RoundTrip>, scope: Scope) -> Self {
        Self { inner, scope }
    }

    pub(crate) async fn dispatch(&self, request: http::Request<Body>) -> Result<Response, Error> {
        let response = self
            .scope
            .run(self.inner.round_trip(request))
            .await?
            .map_err(Error::Transport)?;

        let scope = self.scope.child();
        let response = response.map(|body| body.scoped(&scope));
        Ok(Response::new(
            response,
            Connection::Degraded(DegradedConnection::new(scope)),
        ))
    }

    pub(crate) fn close_idle_connections(&self) {
        match self.inner.idle_closer() {
            Some(closer) => closer.close_idle_connections(),
            None => tracing::trace!("adapted transport cannot release idle connections"),
        }
    }

    pub(crate) fn shutdown(&self) {
        self.close_idle_connections();
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter(AtomicUsize);

    impl CloseIdle for Counter {
        fn close_idle_connections(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ok_transport(closer: Option<Arc<dyn CloseIdle>>) -> Arc<dyn RoundTrip> {
        let transport = ServiceTransport::new(tower::service_fn(|_: http::Request<Body>| async {
            Ok::<_, Infallible>(http::Response::new(Body::from("ok")))
        }));

        match closer {
            Some(closer) => Arc::new(transport.with_idle_closer(closer)),
            None => Arc::new(transport),
        }
    }

    #[tokio::test]
    async fn dispatch_yields_degraded_connection() {
        let transport = AdaptedTransport::new(ok_transport(None), Scope::background());

        let response = transport
            .dispatch(http::Request::new(Body::empty()))
            .await
            .unwrap();
        assert!(response.connection().is_degraded());
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let failing = ServiceTransport::new(tower::service_fn(|_: http::Request<Body>| async {
            Err::<http::Response<Body>, _>(std::io::Error::other("boom"))
        }));
        let transport = AdaptedTransport::new(Arc::new(failing), Scope::background());

        let error = transport
            .dispatch(http::Request::new(Body::empty()))
            .await
            .unwrap_err();

        match error {
            Error::Transport(source) => {
                let io = source.downcast_ref::<std::io::Error>().unwrap();
                assert_eq!(io.to_string(), "boom");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_scope_refuses_dispatch() {
        let scope = Scope::background();
        let transport = AdaptedTransport::new(ok_transport(None), scope.clone());
        scope.cancel();

        let error = transport
            .dispatch(http::Request::new(Body::empty()))
            .await
            .unwrap_err();
        assert!(error.is_cancelled());
    }

    #[test]
    fn idle_release_is_forwarded() {
        let counter = Arc::new(Counter::default());
        let closer: Arc<dyn CloseIdle> = counter.clone();
        let transport = AdaptedTransport::new(ok_transport(Some(closer)), Scope::background());

        transport.close_idle_connections();
        transport.shutdown();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        let silent = AdaptedTransport::new(ok_transport(None), Scope::background());
        silent.close_idle_connections();
    }
}
