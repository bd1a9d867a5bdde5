//! Client connection types.
//!
//! Every [`Response`][crate::client::Response] carries the [`Connection`] it
//! arrived on. What a connection can do depends on the transport which
//! produced it:
//!
//! - A [`FullConnection`] is owned by the fingerprinting transport. It can be
//!   closed, can hand over an upgraded stream after `101 Switching Protocols`,
//!   and can send further requests with an explicit header order.
//! - A [`DegradedConnection`] is produced by an adapted transport, which owns
//!   its connections. It can only be closed. The other capabilities report
//!   [`Error::Unsupported`].

use std::fmt;
use std::future::Future as _;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{HeaderMap, HeaderName, HeaderValue, Version};
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper::upgrade::{OnUpgrade, Upgraded};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::bridge::TokioIo;
use crate::client::pool::{PoolRef, PoolableConnection, UriKey};
use crate::client::Error;
use crate::scope::{Cancellation, Scope};
use crate::{Body, BoxError};

pub(crate) mod request;
pub(crate) mod tcp;
pub(crate) mod tls;
pub(crate) mod tunnel;

pub use self::tcp::{ConnectError, TcpConfig};
pub use self::tunnel::TunnelError;

use self::request::{prepare_request, Target};

/// A bidirectional byte stream.
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxIo = Box<dyn Io>;

/// The sending half of an HTTP/1.1 or HTTP/2 connection.
#[derive(Debug)]
pub(crate) enum Sender {
    Http1(http1::SendRequest<Body>),
    Http2(http2::SendRequest<Body>),
}

impl Sender {
    pub(crate) fn version(&self) -> Version {
        match self {
            Sender::Http1(_) => Version::HTTP_11,
            Sender::Http2(_) => Version::HTTP_2,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Sender::Http1(sender) => sender.is_closed(),
            Sender::Http2(sender) => sender.is_closed(),
        }
    }

    pub(crate) async fn ready(&mut self) -> Result<(), hyper::Error> {
        match self {
            Sender::Http1(sender) => sender.ready().await,
            Sender::Http2(sender) => sender.ready().await,
        }
    }

    pub(crate) async fn send_request(
        &mut self,
        request: http::Request<Body>,
    ) -> Result<http::Response<Incoming>, hyper::Error> {
        match self {
            Sender::Http1(sender) => sender.send_request(request).await,
            Sender::Http2(sender) => sender.send_request(request).await,
        }
    }
}

/// An established connection as held by the pool.
#[derive(Debug)]
pub(crate) struct PoolEntry {
    pub(crate) sender: Sender,

    /// Cancelling this scope tears down the connection task.
    pub(crate) scope: Scope,

    pub(crate) target: Target,
}

impl PoolableConnection for PoolEntry {
    fn is_open(&self) -> bool {
        !self.sender.is_closed() && !self.scope.is_cancelled()
    }

    fn can_share(&self) -> bool {
        matches!(self.sender, Sender::Http2(_))
    }

    fn reuse(&self) -> Option<Self> {
        match &self.sender {
            Sender::Http2(sender) => Some(Self {
                sender: Sender::Http2(sender.clone()),
                scope: self.scope.clone(),
                target: self.target.clone(),
            }),
            Sender::Http1(_) => None,
        }
    }
}

impl PoolEntry {
    /// Prepare and send a request.
    ///
    /// `scope` bounds this one exchange and the response body. It must be
    /// derived from the connection scope.
    pub(crate) async fn send(
        &mut self,
        mut request: http::Request<Body>,
        user_agent: Option<&HeaderValue>,
        scope: &Scope,
    ) -> Result<http::Response<Body>, Error> {
        prepare_request(&mut request, self.sender.version(), &self.target, user_agent)?;

        tracing::trace!(
            request.uri = %request.uri(),
            conn.version = ?self.sender.version(),
            "sending request"
        );

        let sender = &mut self.sender;
        let response = scope
            .run(async {
                sender.ready().await?;
                sender.send_request(request).await
            })
            .await?
            .map_err(|error| Error::Protocol(error.into()))?;

        Ok(response.map(|body| Body::from(body).scoped(scope)))
    }
}

/// The connection a response arrived on.
#[derive(Debug)]
pub enum Connection {
    /// A connection owned by this library.
    Full(FullConnection),

    /// A connection owned by an external transport.
    Degraded(DegradedConnection),
}

impl Connection {
    /// Close the connection.
    ///
    /// The response body stops streaming, and reading it further fails with
    /// [`Error::Cancelled`]. The reason is logged when the connection is owned
    /// by this library, and discarded otherwise.
    ///
    /// Only this response is affected. Other responses multiplexed on the
    /// same HTTP/2 connection keep streaming.
    pub fn close_with_error(&self, reason: Option<BoxError>) {
        match self {
            Connection::Full(conn) => conn.close_with_error(reason),
            Connection::Degraded(conn) => conn.close_with_error(reason),
        }
    }

    /// Take over the byte stream of an upgraded connection.
    pub async fn duplex_stream(&mut self) -> Result<DuplexStream, Error> {
        match self {
            Connection::Full(conn) => conn.duplex_stream().await,
            Connection::Degraded(conn) => conn.duplex_stream().await,
        }
    }

    /// Send another request over this same connection, writing headers in
    /// the given order.
    pub async fn send_ordered(
        &mut self,
        request: http::Request<Body>,
        order: &OrderedHeaders,
    ) -> Result<http::Response<Body>, Error> {
        match self {
            Connection::Full(conn) => conn.send_ordered(request, order).await,
            Connection::Degraded(conn) => conn.send_ordered(request, order).await,
        }
    }

    /// The scope bounding this response on its connection.
    pub fn scope(&self) -> &Scope {
        match self {
            Connection::Full(conn) => conn.scope(),
            Connection::Degraded(conn) => conn.scope(),
        }
    }

    /// Whether only closing is supported.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Connection::Degraded(_))
    }
}

/// A connection owned by the fingerprinting transport.
///
/// When dropped, an HTTP/1.1 connection is returned to the pool once it is
/// ready to send another request.
pub struct FullConnection {
    entry: Option<PoolEntry>,

    /// Child of the entry scope, bounding this response.
    scope: Scope,
    key: UriKey,
    pool: PoolRef<PoolEntry>,
    upgrade: Option<OnUpgrade>,
    user_agent: Option<HeaderValue>,
}

impl fmt::Debug for FullConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullConnection")
            .field("key", &self.key)
            .field("version", &self.entry.as_ref().map(|e| e.sender.version()))
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

impl FullConnection {
    pub(crate) fn new(
        entry: PoolEntry,
        scope: Scope,
        key: UriKey,
        pool: PoolRef<PoolEntry>,
        upgrade: Option<OnUpgrade>,
        user_agent: Option<HeaderValue>,
    ) -> Self {
        Self {
            scope,
            entry: Some(entry),
            key,
            pool,
            upgrade,
            user_agent,
        }
    }

    /// The HTTP version spoken on this connection.
    pub fn version(&self) -> Option<Version> {
        self.entry.as_ref().map(|entry| entry.sender.version())
    }

    fn close_with_error(&self, reason: Option<BoxError>) {
        match reason {
            Some(reason) => tracing::debug!(key = %self.key, %reason, "closing connection"),
            None => tracing::debug!(key = %self.key, "closing connection"),
        }
        self.scope.cancel();

        // An HTTP/1.1 connection carries nothing but this response.
        if let Some(entry) = self.entry.as_ref().filter(|entry| !entry.can_share()) {
            entry.scope.cancel();
        }
    }

    async fn duplex_stream(&mut self) -> Result<DuplexStream, Error> {
        let upgrade = self
            .upgrade
            .take()
            .ok_or_else(|| Error::Protocol("response was not an upgrade".into()))?;

        let upgraded = self
            .scope
            .run(upgrade)
            .await?
            .map_err(|error| Error::Protocol(error.into()))?;

        tracing::trace!(key = %self.key, "connection upgraded");
        Ok(DuplexStream::new(upgraded, &self.scope))
    }

    async fn send_ordered(
        &mut self,
        mut request: http::Request<Body>,
        order: &OrderedHeaders,
    ) -> Result<http::Response<Body>, Error> {
        let entry = self.entry.as_mut().ok_or(Error::Cancelled)?;
        if self.scope.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let headers = std::mem::take(request.headers_mut());
        *request.headers_mut() = order.apply(headers);

        entry
            .send(request, self.user_agent.as_ref(), &self.scope)
            .await
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for FullConnection {
    fn drop(&mut self) {
        let Some(mut entry) = self.entry.take() else {
            return;
        };

        // Shared connections never leave the pool. Upgraded connections are
        // no longer HTTP.
        if entry.can_share() || self.upgrade.is_some() || !entry.is_open() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let pool = self.pool.clone();
        let key = self.key.clone();
        handle.spawn(async move {
            let ready = {
                let PoolEntry { sender, scope, .. } = &mut entry;
                scope.run(sender.ready()).await
            };

            match ready {
                Ok(Ok(())) => pool.checkin(key, entry),
                Ok(Err(error)) => tracing::trace!(%key, %error, "connection not reusable"),
                Err(_) => tracing::trace!(%key, "connection scope cancelled"),
            }
        });
    }
}

/// A connection owned by an adapted transport.
#[derive(Debug, Clone)]
pub struct DegradedConnection {
    scope: Scope,
}

impl DegradedConnection {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }

    fn close_with_error(&self, _reason: Option<BoxError>) {
        self.scope.cancel();
    }

    async fn duplex_stream(&mut self) -> Result<DuplexStream, Error> {
        Err(Error::Unsupported("duplex stream on an adapted transport"))
    }

    async fn send_ordered(
        &mut self,
        _request: http::Request<Body>,
        _order: &OrderedHeaders,
    ) -> Result<http::Response<Body>, Error> {
        Err(Error::Unsupported("ordered headers on an adapted transport"))
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Headers written in a fixed order ahead of the rest of a request's headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl OrderedHeaders {
    /// An empty header order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn push(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// Append a header, builder style.
    pub fn with(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.push(name, value);
        self
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    /// Build a header map with these headers first, followed by every header
    /// in `headers` whose name is not listed here.
    pub fn apply(&self, headers: HeaderMap) -> HeaderMap {
        let mut ordered = HeaderMap::with_capacity(self.entries.len() + headers.len());
        for (name, value) in &self.entries {
            ordered.append(name.clone(), value.clone());
        }

        let mut current: Option<HeaderName> = None;
        for (name, value) in headers {
            if let Some(name) = name {
                current = Some(name);
            }
            let Some(name) = current.as_ref() else {
                continue;
            };
            if self.entries.iter().any(|(listed, _)| listed == name) {
                continue;
            }
            ordered.append(name.clone(), value);
        }

        ordered
    }
}

impl FromIterator<(HeaderName, HeaderValue)> for OrderedHeaders {
    fn from_iter<I: IntoIterator<Item = (HeaderName, HeaderValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The byte stream of an upgraded connection.
///
/// The stream stays bound to the connection it was upgraded from. Once that
/// connection is closed, or the client is closed, reads and writes fail with
/// [`io::ErrorKind::ConnectionAborted`].
pub struct DuplexStream {
    inner: TokioIo<Upgraded>,
    closed: Cancellation,
    aborted: bool,
}

impl DuplexStream {
    fn new(upgraded: Upgraded, scope: &Scope) -> Self {
        Self {
            inner: TokioIo::new(upgraded),
            closed: scope.cancelled(),
            aborted: false,
        }
    }

    fn poll_aborted(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.aborted && Pin::new(&mut self.closed).poll(cx).is_ready() {
            tracing::trace!("upgraded connection closed by its scope");
            self.aborted = true;
        }
        self.aborted
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

impl fmt::Debug for DuplexStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexStream").finish_non_exhaustive()
    }
}

impl AsyncRead for DuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.aborted {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
