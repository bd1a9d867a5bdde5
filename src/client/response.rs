use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use http_body_util::BodyExt as _;

use super::conn::Connection;
use super::Error;
use crate::Body;

/// An HTTP response, along with the connection it arrived on.
#[derive(Debug)]
pub struct Response {
    inner: http::Response<Body>,
    connection: Connection,
}

impl Response {
    pub(crate) fn new(inner: http::Response<Body>, connection: Connection) -> Self {
        Self { inner, connection }
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// The HTTP version of the response.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// A mutable reference to the response body.
    pub fn body_mut(&mut self) -> &mut Body {
        self.inner.body_mut()
    }

    /// Consume the response, returning the body.
    ///
    /// The connection is released. Use [`Response::into_parts`] to keep it.
    pub fn into_body(self) -> Body {
        self.inner.into_body()
    }

    /// Split the response from its connection.
    pub fn into_parts(self) -> (http::Response<Body>, Connection) {
        (self.inner, self.connection)
    }

    /// The connection this response arrived on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// A mutable reference to the connection, for upgrades and further
    /// requests.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Read the whole body.
    ///
    /// Fails with [`Error::Cancelled`] when the connection, or the client it
    /// belongs to, was closed before the body was complete.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        let Self { inner, connection } = self;
        let body = inner
            .into_body()
            .collect()
            .await
            .map_err(Error::from_body)?
            .to_bytes();
        drop(connection);
        Ok(body)
    }

    /// Read the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.into()).map_err(|error| Error::Protocol(error.into()))
    }
}

impl From<Response> for http::Response<Body> {
    fn from(response: Response) -> Self {
        response.inner
    }
}
