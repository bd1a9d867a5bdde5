//! Transport which owns its connections and shapes the TLS handshake after a
//! browser profile.

use std::future::Future;
use std::sync::Arc;

use http::{HeaderValue, Method, StatusCode, Version};
use hyper::client::conn::{http1, http2};
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, Instrument as _};

use crate::bridge::{TokioExecutor, TokioIo};
use crate::client::config::ResolvedConfig;
use crate::client::conn::request::Target;
use crate::client::conn::{
    tcp, tunnel, BoxIo, Connection, FullConnection, PoolEntry, Sender, TcpConfig,
};
use crate::client::pool::{Pool, PoolConfig, PoolableConnection as _, UriKey};
use crate::client::proxy::{Proxy, ProxyScheme};
use crate::client::{Error, Response};
use crate::fingerprint::Http2Settings;
use crate::scope::Scope;
use crate::Body;

/// A connected byte stream, before the HTTP handshake.
struct Established {
    io: BoxIo,
    target: Target,
    h2: bool,
}

/// Transport which dials, tunnels and pools its own connections.
pub(crate) struct FingerprintingTransport {
    scope: Scope,
    pool: Pool<PoolEntry>,
    origin_tls: TlsConnector,
    proxy_tls: Option<TlsConnector>,
    http2: Http2Settings,
    profile: &'static str,
    proxy: Option<Proxy>,
    tcp: TcpConfig,
    user_agent: Option<HeaderValue>,
}

impl std::fmt::Debug for FingerprintingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintingTransport")
            .field("profile", &self.profile)
            .field("proxy", &self.proxy)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl FingerprintingTransport {
    pub(crate) fn new(
        scope: Scope,
        config: &ResolvedConfig,
        proxy: Option<Proxy>,
        tcp: TcpConfig,
        pool: PoolConfig,
        user_agent: Option<HeaderValue>,
    ) -> Result<Self, Error> {
        let fingerprint = config.fingerprint();
        let origin_tls = fingerprint.client_config().map_err(Error::Tls)?;

        let proxy_tls = match &proxy {
            Some(proxy) if proxy.scheme() == ProxyScheme::Https => {
                let tls = config.tls().client_config().map_err(Error::Tls)?;
                Some(TlsConnector::from(Arc::new(tls)))
            }
            _ => None,
        };

        Ok(Self {
            scope,
            pool: Pool::new(pool),
            origin_tls: TlsConnector::from(Arc::new(origin_tls)),
            proxy_tls,
            http2: fingerprint.profile.http2().clone(),
            profile: fingerprint.profile.name(),
            proxy,
            tcp,
            user_agent,
        })
    }

    pub(crate) async fn dispatch(&self, request: http::Request<Body>) -> Result<Response, Error> {
        let key = UriKey::try_from(request.uri()).map_err(|error| Error::InvalidUri(error.into_uri()))?;
        if self.scope.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let wants_h2 = request.version() == Version::HTTP_2;
        let is_connect = request.method() == Method::CONNECT;

        let mut entry = self.checkout(&key, wants_h2).await?;
        let scope = entry.scope.child();
        let mut response = entry
            .send(request, self.user_agent.as_ref(), &scope)
            .await?;

        let upgraded = response.status() == StatusCode::SWITCHING_PROTOCOLS
            || (is_connect && response.status().is_success());
        let upgrade = upgraded.then(|| hyper::upgrade::on(&mut response));

        Ok(Response::new(
            response,
            Connection::Full(FullConnection::new(
                entry,
                scope,
                key,
                self.pool.downgrade(),
                upgrade,
                self.user_agent.clone(),
            )),
        ))
    }

    pub(crate) fn close_idle_connections(&self) {
        self.pool.clear();
    }

    pub(crate) fn shutdown(&self) {
        self.pool.clear();
        trace!(profile = self.profile, "fingerprinting transport shut down");
    }

    async fn checkout(&self, key: &UriKey, wants_h2: bool) -> Result<PoolEntry, Error> {
        while let Some(mut entry) = self.pool.checkout(key) {
            if wants_h2 && entry.sender.version() != Version::HTTP_2 {
                self.pool.checkin(key.clone(), entry);
                break;
            }

            match self.scope.run(entry.sender.ready()).await? {
                Ok(()) => {
                    trace!(%key, "reusing pooled connection");
                    return Ok(entry);
                }
                Err(error) => trace!(%key, %error, "pooled connection is not ready"),
            }
        }

        self.scope.run(self.connect(key, wants_h2)).await?
    }

    #[tracing::instrument(skip_all, fields(%key, profile = self.profile), level = "debug")]
    async fn connect(&self, key: &UriKey, wants_h2: bool) -> Result<PoolEntry, Error> {
        let Established { io, target, h2 } = self.establish(key).await?;
        let prior_knowledge = wants_h2 && !key.is_https() && target == Target::Origin;

        let scope = self.scope.child();
        let sender = if h2 || prior_knowledge {
            let mut builder = http2::Builder::new(TokioExecutor::new());
            self.http2.apply(&mut builder);
            let (sender, conn) = builder
                .handshake(TokioIo::new(io))
                .await
                .map_err(|error| Error::Connection(error.into()))?;
            spawn_driver(scope.clone(), key, conn);
            Sender::Http2(sender)
        } else {
            let (sender, conn) = http1::Builder::new()
                .handshake(TokioIo::new(io))
                .await
                .map_err(|error| Error::Connection(error.into()))?;
            spawn_driver(scope.clone(), key, conn.with_upgrades());
            Sender::Http1(sender)
        };

        debug!(version = ?sender.version(), "connection established");

        let entry = PoolEntry {
            sender,
            scope,
            target,
        };
        if let Some(shared) = entry.reuse() {
            self.pool.checkin(key.clone(), shared);
        }

        Ok(entry)
    }

    async fn establish(&self, key: &UriKey) -> Result<Established, Error> {
        let Some(proxy) = &self.proxy else {
            let stream = tcp::connect(key.host(), key.port(), &self.tcp)
                .await
                .map_err(|error| Error::Connection(error.into()))?;
            return self.origin_tls(key, Box::new(stream), Target::Origin).await;
        };

        let stream = tcp::connect(proxy.host(), proxy.port(), &self.tcp)
            .await
            .map_err(|error| Error::Connection(error.into()))?;
        let mut io: BoxIo = Box::new(stream);

        match proxy.scheme() {
            ProxyScheme::Http | ProxyScheme::Https => {
                if let Some(connector) = &self.proxy_tls {
                    io = tls_handshake(connector, proxy.host(), io).await?;
                }

                let authorization = proxy.credentials().and_then(|creds| creds.basic_auth());
                if !key.is_https() {
                    trace!(proxy = proxy.host(), "forwarding through http proxy");
                    return Ok(Established {
                        io,
                        target: Target::Forward(authorization),
                        h2: false,
                    });
                }

                tunnel::http_connect(&mut io, key.host(), key.port(), authorization)
                    .await
                    .map_err(|error| Error::Connection(error.into()))?;
            }
            ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
                tunnel::socks5(
                    &mut io,
                    key.host(),
                    key.port(),
                    proxy.credentials(),
                    proxy.scheme() == ProxyScheme::Socks5h,
                )
                .await
                .map_err(|error| Error::Connection(error.into()))?;
            }
        }

        self.origin_tls(key, io, Target::Origin).await
    }

    async fn origin_tls(&self, key: &UriKey, io: BoxIo, target: Target) -> Result<Established, Error> {
        if !key.is_https() {
            return Ok(Established {
                io,
                target,
                h2: false,
            });
        }

        let server_name = ServerName::try_from(key.host().to_owned())
            .map_err(|error| Error::Connection(error.into()))?;
        let stream = self
            .origin_tls
            .connect(server_name, io)
            .instrument(tracing::trace_span!("tls", host = key.host()))
            .await
            .map_err(|error| Error::Connection(error.into()))?;

        let h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
        trace!(h2, "tls handshake complete");

        Ok(Established {
            io: Box::new(stream),
            target,
            h2,
        })
    }
}

async fn tls_handshake(connector: &TlsConnector, host: &str, io: BoxIo) -> Result<BoxIo, Error> {
    let server_name =
        ServerName::try_from(host.to_owned()).map_err(|error| Error::Connection(error.into()))?;
    let stream = connector
        .connect(server_name, io)
        .instrument(tracing::trace_span!("tls", host))
        .await
        .map_err(|error| Error::Connection(error.into()))?;
    Ok(Box::new(stream))
}

/// Drive a connection in the background until it closes or its scope is
/// cancelled.
fn spawn_driver<F>(scope: Scope, key: &UriKey, conn: F)
where
    F: Future<Output = Result<(), hyper::Error>> + Send + 'static,
{
    let key = key.clone();
    tokio::spawn(async move {
        match scope.run(conn).await {
            Ok(Ok(())) => trace!(%key, "connection closed"),
            Ok(Err(error)) => debug!(%key, %error, "connection error"),
            Err(_) => trace!(%key, "connection cancelled"),
        }
    });
}
