#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt as _;
use hyperguise::bridge::{TokioExecutor, TokioIo};
use hyperguise::Body;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn tls_config(alpn: &[&[u8]]) -> rustls::ServerConfig {
    let (_, cert) = pem_rfc7468::decode_vec(include_bytes!("../certs/cert.pem")).unwrap();
    let (label, key) = pem_rfc7468::decode_vec(include_bytes!("../certs/key.pem")).unwrap();

    let cert = rustls::pki_types::CertificateDer::from(cert);
    let key = match label {
        "PRIVATE KEY" => rustls::pki_types::PrivateKeyDer::Pkcs8(key.into()),
        "EC PRIVATE KEY" => rustls::pki_types::PrivateKeyDer::Sec1(key.into()),
        _ => panic!("unknown key type"),
    };

    let mut cfg = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();

    cfg.alpn_protocols = alpn.iter().map(|protocol| protocol.to_vec()).collect();
    cfg
}

/// A root store which does not contain the issuer of the test certificate.
pub fn untrusted_roots() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    let (_, cert) = pem_rfc7468::decode_vec(include_bytes!("../certs/untrusted-ca.pem")).unwrap();
    roots
        .add(rustls::pki_types::CertificateDer::from(cert))
        .unwrap();
    roots
}

/// Responds with `ok`, echoing the request version, target and proxy
/// credentials in headers.
///
/// `/hang` sends part of a body and then never finishes it.
pub async fn echo(
    req: http::Request<hyper::body::Incoming>,
) -> Result<http::Response<Body>, BoxError> {
    let version = format!("{:?}", req.version());
    let target = req.uri().to_string();

    let body = if req.uri().path() == "/hang" {
        let frames = futures_util::stream::iter([Ok::<_, Infallible>(http_body::Frame::data(
            Bytes::from("partial"),
        ))])
        .chain(futures_util::stream::pending());
        Body::new(http_body_util::StreamBody::new(frames))
    } else {
        Body::from("ok")
    };

    let mut response = http::Response::builder()
        .header("O-Version", version)
        .header("O-Target", target);
    if let Some(auth) = req.headers().get(http::header::PROXY_AUTHORIZATION) {
        response = response.header("O-Proxy-Authorization", auth.clone());
    }
    Ok(response.body(body)?)
}

/// A test server which counts the connections it accepts.
#[derive(Debug, Clone)]
pub struct Server {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl Server {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn uri(&self, scheme: &str, path: &str) -> http::Uri {
        format!("{scheme}://{}{path}", self.addr).parse().unwrap()
    }
}

async fn serve<F, Fut>(handle: F) -> Result<Server, BoxError>
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let accepted = accepted.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let conn = handle(stream);
                tokio::spawn(async move {
                    if let Err(error) = conn.await {
                        tracing::debug!(%error, "test connection failed");
                    }
                });
            }
        }
    });

    Ok(Server { addr, accepted })
}

/// Serve [`echo`] over TLS, choosing HTTP/2 or HTTP/1.1 by ALPN.
pub async fn serve_tls(alpn: &[&[u8]]) -> Result<Server, BoxError> {
    let acceptor = TlsAcceptor::from(Arc::new(tls_config(alpn)));

    serve(move |stream| {
        let acceptor = acceptor.clone();
        async move {
            let stream = acceptor.accept(stream).await?;
            let h2 = stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
            let service = hyper::service::service_fn(echo);

            if h2 {
                hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await?;
            } else {
                hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await?;
            }
            Ok(())
        }
    })
    .await
}

/// Serve [`echo`] over plain HTTP/2, without any negotiation.
pub async fn serve_h2c() -> Result<Server, BoxError> {
    serve(|stream| async move {
        hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), hyper::service::service_fn(echo))
            .await?;
        Ok(())
    })
    .await
}

/// Serve [`echo`] over plain HTTP/1.1.
pub async fn serve_h1() -> Result<Server, BoxError> {
    serve(|stream| async move {
        hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), hyper::service::service_fn(echo))
            .await?;
        Ok(())
    })
    .await
}
