//! TCP connections to origin servers and proxies.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument as _};

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// The timeout for connecting to a single remote address.
    pub connect_timeout: Option<Duration>,

    /// Idle time before TCP keep-alive probes are sent.
    pub keep_alive_timeout: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            keep_alive_timeout: Some(Duration::from_secs(90)),
            nodelay: true,
            reuse_address: true,
        }
    }
}

/// Error establishing a TCP connection.
#[derive(Debug, Error)]
pub struct ConnectError {
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl ConnectError {
    fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    fn msg<S: Into<String>>(message: S) -> impl FnOnce(io::Error) -> Self {
        move |error| Self {
            message: message.into(),
            source: Some(error),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, "{}: {}", self.message, source)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Resolve `host` and connect to the first address which accepts.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    config: &TcpConfig,
) -> Result<TcpStream, ConnectError> {
    let span = tracing::trace_span!("tcp", %host, %port);
    async move {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(ConnectError::msg("dns resolution"))?
            .collect();

        let mut last = None;
        for addr in addrs {
            match connect_addr(addr, config).await {
                Ok(stream) => {
                    trace!(peer.addr = %addr, "tcp connected");
                    return Ok(stream);
                }
                Err(error) => {
                    trace!(peer.addr = %addr, %error, "tcp connect failed");
                    last = Some(error);
                }
            }
        }

        Err(last.unwrap_or_else(|| ConnectError::new("no addresses resolved")))
    }
    .instrument(span)
    .await
}

async fn connect_addr(addr: SocketAddr, config: &TcpConfig) -> Result<TcpStream, ConnectError> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ConnectError::msg("tcp open error"))?;

    // Tokio requires O_NONBLOCK on sockets it adopts.
    socket
        .set_nonblocking(true)
        .map_err(ConnectError::msg("tcp set_nonblocking error"))?;

    if let Some(dur) = config.keep_alive_timeout {
        let conf = TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket.set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    let socket = TcpSocket::from_std_stream(std::net::TcpStream::from(socket));

    if config.reuse_address {
        if let Err(e) = socket.set_reuseaddr(true) {
            warn!("tcp set_reuse_address error: {}", e);
        }
    }

    let connect = socket.connect(addr);
    let stream = match config.connect_timeout {
        Some(dur) => match tokio::time::timeout(dur, connect).await {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, elapsed)),
        },
        None => connect.await,
    }
    .map_err(ConnectError::msg("tcp connect error"))?;

    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_listener() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { listener.accept().await.map(|(_, addr)| addr) });
        let stream = connect("127.0.0.1", port, &TcpConfig::default())
            .await
            .unwrap();

        let peer = accept.await.unwrap().unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn refused_connection_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let error = connect("127.0.0.1", port, &TcpConfig::default())
            .await
            .unwrap_err();
        assert!(error.to_string().starts_with("tcp connect error"));
    }

    #[test]
    fn error_display() {
        assert_eq!(ConnectError::new("no route").to_string(), "no route");
    }
}
