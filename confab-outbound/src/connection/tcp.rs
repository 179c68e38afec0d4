use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use anyhow::{anyhow, Error as AnyError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use confab_core::xmpp::stream::Connection;

use crate::error::Error;
use crate::resolver::Address;

/// Bounds each TCP connect attempt so one unreachable SRV target cannot eat
/// the OS default timeout before the next candidate is tried.
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

enum Socket {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

/// Client transport: plain TCP until STARTTLS succeeds, TLS afterwards. The
/// TLS client config and the server name to verify against are fixed at
/// connect time.
pub struct TcpConnection {
    socket: Socket,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    host: String,
}

impl TcpConnection {
    /// Walks the resolved address list in order and returns the first
    /// accepted TCP connection. Per-address failures are collected; the call
    /// only fails once every candidate has been tried.
    pub async fn connect(addresses: &[Address], host: &str) -> Result<Self, Error> {
        let connector = tls_connector()?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|err| Error::Stream(anyhow!("invalid server name {host}: {err}")))?;

        let mut failures = Vec::new();
        for address in addresses {
            for ip in &address.ips {
                match tokio::time::timeout(
                    TCP_CONNECT_TIMEOUT,
                    TcpStream::connect((*ip, address.port)),
                )
                .await
                {
                    Ok(Ok(socket)) => {
                        debug!(%ip, port = address.port, "connected");
                        return Ok(TcpConnection {
                            socket: Socket::Plain(socket),
                            connector,
                            server_name,
                            host: host.to_string(),
                        });
                    }
                    Ok(Err(err)) => {
                        debug!(%ip, port = address.port, error = %err, "connect failed");
                        failures.push(err);
                    }
                    Err(_) => failures.push(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {}:{} timed out", ip, address.port),
                    )),
                }
            }
        }

        Err(Error::Connect(failures))
    }
}

fn tls_connector() -> Result<TlsConnector, Error> {
    let native_certs = rustls_native_certs::load_native_certs();
    if native_certs.certs.is_empty() {
        return Err(Error::Stream(anyhow!(
            "no system root certificates found; cannot verify any server"
        )));
    }

    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(native_certs.certs);
    debug!(added, ignored, "loaded native root certificates");

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Maps a rustls handshake failure onto the error taxonomy: name mismatch
/// and other certificate problems are distinguished from transport-level
/// handshake errors.
fn classify_tls_error(host: &str, err: std::io::Error) -> Error {
    enum Class {
        HostnameMismatch,
        CertUnverified,
        Handshake,
    }

    let class = match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<tokio_rustls::rustls::Error>())
    {
        Some(tokio_rustls::rustls::Error::InvalidCertificate(cert_error)) => {
            if format!("{cert_error:?}").contains("NotValidForName") {
                Class::HostnameMismatch
            } else {
                Class::CertUnverified
            }
        }
        _ => Class::Handshake,
    };

    match class {
        Class::HostnameMismatch => Error::HostnameMismatch {
            host: host.to_string(),
            source: err,
        },
        Class::CertUnverified => Error::CertUnverified,
        Class::Handshake => Error::TlsHandshake(err),
    }
}

impl Connection for TcpConnection {
    type Upgrade = TcpConnectionUpgrade;

    fn upgrade(self) -> Result<Self::Upgrade, AnyError> {
        match self.socket {
            Socket::Plain(socket) => {
                let connect = self.connector.connect(self.server_name.clone(), socket);
                Ok(TcpConnectionUpgrade {
                    connect,
                    connector: self.connector,
                    server_name: self.server_name,
                    host: self.host,
                })
            }
            Socket::Tls(_) => Err(anyhow!("connection is already secure")),
        }
    }

    fn is_secure(&self) -> bool {
        matches!(self.socket, Socket::Tls(_))
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_read(cx, buf),
            Socket::Tls(socket) => Pin::new(socket).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_write(cx, buf),
            Socket::Tls(socket) => Pin::new(socket).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_flush(cx),
            Socket::Tls(socket) => Pin::new(socket).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.socket {
            Socket::Plain(socket) => Pin::new(socket).poll_shutdown(cx),
            Socket::Tls(socket) => Pin::new(socket).poll_shutdown(cx),
        }
    }
}

pub struct TcpConnectionUpgrade {
    connect: tokio_rustls::Connect<TcpStream>,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    host: String,
}

impl Future for TcpConnectionUpgrade {
    type Output = Result<TcpConnection, AnyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let stream = match ready!(Pin::new(&mut self.connect).poll(cx)) {
            Ok(stream) => stream,
            Err(err) => {
                let classified = classify_tls_error(&self.host, err);
                return Poll::Ready(Err(AnyError::new(classified)));
            }
        };

        // rustls has verified the chain at this point; an empty one would
        // mean an unauthenticated session all the same.
        let (_, session) = stream.get_ref();
        if session
            .peer_certificates()
            .map_or(true, |certs| certs.is_empty())
        {
            return Poll::Ready(Err(AnyError::new(Error::CertUnverified)));
        }

        let connection = TcpConnection {
            socket: Socket::Tls(stream),
            connector: self.connector.clone(),
            server_name: self.server_name.clone(),
            host: self.host.clone(),
        };
        Poll::Ready(Ok(connection))
    }
}
