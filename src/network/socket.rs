// src/network/socket.rs
//! Plain and TLS-wrapped TCP sockets behind one stream type.

use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// Client side TLS settings for a pool connection
///
/// With no certificate files the platform's native root store is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsDesc {
    /// PEM files holding the trusted root certificates
    #[serde(default)]
    pub cert_files: Vec<PathBuf>,
}

/// Transport flavour of an io service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoMode {
    /// Plain TCP
    Tcp,
    /// TCP wrapped in TLS
    TcpTls(TlsDesc),
}

/// A connected stream, either plain or encrypted
pub(crate) enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Socket {
    /// Connects to `host:port`, performing the TLS handshake if a connector is given
    pub(crate) async fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsConnector>,
    ) -> Result<Socket, MinerError> {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        match tls {
            None => Ok(Socket::Plain(tcp)),
            Some(connector) => {
                let name = ServerName::try_from(host.to_string())
                    .map_err(|e| MinerError::TlsError(format!("bad server name {}: {}", host, e)))?;
                let stream = connector.connect(name, tcp).await?;
                Ok(Socket::Tls(Box::new(stream)))
            }
        }
    }
}

/// Builds a TLS connector from the descriptor's root certificates
///
/// # Errors
/// Returns `MinerError::TlsError` if no usable root certificate was found
/// and `MinerError::IoError` if a certificate file cannot be read.
pub(crate) fn tls_connector(desc: &TlsDesc) -> Result<TlsConnector, MinerError> {
    let mut roots = RootCertStore::empty();

    if desc.cert_files.is_empty() {
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            log::warn!("Could not load a native root certificate: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        log::debug!("Loaded {} native root certificates ({} ignored)", added, ignored);
    } else {
        for path in &desc.cert_files {
            let mut reader = BufReader::new(File::open(path).map_err(|e| {
                MinerError::TlsError(format!("cannot open {}: {}", path.display(), e))
            })?);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?)?;
            }
        }
    }

    if roots.is_empty() {
        return Err(MinerError::TlsError("no trusted root certificates".into()));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_flush(cx),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
