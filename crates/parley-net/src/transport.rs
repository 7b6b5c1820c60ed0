//! Client-side connection establishment.
//!
//! A [`Connector`] resolves the host, tries each address in order, and
//! for secure mode layers a TLS handshake on top, sending the original
//! host string as SNI.

use crate::stream::IoStream;
use crate::tls;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Whether a connection runs over plain TCP or TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Secure,
}

/// Client connection options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub mode: TransportMode,
    /// Verify the server certificate against the webpki roots.  Off by
    /// default: chat deployments typically run on self-signed
    /// certificates.
    pub verify_peer: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_owned(),
            port: 12345,
            mode: TransportMode::Plain,
            verify_peer: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable address for {0}")]
    NoAddress(String),
    #[error("connect {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS server name: {0}")]
    ServerName(String),
    #[error("TLS handshake with {host}: {source}")]
    Handshake {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Establishes [`IoStream`]s for one transport mode.
pub struct Connector {
    tls: Option<TlsConnector>,
}

impl Connector {
    pub fn new(mode: TransportMode, verify_peer: bool) -> Self {
        let tls = match mode {
            TransportMode::Plain => None,
            TransportMode::Secure => Some(tls::connector(verify_peer)),
        };
        Connector { tls }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Connector::new(cfg.mode, cfg.verify_peer)
    }

    /// Resolve → connect → (handshake) → ready.
    pub async fn connect(&self, host: &str, port: u16) -> Result<IoStream, TransportError> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|source| TransportError::Resolve {
                host: host.to_owned(),
                source,
            })?
            .collect();

        let tcp = connect_any(host, &addrs).await?;

        match &self.tls {
            None => Ok(IoStream::from(tcp)),
            Some(connector) => {
                // SNI carries the host string the caller dialed, not the
                // resolved address.
                let name = ServerName::try_from(host.to_owned())
                    .map_err(|_| TransportError::ServerName(host.to_owned()))?;
                let stream = connector.connect(name, tcp).await.map_err(|source| {
                    TransportError::Handshake {
                        host: host.to_owned(),
                        source,
                    }
                })?;
                Ok(IoStream::from(stream))
            }
        }
    }
}

/// Try each resolved address in order, returning the first that accepts.
async fn connect_any(host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) => {
                debug!(%addr, error = %source, "connect attempt failed");
                last_err = Some(TransportError::Connect {
                    addr: *addr,
                    source,
                });
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TransportError::NoAddress(host.to_owned())))
}
