//! TCP accept loop feeding the session layer.

use crate::manager::SessionManager;
use crate::router::Router;
use crate::session;
use crate::stream::IoStream;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// A bound listener, plain or TLS depending on whether an acceptor is
/// supplied.
pub struct Listener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind on `port` (0 lets the OS choose).
    pub async fn bind(port: u16, tls: Option<TlsAcceptor>) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Listener { listener, tls })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the shutdown signal fires or the socket errors.  Each
    /// accepted peer gets its own task; for secure listeners the TLS
    /// handshake runs on that task so a slow handshake cannot stall the
    /// accept loop.
    pub async fn run(
        self,
        manager: Arc<SessionManager>,
        router: Arc<Router>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (tcp, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            break;
                        }
                    };
                    if let Err(e) = tcp.set_nodelay(true) {
                        warn!(%peer, error = %e, "set_nodelay failed");
                    }

                    let tls = self.tls.clone();
                    let manager = Arc::clone(&manager);
                    let router = Arc::clone(&router);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let stream = match tls {
                            None => IoStream::from(tcp),
                            Some(acceptor) => match acceptor.accept(tcp).await {
                                Ok(stream) => IoStream::from(stream),
                                Err(e) => {
                                    warn!(%peer, error = %e, "TLS handshake failed");
                                    return;
                                }
                            },
                        };
                        session::serve(stream, peer, manager, router, shutdown).await;
                    });
                }
            }
        }
        info!("listener stopped");
    }
}
