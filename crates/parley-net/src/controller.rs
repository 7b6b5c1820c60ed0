//! Listener lifecycle supervision.
//!
//! The controller owns one instance per bound port: a shutdown channel
//! and the accept task.  Sessions spawned by a listener observe the same
//! shutdown channel, so stopping a port closes its sessions too.  There
//! is no shared mutable state between instances beyond the router and
//! the session registry they serve.

use crate::listener::Listener;
use crate::manager::SessionManager;
use crate::router::Router;
use crate::tls::{self, TlsConfigError};
use crate::transport::TransportMode;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub mode: TransportMode,
    /// PEM certificate chain, read at listener start in secure mode.
    pub cert_file: PathBuf,
    /// PEM private key, read at listener start in secure mode.
    pub key_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 12345,
            mode: TransportMode::Plain,
            cert_file: PathBuf::from("server.crt"),
            key_file: PathBuf::from("server.key"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("a listener is already running on port {0}")]
    AlreadyRunning(u16),
    #[error("TLS: {0}")]
    Tls(#[from] TlsConfigError),
    #[error("bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
}

struct Instance {
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

pub struct Controller {
    router: Arc<Router>,
    sessions: Arc<SessionManager>,
    instances: Mutex<HashMap<u16, Instance>>,
}

impl Controller {
    pub fn new(router: Arc<Router>, sessions: Arc<SessionManager>) -> Self {
        Controller {
            router,
            sessions,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a listener for `cfg` and start accepting.  Returns the bound
    /// port, which differs from `cfg.port` only when that was 0.
    pub async fn start(&self, cfg: &ServerConfig) -> Result<u16, StartError> {
        if cfg.port != 0 && self.is_running(cfg.port) {
            return Err(StartError::AlreadyRunning(cfg.port));
        }

        let tls = match cfg.mode {
            TransportMode::Plain => None,
            TransportMode::Secure => Some(tls::acceptor(&cfg.cert_file, &cfg.key_file)?),
        };

        let listener = Listener::bind(cfg.port, tls)
            .await
            .map_err(|source| StartError::Bind {
                port: cfg.port,
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| StartError::Bind {
                port: cfg.port,
                source,
            })?
            .port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(listener.run(
            Arc::clone(&self.sessions),
            Arc::clone(&self.router),
            shutdown_rx,
        ));

        self.instances.lock().expect("instances lock").insert(
            port,
            Instance {
                shutdown: shutdown_tx,
                accept_task,
            },
        );
        info!(port, secure = cfg.mode == TransportMode::Secure, "listener started");
        Ok(port)
    }

    /// Stop the listener on `port` and wait for its accept task.  All
    /// sessions it spawned observe the shutdown and close.  Returns false
    /// when nothing is bound there.
    pub async fn stop(&self, port: u16) -> bool {
        let instance = self.instances.lock().expect("instances lock").remove(&port);
        let Some(instance) = instance else {
            return false;
        };

        let _ = instance.shutdown.send(true);
        if let Err(e) = instance.accept_task.await {
            warn!(port, error = %e, "accept task join failed");
        }
        info!(port, "listener torn down");
        true
    }

    pub async fn stop_all(&self) {
        let ports: Vec<u16> = self
            .instances
            .lock()
            .expect("instances lock")
            .keys()
            .copied()
            .collect();
        for port in ports {
            self.stop(port).await;
        }
    }

    pub fn is_running(&self, port: u16) -> bool {
        self.instances
            .lock()
            .expect("instances lock")
            .contains_key(&port)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}
