//! Connection-owning chat client.
//!
//! `Client::connect` establishes the transport and spawns two background
//! tasks: a reader that correlates responses to in-flight requests and
//! fans pushes out as events, and a writer that serializes every outbound
//! frame through one channel.  Lifecycle changes arrive on the event
//! receiver returned from `connect`:
//!
//! - `Connected` is emitted exactly once, before any push or response.
//! - `Disconnected` is emitted exactly once; nothing fires after it.
//! - In-flight requests are failed with [`ClientError::Disconnected`] at
//!   close instead of being left pending forever.

use crate::stream::IoStream;
use crate::transport::{ClientConfig, Connector, TransportError};
use crate::wire::{self, WireError};
use parley_protocol::{MAX_PAYLOAD, Message, MessageType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("client is closed")]
    Closed,
    #[error("disconnected before the response arrived")]
    Disconnected,
    /// The server answered with an error envelope.
    #[error("server error {code}: {message}")]
    Rpc { code: i32, message: String },
}

/// Lifecycle and push notifications, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Push(Value),
    Error(String),
    Disconnected,
}

type Completion = oneshot::Sender<Result<Value, ClientError>>;

struct Shared {
    next_id: AtomicU32,
    running: AtomicBool,
    pending: Mutex<HashMap<u32, Completion>>,
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<ClientEvent>,
    shutdown: watch::Sender<bool>,
}

pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Connect and start the background reader and writer.  Returns the
    /// client handle and the event stream.
    pub async fn connect(
        cfg: &ClientConfig,
    ) -> Result<(Client, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let connector = Connector::from_config(cfg);
        let stream = connector.connect(&cfg.host, cfg.port).await?;
        let (reader, writer) = tokio::io::split(stream);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            next_id: AtomicU32::new(1),
            running: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            events: event_tx,
            shutdown: shutdown_tx,
        });

        // Queued before the reader starts, so it precedes every push and
        // response event.
        let _ = shared.events.send(ClientEvent::Connected);

        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            shutdown_rx.clone(),
            Arc::clone(&shared),
        ));
        tokio::spawn(read_loop(reader, shutdown_rx, Arc::clone(&shared)));

        Ok((Client { shared }, event_rx))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Send a request and return the completion without awaiting it.
    ///
    /// The completion resolves exactly once: with the result, the
    /// server's error envelope, or [`ClientError::Disconnected`].
    pub fn request_async(
        &self,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Result<Value, ClientError>>, ClientError> {
        if !self.is_running() {
            return Err(ClientError::Closed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock")
            .insert(id, tx);

        let msg = Message::request(id, method, params);
        if self.shared.outbound.send(msg).is_err() {
            self.shared
                .pending
                .lock()
                .expect("pending lock")
                .remove(&id);
            return Err(ClientError::Disconnected);
        }
        Ok(rx)
    }

    /// Send a request and await its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        match self.request_async(method, params)?.await {
            Ok(outcome) => outcome,
            // The completion was dropped without firing: closed mid-flight.
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    /// Close the connection.  Idempotent; fails all in-flight requests
    /// and emits the final `Disconnected` event.
    pub fn close(&self) {
        shutdown(&self.shared);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// One-shot teardown shared by `close()`, read failures and write
/// failures.
fn shutdown(shared: &Shared) {
    if !shared.running.swap(false, Ordering::SeqCst) {
        return;
    }
    let _ = shared.shutdown.send(true);

    let pending: Vec<Completion> = {
        let mut pending = shared.pending.lock().expect("pending lock");
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in pending {
        let _ = tx.send(Err(ClientError::Disconnected));
    }

    let _ = shared.events.send(ClientEvent::Disconnected);
}

async fn read_loop(
    mut reader: ReadHalf<IoStream>,
    mut shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = wire::read_message(&mut reader, MAX_PAYLOAD) => {
                match frame {
                    Ok(msg) => dispatch(&shared, &msg),
                    Err(WireError::ConnectionClosed) => {
                        shutdown(&shared);
                        break;
                    }
                    Err(e) => {
                        if shared.running.load(Ordering::SeqCst) {
                            let _ = shared.events.send(ClientEvent::Error(e.to_string()));
                        }
                        shutdown(&shared);
                        break;
                    }
                }
            }
        }
    }
}

fn dispatch(shared: &Shared, msg: &Message) {
    match msg.kind {
        MessageType::Response => {
            // Remove-then-fire keeps fulfillment terminal: a duplicate
            // response for the same id finds nothing to complete.
            let completion = shared
                .pending
                .lock()
                .expect("pending lock")
                .remove(&msg.id());
            let Some(tx) = completion else {
                debug!(id = msg.id(), "response with no pending request");
                return;
            };

            let outcome = match msg.error_body() {
                Some(err) => Err(ClientError::Rpc {
                    code: err
                        .get("code")
                        .and_then(Value::as_i64)
                        .and_then(|c| i32::try_from(c).ok())
                        .unwrap_or(0),
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                }),
                None => Ok(msg.result()),
            };
            let _ = tx.send(outcome);
        }
        MessageType::Push => {
            let _ = shared.events.send(ClientEvent::Push(msg.push_body()));
        }
        MessageType::Request => {
            debug!("ignoring request frame on the client side");
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<IoStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = wire::write_message(&mut writer, &msg).await {
                    if shared.running.load(Ordering::SeqCst) {
                        let _ = shared.events.send(ClientEvent::Error(format!("write: {e}")));
                    }
                    shutdown(&shared);
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
