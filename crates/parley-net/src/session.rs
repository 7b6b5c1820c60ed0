//! Server-side peer session.
//!
//! One session task per accepted connection: it registers with the
//! manager, reads frames in a loop, dispatches each through the router,
//! and queues the responses on a bounded outbound channel drained by a
//! dedicated writer task.  The writer is the only place the stream is
//! written, so frames never interleave.
//!
//! A session ends on peer disconnect, any framing or decode failure, an
//! oversize payload, queue overflow, explicit close, or listener
//! shutdown.  Handler failures do NOT end the session — the router turns
//! them into error responses.

use crate::manager::{SessionHandle, SessionManager};
use crate::router::Router;
use crate::stream::IoStream;
use crate::wire::{self, WireError};
use parley_protocol::{MAX_PAYLOAD, Message};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

/// High-water mark for queued outbound frames per session.
pub const OUTBOUND_HIGH_WATER: usize = 256;

/// How long the writer may keep draining after the read side ends.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Drive one peer connection to completion.
pub(crate) async fn serve(
    stream: IoStream,
    peer: SocketAddr,
    manager: Arc<SessionManager>,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_HIGH_WATER);
    let close = Arc::new(Notify::new());
    let handle = SessionHandle::new(outbound_tx, Arc::clone(&close));

    // Registered before the first read so broadcasts already reach this
    // peer while it is still deciding what to say.
    let uid = manager.add(handle.clone());
    info!(uid, %peer, "session started");

    let (mut reader, writer) = tokio::io::split(stream);
    let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    let result = read_loop(
        &mut reader,
        uid,
        &handle,
        &router,
        &close,
        &mut shutdown,
    )
    .await;
    match &result {
        Ok(()) => info!(uid, %peer, "session closed"),
        Err(e) => warn!(uid, %peer, error = %e, "session failed"),
    }

    // Remove first so the departed peer is not in the broadcast snapshot.
    manager.remove(uid);
    manager.broadcast(&Message::push(json!({"event": "user_left", "uid": uid})));

    // Dropping our handle releases the last long-lived sender; the writer
    // drains whatever is queued and shuts the stream down.
    drop(handle);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer_task)
        .await
        .is_err()
    {
        warn!(uid, "writer did not drain in time; aborting");
        writer_task.abort();
    }
}

async fn read_loop(
    reader: &mut ReadHalf<IoStream>,
    uid: u32,
    handle: &SessionHandle,
    router: &Router,
    close: &Notify,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), WireError> {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            _ = close.notified() => return Ok(()),
            frame = wire::read_message(reader, MAX_PAYLOAD) => {
                let msg = match frame {
                    Ok(msg) => msg,
                    Err(WireError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                };
                debug!(uid, kind = ?msg.kind, id = msg.id(), "frame received");

                let response = router.handle(&msg, uid);
                if !handle.send(response) {
                    // Queue overflowed or the writer is gone.
                    return Ok(());
                }
            }
        }
    }
}

async fn write_loop(mut writer: WriteHalf<IoStream>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = wire::write_message(&mut writer, &msg).await {
            debug!(error = %e, "session write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
