//! Thread-safe registry of live sessions.
//!
//! The manager owns the uid space and the display names.  Fan-out
//! operations snapshot the target handles under the lock and perform the
//! sends after releasing it, so no I/O happens while the registry is
//! locked.  Sends are non-blocking queue pushes, which keeps the manager
//! callable from synchronous handler code.

use parley_protocol::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

/// A cheap, cloneable reference to one session's outbound queue.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<Message>,
    close: Arc<Notify>,
}

impl SessionHandle {
    pub(crate) fn new(outbound: mpsc::Sender<Message>, close: Arc<Notify>) -> Self {
        SessionHandle { outbound, close }
    }

    /// Queue a frame for the session's writer.  Returns false when the
    /// session is gone, or when its queue overflowed — a peer that stops
    /// reading is disconnected rather than buffered without bound.
    pub fn send(&self, msg: Message) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("outbound queue full; closing slow session");
                self.close.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the session task to shut down.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

struct SessionInfo {
    handle: SessionHandle,
    started: SystemTime,
    name: String,
}

pub struct SessionManager {
    next_uid: AtomicU32,
    sessions: Mutex<HashMap<u32, SessionInfo>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            next_uid: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session and return its freshly allocated uid.  Uids are
    /// strictly increasing for the lifetime of the manager.
    pub fn add(&self, handle: SessionHandle) -> u32 {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo {
            handle,
            started: SystemTime::now(),
            name: "guest".to_owned(),
        };
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(uid, info);
        uid
    }

    /// Drop a session from the registry.  Idempotent.
    pub fn remove(&self, uid: u32) {
        let removed = self.sessions.lock().expect("sessions lock").remove(&uid);
        if let Some(info) = removed {
            let connected = info.started.elapsed().unwrap_or_default();
            info!(
                uid,
                name = %info.name,
                connected_secs = connected.as_secs(),
                "session removed"
            );
        }
    }

    pub fn get(&self, uid: u32) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(&uid)
            .map(|info| info.handle.clone())
    }

    pub fn set_name(&self, uid: u32, name: &str) {
        if let Some(info) = self.sessions.lock().expect("sessions lock").get_mut(&uid) {
            info.name = name.to_owned();
        }
    }

    /// The display name for `uid`, or `"Unknown"` for absent sessions.
    pub fn get_name(&self, uid: u32) -> String {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(&uid)
            .map_or_else(|| "Unknown".to_owned(), |info| info.name.clone())
    }

    /// Queue `msg` for every current session.
    pub fn broadcast(&self, msg: &Message) {
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().expect("sessions lock");
            sessions.values().map(|info| info.handle.clone()).collect()
        };
        for handle in targets {
            let _ = handle.send(msg.clone());
        }
    }

    /// Queue `msg` for the given uids; unknown uids are skipped.
    pub fn send_to(&self, uids: &[u32], msg: &Message) {
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().expect("sessions lock");
            uids.iter()
                .filter_map(|uid| sessions.get(uid).map(|info| info.handle.clone()))
                .collect()
        };
        for handle in targets {
            let _ = handle.send(msg.clone());
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }

    pub fn list_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .sessions
            .lock()
            .expect("sessions lock")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        SessionManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_handle(capacity: usize) -> (SessionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SessionHandle::new(tx, Arc::new(Notify::new())), rx)
    }

    #[test]
    fn uids_start_at_one_and_strictly_increase() {
        let manager = SessionManager::new();
        let (h1, _rx1) = test_handle(8);
        let (h2, _rx2) = test_handle(8);
        let (h3, _rx3) = test_handle(8);

        let a = manager.add(h1);
        let b = manager.add(h2);
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        // Uids are not reused after removal.
        manager.remove(a);
        let c = manager.add(h3);
        assert_eq!(c, 3);
    }

    #[test]
    fn names_default_to_guest_and_unknown_when_absent() {
        let manager = SessionManager::new();
        let (handle, _rx) = test_handle(8);
        let uid = manager.add(handle);

        assert_eq!(manager.get_name(uid), "guest");
        manager.set_name(uid, "alice");
        assert_eq!(manager.get_name(uid), "alice");
        assert_eq!(manager.get_name(999), "Unknown");
    }

    #[test]
    fn remove_is_idempotent() {
        let manager = SessionManager::new();
        let (handle, _rx) = test_handle(8);
        let uid = manager.add(handle);

        manager.remove(uid);
        manager.remove(uid);
        assert_eq!(manager.count(), 0);
        assert!(manager.get(uid).is_none());
    }

    #[test]
    fn broadcast_reaches_every_session() {
        let manager = SessionManager::new();
        let (h1, mut rx1) = test_handle(8);
        let (h2, mut rx2) = test_handle(8);
        manager.add(h1);
        manager.add(h2);

        manager.broadcast(&Message::push(json!({"event": "x"})));
        assert_eq!(rx1.try_recv().unwrap().push_body()["event"], "x");
        assert_eq!(rx2.try_recv().unwrap().push_body()["event"], "x");
    }

    #[test]
    fn send_to_hits_only_the_requested_uids() {
        let manager = SessionManager::new();
        let (h1, mut rx1) = test_handle(8);
        let (h2, mut rx2) = test_handle(8);
        let a = manager.add(h1);
        let _b = manager.add(h2);

        manager.send_to(&[a, 999], &Message::push(json!({"event": "pm"})));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn removed_session_is_not_in_broadcast_snapshot() {
        let manager = SessionManager::new();
        let (h1, mut rx1) = test_handle(8);
        let (h2, mut rx2) = test_handle(8);
        let a = manager.add(h1);
        manager.add(h2);

        manager.remove(a);
        manager.broadcast(&Message::push(json!({"event": "x"})));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn overflowing_handle_reports_failure() {
        let (handle, _rx) = test_handle(1);
        assert!(handle.send(Message::push(json!({"n": 1}))));
        // Queue full: the send fails and requests a close.
        assert!(!handle.send(Message::push(json!({"n": 2}))));
    }

    #[test]
    fn list_ids_is_sorted_and_tracks_membership() {
        let manager = SessionManager::new();
        let (h1, _rx1) = test_handle(8);
        let (h2, _rx2) = test_handle(8);
        let a = manager.add(h1);
        let b = manager.add(h2);

        assert_eq!(manager.list_ids(), vec![a, b]);
        manager.remove(a);
        assert_eq!(manager.list_ids(), vec![b]);
        assert_eq!(manager.count(), 1);
    }
}
