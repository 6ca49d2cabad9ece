//! Connectivity signal distribution.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Reachability of the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// The remote is reachable.
    Online,
    /// The remote is unreachable.
    Offline,
}

/// Tracks connectivity and notifies subscribers on every transition.
///
/// The host application drives this from whatever platform signal it
/// has; the engine subscribes and pauses or resumes accordingly.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    listeners: RwLock<Vec<Sender<ConnectivityStatus>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> ConnectivityStatus {
        if self.online.load(Ordering::SeqCst) {
            ConnectivityStatus::Online
        } else {
            ConnectivityStatus::Offline
        }
    }

    /// Returns true if currently online.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a status change and notifies subscribers.
    ///
    /// Repeating the current status is a no-op.
    pub fn set_status(&self, status: ConnectivityStatus) {
        let online = status == ConnectivityStatus::Online;
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }
        let mut listeners = self.listeners.write();
        listeners.retain(|tx| tx.send(status).is_ok());
    }

    /// Subscribes to future transitions.
    pub fn subscribe(&self) -> Receiver<ConnectivityStatus> {
        let (tx, rx) = mpsc::channel();
        self.listeners.write().push(tx);
        rx
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
