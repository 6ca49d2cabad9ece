//! Live subscription handling.

use crate::error::SyncResult;
use crate::merger::ModelMerger;
use crate::outbox::MutationOutbox;
use driftstore_storage::StorageAdapter;
use driftstore_sync_protocol::{SubscriptionEvent, SubscriptionMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Connection-level signals extracted from the subscription stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// All subscription channels are established.
    Connected,
    /// The connection closed cleanly.
    Disconnected,
    /// The connection dropped; remote changes may have been missed and
    /// a resync is required.
    Disrupted,
}

/// Applies subscription data to local storage.
///
/// Until the initial sync pass completes, incoming records are
/// buffered: applying them early could be overwritten by older paged
/// results. After [`SubscriptionProcessor::start_draining`] the buffer
/// is flushed and further records apply immediately. A disruption
/// returns to buffering until the resync completes.
pub struct SubscriptionProcessor {
    buffer: Mutex<Vec<SubscriptionEvent>>,
    passthrough: AtomicBool,
}

impl SubscriptionProcessor {
    /// Creates a processor in buffering mode.
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            passthrough: AtomicBool::new(false),
        }
    }

    /// Handles one subscription message.
    ///
    /// Data merges or buffers depending on mode; connection messages
    /// are translated into signals for the orchestrator.
    pub fn handle(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        merger: &ModelMerger,
        message: SubscriptionMessage,
    ) -> SyncResult<Option<ConnectionSignal>> {
        match message {
            SubscriptionMessage::Connected => Ok(Some(ConnectionSignal::Connected)),
            SubscriptionMessage::Disconnected => Ok(Some(ConnectionSignal::Disconnected)),
            SubscriptionMessage::ConnectionDisrupted => {
                self.pause();
                Ok(Some(ConnectionSignal::Disrupted))
            }
            SubscriptionMessage::Data(event) => {
                if self.passthrough.load(Ordering::SeqCst) {
                    storage
                        .run_exclusive(|s| merger.merge(s, outbox, &event.model, &event.record))?;
                } else {
                    self.buffer.lock().push(event);
                }
                Ok(None)
            }
        }
    }

    /// Flushes the buffer and switches to immediate application.
    ///
    /// Returns the number of buffered records applied.
    pub fn start_draining(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        merger: &ModelMerger,
    ) -> SyncResult<usize> {
        self.passthrough.store(true, Ordering::SeqCst);
        let buffered: Vec<SubscriptionEvent> = std::mem::take(&mut *self.buffer.lock());
        let count = buffered.len();
        for event in buffered {
            storage.run_exclusive(|s| merger.merge(s, outbox, &event.model, &event.record))?;
        }
        if count > 0 {
            debug!(count, "flushed buffered subscription records");
        }
        Ok(count)
    }

    /// Returns to buffering mode.
    pub fn pause(&self) {
        self.passthrough.store(false, Ordering::SeqCst);
    }

    /// Returns true if data is currently buffered rather than applied.
    pub fn is_buffering(&self) -> bool {
        !self.passthrough.load(Ordering::SeqCst)
    }
}

impl Default for SubscriptionProcessor {
    fn default() -> Self {
        Self::new()
    }
}
