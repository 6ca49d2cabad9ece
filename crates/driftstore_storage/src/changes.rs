//! Change feed for observing storage mutations.
//!
//! Every successful save or delete emits exactly one change event, in
//! commit order. The sync engine subscribes to turn locally-originated
//! writes into outbox entries; sync-originated writes carry their
//! origin so the engine can skip them.

use crate::adapter::WriteOrigin;
use driftstore_model::Record;
use driftstore_predicate::PredicateGroup;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Classification of a storage write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Record was inserted (no previous version existed).
    Insert,
    /// Record was updated (previous version existed).
    Update,
    /// Record was deleted.
    Delete,
}

/// A single change event from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    /// Classification of the write.
    pub op_type: OpType,
    /// Namespace of the model.
    pub namespace: String,
    /// Model name.
    pub model: String,
    /// The record as written (or as it was, for deletes).
    pub record: Record,
    /// The stored record the write replaced. `None` for inserts.
    pub previous: Option<Record>,
    /// Whether the write originated locally or from the sync engine.
    pub origin: WriteOrigin,
    /// Conditional-save predicate attached to the write, if any.
    /// Carried only on the root record of a conditional save.
    pub condition: Option<PredicateGroup>,
}

/// Distributes change events to subscribers.
///
/// - Emits only successful writes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Prunes disconnected subscribers on emit
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StorageChange>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that observes all future change events.
    pub fn subscribe(&self) -> Receiver<StorageChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a change event to all subscribers.
    pub fn emit(&self, change: StorageChange) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
