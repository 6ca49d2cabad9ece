//! The durable mutation outbox.
//!
//! Pending local mutations live in the reserved outbox store, in FIFO
//! order, and survive restarts. Enqueueing coalesces with pending
//! events for the same record so at most one unconditioned event per
//! record waits behind the head. Every method here must be called
//! inside [`StorageAdapter::run_exclusive`]; the outbox itself takes
//! no locks on storage.

use crate::error::SyncResult;
use driftstore_model::MUTATION_EVENT_MODEL;
use driftstore_storage::{QueryOne, StorageAdapter, WriteOrigin};
use driftstore_sync_protocol::{payload_matches, MutationEvent, MutationOp};
use parking_lot::RwLock;
use uuid::Uuid;

/// How an enqueue was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The event was appended as a new queue entry.
    Appended,
    /// The event was folded into an existing pending entry.
    Merged,
    /// A delete cancelled an unsynced create; nothing remains queued.
    Annihilated,
}

/// The persistent mutation queue.
///
/// Only the in-flight marker is held in memory; queue content is
/// always read from storage so it reflects restarts and concurrent
/// exclusive sequences.
pub struct MutationOutbox {
    in_flight: RwLock<Option<Uuid>>,
}

impl MutationOutbox {
    /// Creates an outbox handle.
    pub fn new() -> Self {
        Self {
            in_flight: RwLock::new(None),
        }
    }

    /// Enqueues a mutation, coalescing with pending events for the
    /// same record.
    ///
    /// The in-flight head is never coalesced into: it may already be
    /// on the wire.
    pub fn enqueue(
        &self,
        storage: &StorageAdapter,
        incoming: MutationEvent,
    ) -> SyncResult<EnqueueOutcome> {
        let in_flight = *self.in_flight.read();
        let pending: Vec<MutationEvent> = self
            .events_for(storage, &incoming.model, &incoming.model_id)?
            .into_iter()
            .filter(|event| Some(event.id) != in_flight)
            .collect();

        let Some(first) = pending.first() else {
            self.persist(storage, &incoming)?;
            return Ok(EnqueueOutcome::Appended);
        };

        // The record has never reached the remote: a delete erases all
        // trace, anything else folds into the pending create. The
        // incoming condition is ignored here; there is no remote record
        // for it to gate.
        if first.op == MutationOp::Create {
            if incoming.op == MutationOp::Delete {
                for event in &pending {
                    self.remove(storage, event)?;
                }
                return Ok(EnqueueOutcome::Annihilated);
            }
            let mut merged = first.clone();
            for event in &pending[1..] {
                merged.data.merge_fields(&event.data);
                merged.version = merged.version.or(event.version);
                self.remove(storage, event)?;
            }
            merged.data.merge_fields(&incoming.data);
            merged.version = merged.version.or(incoming.version);
            self.persist(storage, &merged)?;
            return Ok(EnqueueOutcome::Merged);
        }

        // A conditioned mutation against a synced record must be
        // delivered as issued.
        if !incoming.condition_is_empty() {
            self.persist(storage, &incoming)?;
            return Ok(EnqueueOutcome::Appended);
        }

        // Collapse the whole pending tail into one event carrying the
        // incoming op. The oldest entry's id is kept so the record
        // keeps its queue position.
        let mut merged = first.clone();
        for event in &pending[1..] {
            merged.data.merge_fields(&event.data);
            merged.version = merged.version.or(event.version);
            self.remove(storage, event)?;
        }
        merged.data.merge_fields(&incoming.data);
        merged.op = incoming.op;
        merged.version = merged.version.or(incoming.version);
        merged.condition = None;
        self.persist(storage, &merged)?;
        Ok(EnqueueOutcome::Merged)
    }

    /// Returns the head of the queue and marks it in flight.
    ///
    /// Repeated peeks return the same event until it is dequeued; the
    /// head is stable while in flight.
    pub fn peek(&self, storage: &StorageAdapter) -> SyncResult<Option<MutationEvent>> {
        match storage.query_one(MUTATION_EVENT_MODEL, QueryOne::First)? {
            Some(record) => {
                let event = MutationEvent::from_record(&record)?;
                *self.in_flight.write() = Some(event.id);
                Ok(Some(event))
            }
            None => {
                *self.in_flight.write() = None;
                Ok(None)
            }
        }
    }

    /// Removes the head of the queue.
    ///
    /// When `acknowledged` carries the remote's authoritative record
    /// and it confirms what the head sent, its version becomes the
    /// base version of every event still queued for the same record;
    /// those events were written over optimistic local state and carry
    /// no server-confirmed version of their own. An acknowledgement
    /// that diverges from the head's payload, or whose tombstone state
    /// does not match the head's op, propagates nothing.
    ///
    /// Returns the new head, without marking it in flight.
    pub fn dequeue(
        &self,
        storage: &StorageAdapter,
        acknowledged: Option<&driftstore_model::Record>,
    ) -> SyncResult<Option<MutationEvent>> {
        let Some(head_record) = storage.query_one(MUTATION_EVENT_MODEL, QueryOne::First)? else {
            *self.in_flight.write() = None;
            return Ok(None);
        };
        let head = MutationEvent::from_record(&head_record)?;
        self.remove(storage, &head)?;

        if let Some(received) = acknowledged {
            let confirms_head = payload_matches(&head.data, received)
                && received.is_deleted() == (head.op == MutationOp::Delete);
            if confirms_head {
                for mut event in self.events_for(storage, &head.model, &head.model_id)? {
                    event.version = received.version();
                    self.persist(storage, &event)?;
                }
            }
        }

        *self.in_flight.write() = None;
        match storage.query_one(MUTATION_EVENT_MODEL, QueryOne::First)? {
            Some(record) => Ok(Some(MutationEvent::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// All queued events, oldest first.
    pub fn all(&self, storage: &StorageAdapter) -> SyncResult<Vec<MutationEvent>> {
        storage
            .query(MUTATION_EVENT_MODEL, None, None)?
            .iter()
            .map(|record| Ok(MutationEvent::from_record(record)?))
            .collect()
    }

    /// Queued events for one record, oldest first.
    pub fn events_for(
        &self,
        storage: &StorageAdapter,
        model: &str,
        model_id: &str,
    ) -> SyncResult<Vec<MutationEvent>> {
        Ok(self
            .all(storage)?
            .into_iter()
            .filter(|event| event.model == model && event.model_id == model_id)
            .collect())
    }

    /// Returns true if any event is queued for the record, the
    /// in-flight head included.
    pub fn has_pending_for(
        &self,
        storage: &StorageAdapter,
        model: &str,
        model_id: &str,
    ) -> SyncResult<bool> {
        Ok(!self.events_for(storage, model, model_id)?.is_empty())
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self, storage: &StorageAdapter) -> SyncResult<bool> {
        Ok(storage
            .query_one(MUTATION_EVENT_MODEL, QueryOne::First)?
            .is_none())
    }

    /// Drops the in-flight marker, e.g. when the engine stops with a
    /// send outstanding. The head stays queued for the next start.
    pub fn clear_in_flight(&self) {
        *self.in_flight.write() = None;
    }

    fn persist(&self, storage: &StorageAdapter, event: &MutationEvent) -> SyncResult<()> {
        storage.save(
            MUTATION_EVENT_MODEL,
            event.to_record()?,
            None,
            WriteOrigin::Sync,
        )?;
        Ok(())
    }

    fn remove(&self, storage: &StorageAdapter, event: &MutationEvent) -> SyncResult<()> {
        storage.delete_record(
            MUTATION_EVENT_MODEL,
            &event.to_record()?,
            None,
            WriteOrigin::Sync,
        )?;
        Ok(())
    }
}

impl Default for MutationOutbox {
    fn default() -> Self {
        Self::new()
    }
}
