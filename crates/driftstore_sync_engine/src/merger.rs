//! Reconciliation of remote records into local storage.

use crate::error::SyncResult;
use crate::outbox::MutationOutbox;
use driftstore_model::Record;
use driftstore_storage::{OpType, StorageAdapter, WriteOrigin};
use std::collections::HashMap;

/// Applies remote records to local storage with last-write-wins
/// semantics, deferring to pending local mutations.
///
/// All methods must run inside [`StorageAdapter::run_exclusive`]: the
/// outbox check and the write must be atomic with respect to local
/// saves, or a save landing between them could be silently overwritten.
pub struct ModelMerger;

impl ModelMerger {
    /// Creates a merger.
    pub fn new() -> Self {
        Self
    }

    /// Merges one remote record.
    ///
    /// Returns `None` when the record has pending local mutations; the
    /// local state is newer in intent and the remote echo is dropped.
    /// Tombstones delete, everything else saves.
    pub fn merge(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        model: &str,
        record: &Record,
    ) -> SyncResult<Option<OpType>> {
        let schema = storage.schema()?;
        let definition = schema.user_model(model)?;
        let identity = record.identifier(definition)?;

        if outbox.has_pending_for(storage, model, &identity)? {
            return Ok(None);
        }

        if record.is_deleted() {
            storage.delete_record(model, record, None, WriteOrigin::Sync)?;
            Ok(Some(OpType::Delete))
        } else {
            let results = storage.save(model, record.clone(), None, WriteOrigin::Sync)?;
            Ok(results.first().map(|(_, op_type)| *op_type))
        }
    }

    /// Merges a page of remote records.
    ///
    /// Duplicate identities within the page collapse to the last
    /// occurrence. Records with pending local mutations are dropped.
    /// Returns the per-record classification of everything written.
    pub fn merge_page(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        model: &str,
        items: Vec<Record>,
    ) -> SyncResult<Vec<(Record, OpType)>> {
        let schema = storage.schema()?;
        let definition = schema.user_model(model)?;

        // Last occurrence wins, first-seen position kept.
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Record> = HashMap::new();
        for item in items {
            let identity = item.identifier(definition)?;
            if !latest.contains_key(&identity) {
                order.push(identity.clone());
            }
            latest.insert(identity, item);
        }

        let mut batch = Vec::with_capacity(order.len());
        for identity in order {
            if outbox.has_pending_for(storage, model, &identity)? {
                continue;
            }
            if let Some(record) = latest.remove(&identity) {
                batch.push(record);
            }
        }

        Ok(storage.batch_save(model, batch, WriteOrigin::Sync)?)
    }
}

impl Default for ModelMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_model::{ModelDefinition, ModelField, ScalarType, Schema};
    use driftstore_storage::MemoryBackend;
    use driftstore_sync_protocol::{MutationEvent, MutationOp};
    use serde_json::json;
    use std::sync::Arc;

    fn storage() -> StorageAdapter {
        let adapter = StorageAdapter::new(Arc::new(MemoryBackend::new()));
        let post = ModelDefinition::new(
            "Post",
            vec![
                ModelField::scalar("id", ScalarType::Id),
                ModelField::scalar("title", ScalarType::String),
            ],
        );
        adapter.set_up(Schema::new(vec![post])).unwrap();
        adapter
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn merge_saves_remote_record() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        let remote = record(json!({"id": "p1", "title": "remote", "_version": 1}));
        let op = merger.merge(&storage, &outbox, "Post", &remote).unwrap();

        assert_eq!(op, Some(OpType::Insert));
        assert_eq!(storage.query("Post", None, None).unwrap().len(), 1);
    }

    #[test]
    fn merge_deletes_tombstone() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        storage
            .save(
                "Post",
                record(json!({"id": "p1", "title": "t"})),
                None,
                WriteOrigin::Sync,
            )
            .unwrap();

        let tombstone = record(json!({"id": "p1", "_deleted": true, "_version": 2}));
        let op = merger.merge(&storage, &outbox, "Post", &tombstone).unwrap();

        assert_eq!(op, Some(OpType::Delete));
        assert!(storage.query("Post", None, None).unwrap().is_empty());
    }

    #[test]
    fn merge_suppressed_by_pending_mutation() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        let local = record(json!({"id": "p1", "title": "local"}));
        storage
            .save("Post", local.clone(), None, WriteOrigin::Local)
            .unwrap();
        outbox
            .enqueue(
                &storage,
                MutationEvent::new("Post", "p1", MutationOp::Update, local),
            )
            .unwrap();

        let remote = record(json!({"id": "p1", "title": "remote", "_version": 3}));
        let op = merger.merge(&storage, &outbox, "Post", &remote).unwrap();

        assert_eq!(op, None);
        let persisted = storage.query("Post", None, None).unwrap();
        assert_eq!(persisted[0].get("title"), Some(&json!("local")));
    }

    #[test]
    fn merge_page_dedups_last_wins() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        let results = merger
            .merge_page(
                &storage,
                &outbox,
                "Post",
                vec![
                    record(json!({"id": "p1", "title": "stale", "_version": 1})),
                    record(json!({"id": "p2", "title": "other", "_version": 1})),
                    record(json!({"id": "p1", "title": "fresh", "_version": 2})),
                ],
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        let persisted = storage
            .query(
                "Post",
                Some(&driftstore_predicate::PredicateGroup::field_eq(
                    "id",
                    json!("p1"),
                )),
                None,
            )
            .unwrap();
        assert_eq!(persisted[0].get("title"), Some(&json!("fresh")));
    }

    #[test]
    fn merge_page_applies_tombstones() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        storage
            .save(
                "Post",
                record(json!({"id": "p1", "title": "t"})),
                None,
                WriteOrigin::Sync,
            )
            .unwrap();

        let results = merger
            .merge_page(
                &storage,
                &outbox,
                "Post",
                vec![record(json!({"id": "p1", "_deleted": true, "_version": 2}))],
            )
            .unwrap();

        assert_eq!(results[0].1, OpType::Delete);
        assert!(storage.query("Post", None, None).unwrap().is_empty());
    }

    #[test]
    fn merge_page_skips_records_with_pending_mutations() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        let local = record(json!({"id": "p1", "title": "local"}));
        storage
            .save("Post", local.clone(), None, WriteOrigin::Local)
            .unwrap();
        outbox
            .enqueue(
                &storage,
                MutationEvent::new("Post", "p1", MutationOp::Update, local),
            )
            .unwrap();

        let results = merger
            .merge_page(
                &storage,
                &outbox,
                "Post",
                vec![
                    record(json!({"id": "p1", "title": "remote", "_version": 2})),
                    record(json!({"id": "p2", "title": "new", "_version": 1})),
                ],
            )
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.get("id"), Some(&json!("p2")));
    }
}
