//! Outbox delivery.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::merger::ModelMerger;
use crate::outbox::MutationOutbox;
use crate::registry::ShutdownToken;
use crate::remote::RemoteClient;
use driftstore_model::Record;
use driftstore_storage::StorageAdapter;
use driftstore_sync_protocol::{MutationEvent, MutationRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a drain pass accomplished.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Events acknowledged by the remote, in delivery order.
    pub processed: Vec<MutationEvent>,
    /// Events the remote rejected; removed from the queue.
    pub dropped: Vec<(MutationEvent, SyncError)>,
    /// Set when delivery stopped on a persistent transient failure.
    /// The head stays queued for the next drain.
    pub halted: Option<SyncError>,
}

/// Delivers queued mutations to the remote, strictly head-first.
///
/// Only one drain runs at a time; concurrent calls serialize. Delivery
/// order is the queue order, and the head is retried in place so a
/// failing mutation never lets a later one overtake it.
pub struct MutationProcessor {
    remote: Arc<dyn RemoteClient>,
    retry: RetryConfig,
    drain_lock: Mutex<()>,
}

impl MutationProcessor {
    /// Creates a processor.
    pub fn new(remote: Arc<dyn RemoteClient>, retry: RetryConfig) -> Self {
        Self {
            remote,
            retry,
            drain_lock: Mutex::new(()),
        }
    }

    /// Drains the outbox until it is empty, delivery halts, or
    /// shutdown is requested.
    pub fn drain(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        merger: &ModelMerger,
        token: &ShutdownToken,
    ) -> SyncResult<DrainOutcome> {
        let _guard = self.drain_lock.lock();
        let mut outcome = DrainOutcome::default();

        loop {
            if token.is_stopped() {
                outbox.clear_in_flight();
                break;
            }

            let Some(event) = storage.run_exclusive(|s| outbox.peek(s))? else {
                break;
            };

            let request = build_request(&event);
            match self.submit_with_retry(&request, token) {
                Ok(response) => {
                    storage.run_exclusive(|s| -> SyncResult<()> {
                        outbox.dequeue(s, Some(&response.record))?;
                        merger.merge(s, outbox, &event.model, &response.record)?;
                        Ok(())
                    })?;
                    debug!(model = %event.model, model_id = %event.model_id, "mutation acknowledged");
                    outcome.processed.push(event);
                }
                Err(SyncError::Cancelled) => {
                    outbox.clear_in_flight();
                    break;
                }
                Err(error) if error.is_retryable() => {
                    // Attempts exhausted; keep the head for later.
                    warn!(model = %event.model, error = %error, "mutation delivery halted");
                    outbox.clear_in_flight();
                    outcome.halted = Some(error);
                    break;
                }
                Err(error) => {
                    warn!(
                        model = %event.model,
                        model_id = %event.model_id,
                        error = %error,
                        "mutation rejected, dropping"
                    );
                    storage.run_exclusive(|s| outbox.dequeue(s, None))?;
                    outcome.dropped.push((event, error));
                }
            }
        }

        Ok(outcome)
    }

    fn submit_with_retry(
        &self,
        request: &MutationRequest,
        token: &ShutdownToken,
    ) -> SyncResult<driftstore_sync_protocol::MutationResponse> {
        let mut attempt = 0u32;
        loop {
            match self.remote.submit(request) {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(error);
                    }
                    if token.wait_timeout(self.retry.delay_for_attempt(attempt)) {
                        return Err(SyncError::Cancelled);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Builds the wire request for an event. Sync metadata never goes on
/// the wire; the version rides in its own field.
fn build_request(event: &MutationEvent) -> MutationRequest {
    let mut data = Record::new();
    for (name, value) in event.data.fields() {
        if !Record::is_metadata_field(name) {
            data.set(name.clone(), value.clone());
        }
    }
    MutationRequest {
        model: event.model.clone(),
        op: event.op,
        data,
        condition: event.condition.clone(),
        version: event.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use driftstore_model::{ModelDefinition, ModelField, ScalarType, Schema};
    use driftstore_predicate::PredicateGroup;
    use driftstore_storage::{MemoryBackend, WriteOrigin};
    use driftstore_sync_protocol::{MutationErrorKind, MutationOp, MutationResponse};
    use serde_json::json;

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

    fn enqueue(storage: &StorageAdapter, outbox: &MutationOutbox, op: MutationOp, data: serde_json::Value) {
        let data = record(data);
        let id = data.get("id").unwrap().as_str().unwrap().to_string();
        outbox
            .enqueue(storage, MutationEvent::new("Post", id, op, data))
            .unwrap();
    }

    #[test]
    fn drains_in_queue_order_and_applies_acknowledgements() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        enqueue(&storage, &outbox, MutationOp::Create, json!({"id": "a", "title": "one"}));
        enqueue(&storage, &outbox, MutationOp::Create, json!({"id": "b", "title": "two"}));

        let processor = MutationProcessor::new(
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
            RetryConfig::no_retry(),
        );
        let outcome = processor
            .drain(&storage, &outbox, &merger, &ShutdownToken::new())
            .unwrap();

        assert_eq!(outcome.processed.len(), 2);
        assert!(outbox.is_empty(&storage).unwrap());

        let submitted = remote.submitted();
        assert_eq!(submitted[0].data.get("id"), Some(&json!("a")));
        assert_eq!(submitted[1].data.get("id"), Some(&json!("b")));

        // Acknowledged versions are persisted locally.
        let persisted = storage
            .query("Post", Some(&PredicateGroup::field_eq("id", json!("a"))), None)
            .unwrap();
        assert_eq!(persisted[0].version(), Some(1));
    }

    #[test]
    fn rejected_mutation_is_dropped_and_drain_continues() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        enqueue(&storage, &outbox, MutationOp::Update, json!({"id": "a", "title": "stale"}));
        enqueue(&storage, &outbox, MutationOp::Create, json!({"id": "b", "title": "fine"}));
        remote.queue_mutation_result(Err(SyncError::mutation(
            MutationErrorKind::ConditionalCheckFailed,
            "condition not met",
        )));

        let processor = MutationProcessor::new(
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
            RetryConfig::no_retry(),
        );
        let outcome = processor
            .drain(&storage, &outbox, &merger, &ShutdownToken::new())
            .unwrap();

        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].0.model_id, "a");
        assert_eq!(outcome.processed.len(), 1);
        assert!(outbox.is_empty(&storage).unwrap());
    }

    #[test]
    fn transient_failure_halts_with_head_queued() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        enqueue(&storage, &outbox, MutationOp::Create, json!({"id": "a", "title": "t"}));
        remote.queue_mutation_result(Err(SyncError::transport_retryable("503")));
        remote.queue_mutation_result(Err(SyncError::transport_retryable("503")));

        let retry = RetryConfig::new(2)
            .with_initial_delay(std::time::Duration::from_millis(1))
            .without_jitter();
        let processor =
            MutationProcessor::new(Arc::clone(&remote) as Arc<dyn RemoteClient>, retry);
        let outcome = processor
            .drain(&storage, &outbox, &merger, &ShutdownToken::new())
            .unwrap();

        assert!(outcome.halted.is_some());
        assert_eq!(outbox.all(&storage).unwrap().len(), 1);
    }

    #[test]
    fn shutdown_interrupts_drain() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        enqueue(&storage, &outbox, MutationOp::Create, json!({"id": "a", "title": "t"}));

        let token = ShutdownToken::new();
        token.stop();
        let processor = MutationProcessor::new(
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
            RetryConfig::no_retry(),
        );
        let outcome = processor.drain(&storage, &outbox, &merger, &token).unwrap();

        assert!(outcome.processed.is_empty());
        assert_eq!(outbox.all(&storage).unwrap().len(), 1);
    }

    #[test]
    fn wire_request_excludes_sync_metadata() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        // A record that has been synced before carries metadata fields.
        storage
            .save(
                "Post",
                record(json!({"id": "a", "title": "t", "_version": 4, "_lastChangedAt": 9})),
                None,
                WriteOrigin::Sync,
            )
            .unwrap();
        let data = record(json!({"id": "a", "title": "t2", "_version": 4}));
        outbox
            .enqueue(
                &storage,
                MutationEvent::new("Post", "a", MutationOp::Update, data).with_version(Some(4)),
            )
            .unwrap();

        let processor = MutationProcessor::new(
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
            RetryConfig::no_retry(),
        );
        processor
            .drain(&storage, &outbox, &merger, &ShutdownToken::new())
            .unwrap();

        let submitted = remote.submitted();
        assert!(submitted[0].data.get("_version").is_none());
        assert_eq!(submitted[0].version, Some(4));
    }

    #[test]
    fn delete_acknowledgement_removes_record() {
        let storage = storage();
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();
        let remote = Arc::new(MockRemote::new());

        storage
            .save(
                "Post",
                record(json!({"id": "a", "title": "t", "_version": 1})),
                None,
                WriteOrigin::Sync,
            )
            .unwrap();
        enqueue(&storage, &outbox, MutationOp::Delete, json!({"id": "a"}));

        let processor = MutationProcessor::new(
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
            RetryConfig::no_retry(),
        );
        let response = MutationResponse {
            record: record(json!({"id": "a", "_deleted": true, "_version": 2})),
        };
        remote.queue_mutation_result(Ok(response));

        processor
            .drain(&storage, &outbox, &merger, &ShutdownToken::new())
            .unwrap();

        assert!(storage.query("Post", None, None).unwrap().is_empty());
    }
}
