//! Paged sync queries.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::merger::ModelMerger;
use crate::outbox::MutationOutbox;
use crate::remote::RemoteClient;
use driftstore_model::{store_name, MODEL_METADATA_MODEL, USER_NAMESPACE};
use driftstore_predicate::PredicateGroup;
use driftstore_storage::{OpType, StorageAdapter, WriteOrigin};
use driftstore_sync_protocol::{ModelMetadata, PageRequest};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one model's sync pass produced.
#[derive(Debug, Clone)]
pub struct ModelSyncOutcome {
    /// Model name.
    pub model: String,
    /// Whether this was a base sync.
    pub base: bool,
    /// Records inserted.
    pub new: usize,
    /// Records updated.
    pub updated: usize,
    /// Records deleted.
    pub deleted: usize,
}

/// The result of a full sync pass across all syncable models.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Per-model outcomes, in the order the models were synced.
    pub outcomes: Vec<ModelSyncOutcome>,
    /// Models that failed, with their errors. A failed model does not
    /// advance its cursor and does not block the other models.
    pub errors: Vec<(String, SyncError)>,
}

/// Walks the remote's paged sync queries for every syncable model and
/// merges the results into local storage.
pub struct SyncProcessor {
    remote: Arc<dyn RemoteClient>,
    config: SyncConfig,
}

impl SyncProcessor {
    /// Creates a processor.
    pub fn new(remote: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
        Self { remote, config }
    }

    /// Syncs every syncable model, parents before children.
    ///
    /// Each model independently decides between base and delta sync
    /// from its persisted metadata. A failing model is recorded in the
    /// report and skipped; the pass continues.
    pub fn run(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        merger: &ModelMerger,
        now_ms: i64,
    ) -> SyncResult<SyncReport> {
        let schema = storage.schema()?;
        let models: Vec<String> = schema
            .user()
            .syncable_models()?
            .iter()
            .map(|def| def.name.clone())
            .collect();

        let mut report = SyncReport::default();
        for model in models {
            match self.sync_model(storage, outbox, merger, &model, now_ms) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    warn!(model = %model, error = %error, "model sync failed");
                    report.errors.push((model, error));
                }
            }
        }
        Ok(report)
    }

    /// The models a full pass would sync, in sync order.
    pub fn sync_order(&self, storage: &StorageAdapter) -> SyncResult<Vec<String>> {
        let schema = storage.schema()?;
        Ok(schema
            .user()
            .syncable_models()?
            .iter()
            .map(|def| def.name.clone())
            .collect())
    }

    fn sync_model(
        &self,
        storage: &StorageAdapter,
        outbox: &MutationOutbox,
        merger: &ModelMerger,
        model: &str,
        now_ms: i64,
    ) -> SyncResult<ModelSyncOutcome> {
        let mut metadata = self.load_or_create_metadata(storage, model)?;

        // A changed sync predicate invalidates the cursors: records
        // outside the old filter were never pulled.
        let predicate_json = self.config.predicate_json(model);
        if metadata.predicate_changed(predicate_json.as_deref()) {
            debug!(model = %model, "sync predicate changed, resetting cursors");
            metadata.reset(predicate_json);
        }

        let base = metadata.requires_base_sync(now_ms);
        let last_sync = if base { None } else { metadata.last_sync };
        let filter = self.config.sync_predicates.get(model).cloned();

        let mut outcome = ModelSyncOutcome {
            model: model.to_string(),
            base,
            new: 0,
            updated: 0,
            deleted: 0,
        };

        let mut received = 0usize;
        let mut next_token: Option<String> = None;
        let mut started_at: Option<i64> = None;

        loop {
            let remaining = self.config.max_records_to_sync.saturating_sub(received);
            if remaining == 0 {
                break;
            }

            let request = PageRequest {
                model: model.to_string(),
                last_sync,
                next_token: next_token.take(),
                limit: remaining.min(self.config.sync_page_size),
                filter: filter.clone(),
            };
            let response = self.remote.sync_page(&request)?;

            if started_at.is_none() {
                started_at = response.started_at;
            }
            received += response.items.len();

            let results = storage
                .run_exclusive(|s| merger.merge_page(s, outbox, model, response.items))?;
            for (_, op_type) in results {
                match op_type {
                    OpType::Insert => outcome.new += 1,
                    OpType::Update => outcome.updated += 1,
                    OpType::Delete => outcome.deleted += 1,
                }
            }

            next_token = response.next_token;
            if next_token.is_none() {
                break;
            }
        }

        metadata.record_sync(started_at.unwrap_or(now_ms), base);
        self.persist_metadata(storage, &metadata)?;

        debug!(
            model = %model,
            base,
            new = outcome.new,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "model synced"
        );
        Ok(outcome)
    }

    fn load_or_create_metadata(
        &self,
        storage: &StorageAdapter,
        model: &str,
    ) -> SyncResult<ModelMetadata> {
        let id = store_name(USER_NAMESPACE, model);
        let existing = storage.query(
            MODEL_METADATA_MODEL,
            Some(&PredicateGroup::field_eq("id", json!(id))),
            None,
        )?;
        match existing.first() {
            Some(record) => Ok(ModelMetadata::from_record(record)?),
            None => Ok(ModelMetadata::new(
                USER_NAMESPACE,
                model,
                self.config.full_sync_interval.as_millis() as u64,
            )),
        }
    }

    fn persist_metadata(
        &self,
        storage: &StorageAdapter,
        metadata: &ModelMetadata,
    ) -> SyncResult<()> {
        storage.save(
            MODEL_METADATA_MODEL,
            metadata.to_record()?,
            None,
            WriteOrigin::Sync,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use driftstore_model::{
        ModelAssociation, ModelDefinition, ModelField, Record, ScalarType, Schema,
    };
    use driftstore_storage::MemoryBackend;
    use driftstore_sync_protocol::PageResponse;

    fn blog_storage() -> StorageAdapter {
        let adapter = StorageAdapter::new(Arc::new(MemoryBackend::new()));
        let post = ModelDefinition::new(
            "Post",
            vec![
                ModelField::scalar("id", ScalarType::Id),
                ModelField::scalar("title", ScalarType::String),
            ],
        );
        let comment = ModelDefinition::new(
            "Comment",
            vec![
                ModelField::scalar("id", ScalarType::Id),
                ModelField::scalar("postId", ScalarType::Id),
                ModelField::related(
                    "post",
                    "Post",
                    ModelAssociation::BelongsTo {
                        target_names: vec!["postId".into()],
                    },
                ),
            ],
        );
        adapter.set_up(Schema::new(vec![post, comment])).unwrap();
        adapter
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn processor(remote: &Arc<MockRemote>, config: SyncConfig) -> SyncProcessor {
        SyncProcessor::new(Arc::clone(remote) as Arc<dyn RemoteClient>, config)
    }

    #[test]
    fn parents_sync_before_children() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        let processor = processor(&remote, SyncConfig::new());

        processor
            .run(&storage, &MutationOutbox::new(), &ModelMerger::new(), 0)
            .unwrap();

        let requests = remote.page_requests();
        let post_pos = requests.iter().position(|r| r.model == "Post").unwrap();
        let comment_pos = requests.iter().position(|r| r.model == "Comment").unwrap();
        assert!(post_pos < comment_pos);
    }

    #[test]
    fn pages_follow_continuation_tokens() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page(
            "Post",
            PageResponse {
                items: vec![record(json!({"id": "p1", "title": "a", "_version": 1}))],
                next_token: Some("t1".into()),
                started_at: Some(1_000),
            },
        );
        remote.queue_page(
            "Post",
            PageResponse::last_page(
                vec![record(json!({"id": "p2", "title": "b", "_version": 1}))],
                1_000,
            ),
        );

        let processor = processor(&remote, SyncConfig::new());
        let report = processor
            .run(&storage, &MutationOutbox::new(), &ModelMerger::new(), 0)
            .unwrap();

        let post = report
            .outcomes
            .iter()
            .find(|o| o.model == "Post")
            .unwrap();
        assert!(post.base);
        assert_eq!(post.new, 2);
        assert_eq!(storage.query("Post", None, None).unwrap().len(), 2);

        let post_requests: Vec<_> = remote
            .page_requests()
            .into_iter()
            .filter(|r| r.model == "Post")
            .collect();
        assert_eq!(post_requests.len(), 2);
        assert_eq!(post_requests[1].next_token, Some("t1".to_string()));
    }

    #[test]
    fn page_limit_accounts_for_received_records() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        let items: Vec<Record> = (0..3)
            .map(|i| record(json!({"id": format!("p{i}"), "title": "t", "_version": 1})))
            .collect();
        remote.queue_page(
            "Post",
            PageResponse {
                items,
                next_token: Some("t1".into()),
                started_at: Some(1_000),
            },
        );
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 1_000));

        let config = SyncConfig::new()
            .with_sync_page_size(3)
            .with_max_records_to_sync(5);
        let processor = processor(&remote, config);
        processor
            .run(&storage, &MutationOutbox::new(), &ModelMerger::new(), 0)
            .unwrap();

        let post_requests: Vec<_> = remote
            .page_requests()
            .into_iter()
            .filter(|r| r.model == "Post")
            .collect();
        assert_eq!(post_requests[0].limit, 3);
        // Only two slots left under the cap.
        assert_eq!(post_requests[1].limit, 2);
    }

    #[test]
    fn second_run_is_delta_with_cursor() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 5_000));

        let processor = processor(&remote, SyncConfig::new());
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        processor.run(&storage, &outbox, &merger, 0).unwrap();
        let report = processor.run(&storage, &outbox, &merger, 1).unwrap();

        let post = report
            .outcomes
            .iter()
            .find(|o| o.model == "Post")
            .unwrap();
        assert!(!post.base);

        let delta_request = remote
            .page_requests()
            .into_iter()
            .filter(|r| r.model == "Post")
            .nth(1)
            .unwrap();
        assert_eq!(delta_request.last_sync, Some(5_000));
    }

    #[test]
    fn expired_interval_forces_base_sync() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 0));
        let config = SyncConfig::new().with_full_sync_interval(std::time::Duration::from_millis(100));
        let processor = processor(&remote, config);
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        processor.run(&storage, &outbox, &merger, 0).unwrap();
        let report = processor.run(&storage, &outbox, &merger, 200).unwrap();

        let post = report
            .outcomes
            .iter()
            .find(|o| o.model == "Post")
            .unwrap();
        assert!(post.base);
    }

    #[test]
    fn base_sync_cursor_is_the_page_start_timestamp() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 5_000));

        let processor = processor(&remote, SyncConfig::new());
        processor
            .run(&storage, &MutationOutbox::new(), &ModelMerger::new(), 9_999)
            .unwrap();

        let metadata = processor.load_or_create_metadata(&storage, "Post").unwrap();
        assert_eq!(metadata.last_sync, Some(5_000));
        assert_eq!(metadata.last_full_sync, Some(5_000));
    }

    #[test]
    fn predicate_change_resets_cursors() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 5_000));
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        processor(&remote, SyncConfig::new())
            .run(&storage, &outbox, &merger, 0)
            .unwrap();

        // Same interval, new predicate: must base-sync from scratch.
        let filtered = SyncConfig::new()
            .with_sync_predicate("Post", PredicateGroup::field_eq("title", json!("x")));
        let report = processor(&remote, filtered)
            .run(&storage, &outbox, &merger, 1)
            .unwrap();

        let post = report
            .outcomes
            .iter()
            .find(|o| o.model == "Post")
            .unwrap();
        assert!(post.base);

        let last_request = remote
            .page_requests()
            .into_iter()
            .filter(|r| r.model == "Post")
            .next_back()
            .unwrap();
        assert_eq!(last_request.last_sync, None);
        assert!(last_request.filter.is_some());
    }

    #[test]
    fn failing_model_does_not_block_others() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.fail_pages_for("Post");
        remote.queue_page(
            "Comment",
            PageResponse::last_page(
                vec![record(json!({"id": "c1", "postId": "p1", "_version": 1}))],
                1_000,
            ),
        );

        let processor = processor(&remote, SyncConfig::new());
        let report = processor
            .run(&storage, &MutationOutbox::new(), &ModelMerger::new(), 0)
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "Post");
        assert!(report.outcomes.iter().any(|o| o.model == "Comment"));
        assert_eq!(storage.query("Comment", None, None).unwrap().len(), 1);
    }

    #[test]
    fn failed_model_keeps_its_cursor() {
        let storage = blog_storage();
        let remote = Arc::new(MockRemote::new());
        remote.queue_page("Post", PageResponse::last_page(Vec::new(), 5_000));
        let processor = processor(&remote, SyncConfig::new());
        let outbox = MutationOutbox::new();
        let merger = ModelMerger::new();

        processor.run(&storage, &outbox, &merger, 0).unwrap();

        remote.fail_pages_for("Post");
        processor.run(&storage, &outbox, &merger, 1).unwrap();

        let metadata = processor.load_or_create_metadata(&storage, "Post").unwrap();
        assert_eq!(metadata.last_sync, Some(5_000));
    }
}
