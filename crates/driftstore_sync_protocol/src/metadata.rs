//! Per-model sync cursors.

use crate::error::{ProtocolError, ProtocolResult};
use driftstore_model::Record;
use serde::{Deserialize, Serialize};

/// Persisted sync bookkeeping for one model.
///
/// Tracks the delta cursor, the time of the last full sync, and the
/// canonical form of the sync predicate the cursors were built under.
/// A predicate change invalidates the cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Store key: `{namespace}_{model}`.
    pub id: String,
    /// Namespace the model lives in.
    pub namespace: String,
    /// Model name.
    pub model: String,
    /// Server timestamp of the last completed sync, the delta cursor.
    /// `None` until the first base sync completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    /// Server timestamp the last completed base sync started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_sync: Option<i64>,
    /// How often a base sync must be repeated, in milliseconds.
    pub full_sync_interval_ms: u64,
    /// Canonical JSON of the sync predicate the cursors were built
    /// under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_predicate: Option<String>,
}

impl ModelMetadata {
    /// Creates fresh metadata with no cursors.
    pub fn new(
        namespace: impl Into<String>,
        model: impl Into<String>,
        full_sync_interval_ms: u64,
    ) -> Self {
        let namespace = namespace.into();
        let model = model.into();
        Self {
            id: driftstore_model::store_name(&namespace, &model),
            namespace,
            model,
            last_sync: None,
            last_full_sync: None,
            full_sync_interval_ms,
            last_sync_predicate: None,
        }
    }

    /// Returns true if the next sync for this model must be a base
    /// sync: no delta cursor yet, or the full-sync interval elapsed.
    pub fn requires_base_sync(&self, now_ms: i64) -> bool {
        if self.last_sync.is_none() {
            return true;
        }
        match self.last_full_sync {
            Some(at) => now_ms.saturating_sub(at) >= self.full_sync_interval_ms as i64,
            None => true,
        }
    }

    /// Returns true if `predicate_json` differs from the predicate the
    /// current cursors were built under.
    pub fn predicate_changed(&self, predicate_json: Option<&str>) -> bool {
        self.last_sync_predicate.as_deref() != predicate_json
    }

    /// Clears the cursors so the next sync starts from scratch.
    pub fn reset(&mut self, predicate_json: Option<String>) {
        self.last_sync = None;
        self.last_full_sync = None;
        self.last_sync_predicate = predicate_json;
    }

    /// Records a completed sync pass.
    ///
    /// `started_at` is the server timestamp the page walk began with;
    /// it becomes the delta cursor and, when `base` marks the pass as
    /// a base sync, the full-sync cursor as well.
    pub fn record_sync(&mut self, started_at: i64, base: bool) {
        self.last_sync = Some(started_at);
        if base {
            self.last_full_sync = Some(started_at);
        }
    }

    /// Converts to the persisted record form.
    pub fn to_record(&self) -> ProtocolResult<Record> {
        Ok(Record::from_value(serde_json::to_value(self)?)
            .map_err(|e| ProtocolError::malformed(e.to_string()))?)
    }

    /// Restores metadata from its persisted record form.
    pub fn from_record(record: &Record) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(record.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metadata_requires_base_sync() {
        let meta = ModelMetadata::new("user", "Post", 86_400_000);
        assert_eq!(meta.id, "user_Post");
        assert!(meta.requires_base_sync(0));
    }

    #[test]
    fn delta_until_interval_expires() {
        let mut meta = ModelMetadata::new("user", "Post", 1_000);
        meta.record_sync(500, true);

        // The full-sync cursor is the server start timestamp, not the
        // time the pass finished locally.
        assert_eq!(meta.last_full_sync, Some(500));
        assert!(!meta.requires_base_sync(1_400));
        assert!(meta.requires_base_sync(1_500));
    }

    #[test]
    fn predicate_change_detection() {
        let mut meta = ModelMetadata::new("user", "Post", 1_000);
        assert!(!meta.predicate_changed(None));
        assert!(meta.predicate_changed(Some("{}")));

        meta.reset(Some("{}".to_string()));
        assert!(!meta.predicate_changed(Some("{}")));
        assert!(meta.last_sync.is_none());
    }

    #[test]
    fn record_roundtrip() {
        let mut meta = ModelMetadata::new("user", "Post", 86_400_000);
        meta.record_sync(1_700_000_000_000, true);

        let persisted = meta.to_record().unwrap();
        let restored = ModelMetadata::from_record(&persisted).unwrap();
        assert_eq!(meta, restored);
    }
}
