//! Outbox mutation events.

use crate::error::{ProtocolError, ProtocolResult};
use driftstore_model::Record;
use driftstore_predicate::PredicateGroup;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of change a mutation event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOp {
    /// A new record was created locally.
    Create,
    /// An existing record was modified locally.
    Update,
    /// A record was deleted locally.
    Delete,
}

/// One pending local mutation awaiting delivery to the remote.
///
/// Events are persisted in the reserved outbox store and survive
/// restarts. The `data` field holds the fields the mutation puts on
/// the wire: the full record for a create, the changed fields plus the
/// keys for an update, the keys alone for a delete. `condition`
/// carries any conditional-save predicate that must also hold
/// remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    /// Unique event ID, also the outbox store key.
    pub id: Uuid,
    /// Model the mutation applies to.
    pub model: String,
    /// Identity of the mutated record.
    pub model_id: String,
    /// Change kind.
    pub op: MutationOp,
    /// The field set this mutation puts on the wire.
    pub data: Record,
    /// Conditional-save predicate, if the local write carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PredicateGroup>,
    /// Last server-confirmed version known when the event was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl MutationEvent {
    /// Creates an event with a fresh ID.
    pub fn new(
        model: impl Into<String>,
        model_id: impl Into<String>,
        op: MutationOp,
        data: Record,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            model_id: model_id.into(),
            op,
            data,
            condition: None,
            version: None,
        }
    }

    /// Attaches a conditional-save predicate.
    #[must_use]
    pub fn with_condition(mut self, condition: PredicateGroup) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the known server version.
    #[must_use]
    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    /// Returns true if the event carries no conditional predicate.
    pub fn condition_is_empty(&self) -> bool {
        self.condition.as_ref().is_none_or(PredicateGroup::is_empty)
    }

    /// Converts to the persisted record form for the outbox store.
    pub fn to_record(&self) -> ProtocolResult<Record> {
        Ok(Record::from_value(serde_json::to_value(self)?)
            .map_err(|e| ProtocolError::malformed(e.to_string()))?)
    }

    /// Restores an event from its persisted record form.
    pub fn from_record(record: &Record) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(record.to_value())?)
    }
}
