//! Request and response shapes for the remote endpoint.

use crate::event::MutationOp;
use driftstore_model::Record;
use driftstore_predicate::PredicateGroup;
use serde::{Deserialize, Serialize};

/// A request for one page of a model's sync query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Model to page through.
    pub model: String,
    /// Delta cursor; `None` requests a base sync from the beginning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    /// Opaque continuation token from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    /// Maximum items for this page.
    pub limit: usize,
    /// Server-side filter, if the model syncs under a predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<PredicateGroup>,
}

/// One page of sync results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    /// Records in this page, each carrying sync metadata fields.
    pub items: Vec<Record>,
    /// Continuation token; `None` marks the final page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    /// Server timestamp the walk is consistent as of. Sent on the
    /// first page; becomes the next delta cursor when the walk ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

impl PageResponse {
    /// A final page with the given items.
    pub fn last_page(items: Vec<Record>, started_at: i64) -> Self {
        Self {
            items,
            next_token: None,
            started_at: Some(started_at),
        }
    }
}

/// A mutation submitted to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    /// Model being mutated.
    pub model: String,
    /// Change kind.
    pub op: MutationOp,
    /// Field values being sent. For updates this is the changed fields
    /// plus key fields; for creates the full record; for deletes the
    /// key fields.
    pub data: Record,
    /// Conditional predicate the remote must also verify, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PredicateGroup>,
    /// Version the mutation was built against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// The remote's answer to an accepted mutation: the authoritative
/// record, carrying the new version and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    /// The record as the remote now stores it.
    pub record: Record,
}

/// Classification of a rejected or failed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationErrorKind {
    /// The mutation's condition (or version precondition) did not hold
    /// remotely. Not retryable; the event is discarded.
    ConditionalCheckFailed,
    /// A concurrent-modification conflict the engine does not resolve.
    ConflictUnhandled,
    /// The caller is not permitted to perform the mutation.
    Unauthorized,
    /// A transient failure; the mutation should be retried.
    Transient,
    /// A configuration or schema problem; retrying cannot help.
    Config,
}

impl MutationErrorKind {
    /// Returns true if resubmitting the same mutation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationErrorKind::Transient)
    }
}

/// A change pushed by the remote over a live subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEvent {
    /// Model the change applies to.
    pub model: String,
    /// Change kind as observed remotely.
    pub op: MutationOp,
    /// The record after the change, with sync metadata fields.
    pub record: Record,
}

/// A message on the subscription channel: connection state or data.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// All subscription channels are established.
    Connected,
    /// The connection closed cleanly.
    Disconnected,
    /// The connection dropped unexpectedly; remote changes may have
    /// been missed.
    ConnectionDisrupted,
    /// A remote change.
    Data(SubscriptionEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_request_omits_absent_cursor() {
        let request = PageRequest {
            model: "Post".into(),
            last_sync: None,
            next_token: None,
            limit: 100,
            filter: None,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({"model": "Post", "limit": 100}));
    }

    #[test]
    fn page_response_roundtrip() {
        let response = PageResponse {
            items: vec![Record::from_value(json!({"id": "p1", "_version": 1})).unwrap()],
            next_token: Some("t1".into()),
            started_at: Some(1_700_000_000_000),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: PageResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn last_page_has_no_token() {
        let page = PageResponse::last_page(Vec::new(), 42);
        assert!(page.next_token.is_none());
        assert_eq!(page.started_at, Some(42));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(MutationErrorKind::Transient.is_retryable());
        assert!(!MutationErrorKind::ConditionalCheckFailed.is_retryable());
        assert!(!MutationErrorKind::ConflictUnhandled.is_retryable());
        assert!(!MutationErrorKind::Unauthorized.is_retryable());
        assert!(!MutationErrorKind::Config.is_retryable());
    }

    #[test]
    fn mutation_request_roundtrip() {
        let request = MutationRequest {
            model: "Post".into(),
            op: MutationOp::Update,
            data: Record::from_value(json!({"id": "p1", "title": "new"})).unwrap(),
            condition: Some(PredicateGroup::field_eq("title", json!("old"))),
            version: Some(4),
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: MutationRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(request, decoded);
    }
}
