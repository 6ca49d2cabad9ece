//! Payload comparison for mutation acknowledgements.

use driftstore_model::Record;

/// Returns true if `received` carries the same values as `sent` for
/// every field `sent` includes.
///
/// Directed subset equality: extra fields on `received` are fine, they
/// are server-filled. Sync metadata fields on either side are ignored;
/// the server always rewrites those. The outbox uses this to decide
/// whether an acknowledged version may be propagated onto a queued
/// mutation for the same record.
pub fn payload_matches(sent: &Record, received: &Record) -> bool {
    sent.fields().iter().all(|(name, value)| {
        Record::is_metadata_field(name) || received.get(name) == Some(value)
    })
}
