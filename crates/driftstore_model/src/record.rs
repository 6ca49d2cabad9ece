//! The record value type and identity computation.

use crate::definition::ModelDefinition;
use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator joining composite key values into one identity string.
pub const PRIMARY_KEY_SEPARATOR: &str = "#";

const VERSION_FIELD: &str = "_version";
const DELETED_FIELD: &str = "_deleted";
const LAST_CHANGED_AT_FIELD: &str = "_lastChangedAt";

/// An application-level entity instance.
///
/// Records are JSON objects. The fields `_version`, `_deleted`, and
/// `_lastChangedAt` are server-controlled sync metadata and are never
/// set from local snapshots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builds a record from a JSON value.
    ///
    /// Fails unless the value is an object.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ModelError::invalid_record(format!(
                "expected object, got {other}"
            ))),
        }
    }

    /// Returns the record as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Returns the underlying JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Gets a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// The server-assigned optimistic concurrency version, if any.
    pub fn version(&self) -> Option<u64> {
        self.0.get(VERSION_FIELD).and_then(Value::as_u64)
    }

    /// Sets the server-assigned version.
    pub fn set_version(&mut self, version: u64) {
        self.0.insert(VERSION_FIELD.into(), version.into());
    }

    /// Whether the server has flagged this record as deleted.
    pub fn is_deleted(&self) -> bool {
        self.0
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Sets the deleted flag.
    pub fn set_deleted(&mut self, deleted: bool) {
        self.0.insert(DELETED_FIELD.into(), deleted.into());
    }

    /// The server-side last-changed timestamp in epoch milliseconds.
    pub fn last_changed_at(&self) -> Option<i64> {
        self.0.get(LAST_CHANGED_AT_FIELD).and_then(Value::as_i64)
    }

    /// Sets the last-changed timestamp.
    pub fn set_last_changed_at(&mut self, at: i64) {
        self.0.insert(LAST_CHANGED_AT_FIELD.into(), at.into());
    }

    /// Returns true if `field` carries server-controlled sync metadata.
    pub fn is_metadata_field(field: &str) -> bool {
        matches!(field, VERSION_FIELD | DELETED_FIELD | LAST_CHANGED_AT_FIELD)
    }

    /// Merges another record's fields over this one, shallowly.
    ///
    /// Sync metadata fields on `other` are skipped: version and deletion
    /// state only ever come from the server through dedicated setters.
    pub fn merge_fields(&mut self, other: &Record) {
        for (name, value) in other.fields() {
            if Self::is_metadata_field(name) {
                continue;
            }
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Computes the record's identity from its model's declared key.
    ///
    /// Key field values are rendered as strings and joined with
    /// [`PRIMARY_KEY_SEPARATOR`]. A missing key field is an error;
    /// identity is never guessed.
    pub fn identifier(&self, definition: &ModelDefinition) -> ModelResult<String> {
        let mut parts = Vec::with_capacity(definition.primary_key.len());
        for key_field in &definition.primary_key {
            let value = self
                .0
                .get(key_field)
                .filter(|v| !v.is_null())
                .ok_or_else(|| ModelError::MissingKeyField {
                    model: definition.name.clone(),
                    field: key_field.clone(),
                })?;
            parts.push(render_key_value(value));
        }
        Ok(parts.join(PRIMARY_KEY_SEPARATOR))
    }
}

/// Joins already-resolved key values into an identity string.
///
/// Produces the same identity as [`Record::identifier`] given the same
/// key values in declaration order.
pub fn join_key_values(values: &[Value]) -> String {
    values
        .iter()
        .map(render_key_value)
        .collect::<Vec<_>>()
        .join(PRIMARY_KEY_SEPARATOR)
}

/// Renders one key value without JSON string quoting.
fn render_key_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
