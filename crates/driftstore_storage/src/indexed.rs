//! Store backend with secondary equality indexes.

use crate::backend::{QueryOne, StoreBackend};
use crate::error::StorageResult;
use crate::memory::MemoryBackend;
use driftstore_model::Record;
use driftstore_predicate::{FieldOperator, GroupType, PredicateGroup, PredicateNode};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Field-value to key-set mapping for one indexed field.
type FieldIndex = HashMap<String, HashSet<String>>;

/// A store backend with per-field equality indexes.
///
/// Rows live in an inner [`MemoryBackend`]; this layer maintains
/// `field value -> key set` indexes for the fields declared with
/// [`IndexedBackend::with_index`] and answers `candidates` for
/// predicates containing an equality condition on an indexed field.
///
/// Index state is owned by the instance and rebuilt through normal
/// writes; `clear` discards it along with the rows.
pub struct IndexedBackend {
    rows: MemoryBackend,
    /// Declared indexed fields per store.
    indexed_fields: HashMap<String, Vec<String>>,
    /// store -> field -> rendered value -> keys.
    indexes: RwLock<HashMap<String, HashMap<String, FieldIndex>>>,
}

impl IndexedBackend {
    /// Creates a backend with no declared indexes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: MemoryBackend::new(),
            indexed_fields: HashMap::new(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Declares an equality index on `field` of `store`.
    ///
    /// Must be called before `init`.
    #[must_use]
    pub fn with_index(mut self, store: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexed_fields
            .entry(store.into())
            .or_default()
            .push(field.into());
        self
    }

    fn render(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn unindex(&self, store: &str, key: &str, record: &Record) {
        let Some(fields) = self.indexed_fields.get(store) else {
            return;
        };
        let mut indexes = self.indexes.write();
        let Some(store_indexes) = indexes.get_mut(store) else {
            return;
        };
        for field in fields {
            if let Some(value) = record.get(field) {
                if let Some(keys) = store_indexes
                    .get_mut(field)
                    .and_then(|idx| idx.get_mut(&Self::render(value)))
                {
                    keys.remove(key);
                }
            }
        }
    }

    fn index(&self, store: &str, key: &str, record: &Record) {
        let Some(fields) = self.indexed_fields.get(store) else {
            return;
        };
        let mut indexes = self.indexes.write();
        let store_indexes = indexes.entry(store.to_string()).or_default();
        for field in fields {
            if let Some(value) = record.get(field) {
                store_indexes
                    .entry(field.clone())
                    .or_default()
                    .entry(Self::render(value))
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    /// Finds an equality condition on an indexed field in a top-level
    /// `and` group.
    fn indexed_equality<'p>(
        &self,
        store: &str,
        predicate: &'p PredicateGroup,
    ) -> Option<(&'p str, &'p Value)> {
        if predicate.group_type != GroupType::And {
            return None;
        }
        let fields = self.indexed_fields.get(store)?;
        predicate.predicates.iter().find_map(|node| match node {
            PredicateNode::Field(leaf) if fields.contains(&leaf.field) => match &leaf.operator {
                FieldOperator::Eq(value) => Some((leaf.field.as_str(), value)),
                _ => None,
            },
            _ => None,
        })
    }
}

impl Default for IndexedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for IndexedBackend {
    fn init(&self, store_names: &[String]) -> StorageResult<()> {
        self.rows.init(store_names)
    }

    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>> {
        self.rows.get(store, key)
    }

    fn put(&self, store: &str, key: &str, record: Record) -> StorageResult<()> {
        if let Some(previous) = self.rows.get(store, key)? {
            self.unindex(store, key, &previous);
        }
        self.index(store, key, &record);
        self.rows.put(store, key, record)
    }

    fn delete(&self, store: &str, key: &str) -> StorageResult<bool> {
        if let Some(previous) = self.rows.get(store, key)? {
            self.unindex(store, key, &previous);
        }
        self.rows.delete(store, key)
    }

    fn get_all(&self, store: &str) -> StorageResult<Vec<Record>> {
        self.rows.get_all(store)
    }

    fn get_one(&self, store: &str, edge: QueryOne) -> StorageResult<Option<Record>> {
        self.rows.get_one(store, edge)
    }

    fn candidates(
        &self,
        store: &str,
        predicate: &PredicateGroup,
    ) -> StorageResult<Option<Vec<Record>>> {
        let Some((field, value)) = self.indexed_equality(store, predicate) else {
            return Ok(None);
        };

        let keys: Vec<String> = {
            let indexes = self.indexes.read();
            indexes
                .get(store)
                .and_then(|s| s.get(field))
                .and_then(|idx| idx.get(&Self::render(value)))
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.rows.get(store, &key)? {
                records.push(record);
            }
        }
        Ok(Some(records))
    }

    fn clear(&self) -> StorageResult<()> {
        self.indexes.write().clear();
        self.rows.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> IndexedBackend {
        let b = IndexedBackend::new().with_index("user_Comment", "postId");
        b.init(&["user_Comment".to_string()]).unwrap();
        b
    }

    fn comment(id: &str, post_id: &str) -> Record {
        Record::from_value(json!({"id": id, "postId": post_id})).unwrap()
    }

    #[test]
    fn candidates_narrow_by_index() {
        let b = backend();
        b.put("user_Comment", "c1", comment("c1", "p1")).unwrap();
        b.put("user_Comment", "c2", comment("c2", "p1")).unwrap();
        b.put("user_Comment", "c3", comment("c3", "p2")).unwrap();

        let predicate = PredicateGroup::field_eq("postId", json!("p1"));
        let candidates = b.candidates("user_Comment", &predicate).unwrap().unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates
            .iter()
            .all(|r| r.get("postId") == Some(&json!("p1"))));
    }

    #[test]
    fn candidates_none_without_applicable_index() {
        let b = backend();
        let predicate = PredicateGroup::field_eq("author", json!("x"));
        assert!(b.candidates("user_Comment", &predicate).unwrap().is_none());
    }

    #[test]
    fn overwrite_moves_index_entry() {
        let b = backend();
        b.put("user_Comment", "c1", comment("c1", "p1")).unwrap();
        b.put("user_Comment", "c1", comment("c1", "p2")).unwrap();

        let old = b
            .candidates("user_Comment", &PredicateGroup::field_eq("postId", json!("p1")))
            .unwrap()
            .unwrap();
        assert!(old.is_empty());

        let new = b
            .candidates("user_Comment", &PredicateGroup::field_eq("postId", json!("p2")))
            .unwrap()
            .unwrap();
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn delete_removes_index_entry() {
        let b = backend();
        b.put("user_Comment", "c1", comment("c1", "p1")).unwrap();
        b.delete("user_Comment", "c1").unwrap();

        let remaining = b
            .candidates("user_Comment", &PredicateGroup::field_eq("postId", json!("p1")))
            .unwrap()
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn clear_resets_indexes() {
        let b = backend();
        b.put("user_Comment", "c1", comment("c1", "p1")).unwrap();
        b.clear().unwrap();
        assert!(b.indexes.read().is_empty());
    }
}
