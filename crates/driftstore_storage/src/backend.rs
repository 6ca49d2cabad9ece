//! Store backend trait definition.

use crate::error::StorageResult;
use driftstore_model::Record;
use driftstore_predicate::PredicateGroup;

/// Which edge of a store's insertion order to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOne {
    /// Oldest record by insertion order.
    First,
    /// Newest record by insertion order.
    Last,
}

/// A low-level record store backend.
///
/// Backends are keyed record stores. They persist records per store
/// under string identity keys and track physical insertion order. The
/// adapter layer owns all schema interpretation: backends do not
/// understand models, relationships, or conditions.
///
/// # Invariants
///
/// - `get_all` returns records in insertion order
/// - Overwriting an existing key keeps the key's original position
/// - `get_one` reads the insertion-order edge without a scan
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - plain in-memory store
/// - [`super::IndexedBackend`] - in-memory store with equality indexes
pub trait StoreBackend: Send + Sync {
    /// Opens the physical store and creates the named stores.
    ///
    /// Called once by the adapter during `set_up`. Fails if the
    /// underlying environment refuses to open a store.
    fn init(&self, store_names: &[String]) -> StorageResult<()>;

    /// Reads a record by key.
    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>>;

    /// Writes a record under a key, overwriting any existing value.
    fn put(&self, store: &str, key: &str, record: Record) -> StorageResult<()>;

    /// Deletes a record by key. Returns true if a record was removed.
    fn delete(&self, store: &str, key: &str) -> StorageResult<bool>;

    /// Returns all records in the store, in insertion order.
    fn get_all(&self, store: &str) -> StorageResult<Vec<Record>>;

    /// Returns the record at an insertion-order edge.
    fn get_one(&self, store: &str, edge: QueryOne) -> StorageResult<Option<Record>>;

    /// Returns an index-narrowed candidate set for a predicate, or
    /// `None` when the backend has no applicable index.
    ///
    /// Candidates are a superset of the matching records; the caller
    /// still applies the full predicate.
    fn candidates(
        &self,
        store: &str,
        predicate: &PredicateGroup,
    ) -> StorageResult<Option<Vec<Record>>>;

    /// Destroys all stores and resets internal state.
    fn clear(&self) -> StorageResult<()>;
}
