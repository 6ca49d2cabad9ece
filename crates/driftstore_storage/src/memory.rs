//! Plain in-memory store backend.

use crate::backend::{QueryOne, StoreBackend};
use crate::error::{StorageError, StorageResult};
use driftstore_model::Record;
use driftstore_predicate::PredicateGroup;
use parking_lot::RwLock;
use std::collections::HashMap;

/// One physical store: rows by key plus insertion order.
#[derive(Debug, Default)]
struct StoreState {
    rows: HashMap<String, Record>,
    /// Keys in insertion order. Overwrites keep the original position.
    order: Vec<String>,
}

impl StoreState {
    fn put(&mut self, key: &str, record: Record) {
        if self.rows.insert(key.to_string(), record).is_none() {
            self.order.push(key.to_string());
        }
    }

    fn delete(&mut self, key: &str) -> bool {
        if self.rows.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn all(&self) -> Vec<Record> {
        self.order
            .iter()
            .filter_map(|key| self.rows.get(key))
            .cloned()
            .collect()
    }

    fn edge(&self, edge: QueryOne) -> Option<Record> {
        let key = match edge {
            QueryOne::First => self.order.first(),
            QueryOne::Last => self.order.last(),
        }?;
        self.rows.get(key).cloned()
    }
}

/// An in-memory store backend.
///
/// Suitable for tests, ephemeral sessions, and as the row store under
/// [`super::IndexedBackend`]. Thread-safe; all state is owned by the
/// instance and discarded on `clear`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: RwLock<HashMap<String, StoreState>>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_store<T>(
        &self,
        store: &str,
        f: impl FnOnce(&StoreState) -> T,
    ) -> StorageResult<T> {
        let stores = self.stores.read();
        let state = stores.get(store).ok_or_else(|| StorageError::StoreNotFound {
            store: store.to_string(),
        })?;
        Ok(f(state))
    }

    fn with_store_mut<T>(
        &self,
        store: &str,
        f: impl FnOnce(&mut StoreState) -> T,
    ) -> StorageResult<T> {
        let mut stores = self.stores.write();
        let state = stores
            .get_mut(store)
            .ok_or_else(|| StorageError::StoreNotFound {
                store: store.to_string(),
            })?;
        Ok(f(state))
    }
}

impl StoreBackend for MemoryBackend {
    fn init(&self, store_names: &[String]) -> StorageResult<()> {
        let mut stores = self.stores.write();
        for name in store_names {
            stores.entry(name.clone()).or_default();
        }
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>> {
        self.with_store(store, |state| state.rows.get(key).cloned())
    }

    fn put(&self, store: &str, key: &str, record: Record) -> StorageResult<()> {
        self.with_store_mut(store, |state| state.put(key, record))
    }

    fn delete(&self, store: &str, key: &str) -> StorageResult<bool> {
        self.with_store_mut(store, |state| state.delete(key))
    }

    fn get_all(&self, store: &str) -> StorageResult<Vec<Record>> {
        self.with_store(store, StoreState::all)
    }

    fn get_one(&self, store: &str, edge: QueryOne) -> StorageResult<Option<Record>> {
        self.with_store(store, |state| state.edge(edge))
    }

    fn candidates(
        &self,
        _store: &str,
        _predicate: &PredicateGroup,
    ) -> StorageResult<Option<Vec<Record>>> {
        // No indexes; the adapter falls back to a filtered scan.
        Ok(None)
    }

    fn clear(&self) -> StorageResult<()> {
        self.stores.write().clear();
        Ok(())
    }
}
