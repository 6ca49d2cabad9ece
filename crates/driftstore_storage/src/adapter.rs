//! The shared storage adapter layer.
//!
//! Owns everything the backends do not: schema resolution, relationship
//! traversal, conditional saves, query strategy selection, cascading
//! delete, pagination, the change feed, and the exclusive-execution
//! entry point.

use crate::backend::{QueryOne, StoreBackend};
use crate::changes::{ChangeFeed, OpType, StorageChange};
use crate::error::{StorageError, StorageResult};
use driftstore_model::{
    join_key_values, FieldType, ModelAssociation, ModelDefinition, Namespace, Record, Schema,
};
use driftstore_predicate::PredicateGroup;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Whether a write originated from local application code or from the
/// sync engine reconciling remote state.
///
/// The engine subscribes to the change feed and only enqueues
/// locally-originated writes into the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A local application write.
    Local,
    /// A write performed by the sync engine (merge of remote state).
    Sync,
}

/// Sort direction for query pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
}

/// A single sort key.
#[derive(Debug, Clone)]
pub struct SortPredicate {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// Pagination and sorting for queries.
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    /// Zero-based page number.
    pub page: usize,
    /// Page size. Zero means no limit.
    pub limit: usize,
    /// Sort keys applied before paging.
    pub sort: Vec<SortPredicate>,
}

/// One record scheduled for writing during a save traversal.
struct ClosureItem {
    model: String,
    record: Record,
    identity: String,
    is_root: bool,
}

/// The storage adapter.
///
/// Generic over any [`StoreBackend`]; all relationship and condition
/// logic lives here so the two backends stay interchangeable.
pub struct StorageAdapter {
    backend: Arc<dyn StoreBackend>,
    schema: RwLock<Option<Arc<Schema>>>,
    feed: ChangeFeed,
    /// Serializes compound mutation sequences (see [`Self::run_exclusive`]).
    exclusive: Mutex<()>,
    /// Serializes initialization so concurrent `set_up` callers observe
    /// the first caller's outcome.
    init: Mutex<()>,
}

impl StorageAdapter {
    /// Creates an adapter over a backend. Call [`Self::set_up`] before use.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            schema: RwLock::new(None),
            feed: ChangeFeed::new(),
            exclusive: Mutex::new(()),
            init: Mutex::new(()),
        }
    }

    /// Initializes the physical stores for a schema.
    ///
    /// Idempotent: the first caller performs initialization; concurrent
    /// callers block on it and then observe the initialized state. An
    /// initialization failure propagates and leaves the adapter
    /// unusable.
    pub fn set_up(&self, schema: Schema) -> StorageResult<()> {
        let _guard = self.init.lock();
        if self.schema.read().is_some() {
            return Ok(());
        }

        self.backend
            .init(&schema.store_names())
            .map_err(|e| StorageError::initialization_failed(e.to_string()))?;
        *self.schema.write() = Some(Arc::new(schema));
        Ok(())
    }

    /// Returns the loaded schema.
    pub fn schema(&self) -> StorageResult<Arc<Schema>> {
        self.schema
            .read()
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    /// Runs `f` under the adapter's mutual-exclusion discipline.
    ///
    /// Compound sequences that must be atomic with respect to each
    /// other (outbox peek-then-dequeue, merge check-then-write) all go
    /// through here; no component bypasses it. Generic over the error
    /// type so callers layering their own errors over storage can use
    /// `?` inside the closure.
    pub fn run_exclusive<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E> {
        let _guard = self.exclusive.lock();
        f(self)
    }

    /// Subscribes to the change feed.
    pub fn observe(&self) -> Receiver<StorageChange> {
        self.feed.subscribe()
    }

    /// Saves a record, upserting any subordinate relationship records
    /// its closure touches, in dependency order.
    ///
    /// If `condition` is supplied, the currently-persisted root must
    /// exist and match it; otherwise nothing is written and a
    /// condition-check error is returned.
    ///
    /// Returns the written records with their operation classification.
    pub fn save(
        &self,
        model: &str,
        record: Record,
        condition: Option<&PredicateGroup>,
        origin: WriteOrigin,
    ) -> StorageResult<Vec<(Record, OpType)>> {
        let schema = self.schema()?;
        let (namespace, definition) = resolve(&schema, model)?;
        let root_identity = record.identifier(definition)?;

        // Condition gates the root and is checked before any write.
        if let Some(condition) = condition {
            let store = driftstore_model::store_name(&namespace.name, model);
            let persisted = self.backend.get(&store, &root_identity)?;
            let matches = persisted.as_ref().is_some_and(|p| condition.evaluate(p));
            if !matches {
                return Err(StorageError::condition_check_failed(model, root_identity));
            }
        }

        let closure = traverse_closure(namespace, definition, record)?;
        let root_missing = !closure
            .iter()
            .any(|item| item.is_root && item.identity == root_identity);
        if root_missing {
            return Err(StorageError::invalid_operation(format!(
                "root record {root_identity} not present in its traversal closure"
            )));
        }

        let mut results = Vec::new();
        for item in closure {
            let store = driftstore_model::store_name(&namespace.name, &item.model);
            let existing = self.backend.get(&store, &item.identity)?;
            let op_type = if existing.is_some() {
                OpType::Update
            } else {
                OpType::Insert
            };

            // Subordinate records are only created, never clobbered by
            // the stale snapshot embedded in the root.
            if !item.is_root && op_type == OpType::Update {
                continue;
            }

            self.backend.put(&store, &item.identity, item.record.clone())?;
            self.feed.emit(StorageChange {
                op_type,
                namespace: namespace.name.clone(),
                model: item.model.clone(),
                record: item.record.clone(),
                previous: existing,
                origin,
                condition: if item.is_root {
                    condition.cloned()
                } else {
                    None
                },
            });
            results.push((item.record, op_type));
        }
        Ok(results)
    }

    /// Queries records for a model.
    ///
    /// Resolution strategies in priority order: direct key lookup when
    /// the predicate fully pins every key field, index-accelerated or
    /// filtered scan, then full scan with in-memory sort/pagination.
    pub fn query(
        &self,
        model: &str,
        predicate: Option<&PredicateGroup>,
        pagination: Option<&Pagination>,
    ) -> StorageResult<Vec<Record>> {
        let schema = self.schema()?;
        let (namespace, definition) = resolve(&schema, model)?;
        let store = driftstore_model::store_name(&namespace.name, model);

        let records = match predicate {
            Some(predicate) => {
                if let Some(key_values) = predicate.key_values_if_fully_pinned(definition) {
                    let identity = join_key_values(&key_values);
                    self.backend.get(&store, &identity)?.into_iter().collect()
                } else if let Some(candidates) = self.backend.candidates(&store, predicate)? {
                    candidates
                        .into_iter()
                        .filter(|r| predicate.evaluate(r))
                        .collect()
                } else {
                    self.backend
                        .get_all(&store)?
                        .into_iter()
                        .filter(|r| predicate.evaluate(r))
                        .collect()
                }
            }
            None => self.backend.get_all(&store)?,
        };

        Ok(match pagination {
            Some(pagination) => paginate(records, pagination),
            None => records,
        })
    }

    /// Returns the record at an insertion-order edge of a model's store.
    pub fn query_one(&self, model: &str, edge: QueryOne) -> StorageResult<Option<Record>> {
        let schema = self.schema()?;
        let (namespace, _) = resolve(&schema, model)?;
        let store = driftstore_model::store_name(&namespace.name, model);
        self.backend.get_one(&store, edge)
    }

    /// Bulk save. `_deleted`-flagged items are deleted instead of
    /// saved. Returns per-item classification.
    pub fn batch_save(
        &self,
        model: &str,
        items: Vec<Record>,
        origin: WriteOrigin,
    ) -> StorageResult<Vec<(Record, OpType)>> {
        let schema = self.schema()?;
        let (namespace, definition) = resolve(&schema, model)?;
        let store = driftstore_model::store_name(&namespace.name, model);

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let identity = item.identifier(definition)?;
            if item.is_deleted() {
                let previous = self.backend.get(&store, &identity)?;
                if self.backend.delete(&store, &identity)? {
                    self.feed.emit(StorageChange {
                        op_type: OpType::Delete,
                        namespace: namespace.name.clone(),
                        model: model.to_string(),
                        record: item.clone(),
                        previous,
                        origin,
                        condition: None,
                    });
                }
                results.push((item, OpType::Delete));
            } else {
                let existing = self.backend.get(&store, &identity)?;
                let op_type = if existing.is_some() {
                    OpType::Update
                } else {
                    OpType::Insert
                };
                self.backend.put(&store, &identity, item.clone())?;
                self.feed.emit(StorageChange {
                    op_type,
                    namespace: namespace.name.clone(),
                    model: model.to_string(),
                    record: item.clone(),
                    previous: existing,
                    origin,
                    condition: None,
                });
                results.push((item, op_type));
            }
        }
        Ok(results)
    }

    /// Deletes records matching a predicate, cascading through HAS_ONE
    /// and HAS_MANY relationships (never BELONGS_TO) before the roots.
    ///
    /// `condition` gates only the matched roots; on a condition failure
    /// nothing is deleted. Returns the matched roots and everything
    /// actually deleted.
    pub fn delete(
        &self,
        model: &str,
        predicate: Option<&PredicateGroup>,
        condition: Option<&PredicateGroup>,
        origin: WriteOrigin,
    ) -> StorageResult<(Vec<Record>, Vec<Record>)> {
        let schema = self.schema()?;
        let (namespace, definition) = resolve(&schema, model)?;

        let roots = self.query(model, predicate, None)?;
        if let Some(condition) = condition {
            for root in &roots {
                if !condition.evaluate(root) {
                    let id = root.identifier(definition)?;
                    return Err(StorageError::condition_check_failed(model, id));
                }
            }
        }

        // Children first, each root last (post-order per root).
        let mut queue: Vec<(String, Record)> = Vec::new();
        for root in &roots {
            self.collect_cascade(namespace, definition, root, &mut queue)?;
            queue.push((model.to_string(), root.clone()));
        }

        let mut deleted = Vec::new();
        for (item_model, item) in queue {
            let item_def = namespace.model(&item_model)?;
            let identity = item.identifier(item_def)?;
            let store = driftstore_model::store_name(&namespace.name, &item_model);
            if self.backend.delete(&store, &identity)? {
                self.feed.emit(StorageChange {
                    op_type: OpType::Delete,
                    namespace: namespace.name.clone(),
                    model: item_model,
                    record: item.clone(),
                    previous: Some(item.clone()),
                    origin,
                    condition: None,
                });
                deleted.push(item);
            }
        }
        Ok((roots, deleted))
    }

    /// Deletes one record by its identity.
    pub fn delete_record(
        &self,
        model: &str,
        record: &Record,
        condition: Option<&PredicateGroup>,
        origin: WriteOrigin,
    ) -> StorageResult<(Vec<Record>, Vec<Record>)> {
        let schema = self.schema()?;
        let (_, definition) = resolve(&schema, model)?;
        let predicate = key_predicate(definition, record)?;
        self.delete(model, Some(&predicate), condition, origin)
    }

    /// Destroys all persisted state and resets the adapter.
    ///
    /// Safe to call whenever no exclusive sequence is running; a
    /// subsequent `set_up` is required before further use.
    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.init.lock();
        self.backend.clear()?;
        *self.schema.write() = None;
        Ok(())
    }

    /// Collects the cascade closure of `root` into `queue`, deepest first.
    fn collect_cascade(
        &self,
        namespace: &Namespace,
        definition: &ModelDefinition,
        root: &Record,
        queue: &mut Vec<(String, Record)>,
    ) -> StorageResult<()> {
        for field in definition.cascade_fields() {
            let FieldType::Model(child_model) = &field.field_type else {
                continue;
            };
            let child_def = namespace.model(child_model)?;
            let children = match &field.association {
                Some(ModelAssociation::HasMany { associated_with }) => {
                    let root_keys = key_values(definition, root)?;
                    let predicate = fk_predicate(associated_with, &root_keys);
                    self.query(child_model, Some(&predicate), None)?
                }
                Some(ModelAssociation::HasOne { target_names, .. }) => {
                    let mut values = Vec::with_capacity(target_names.len());
                    for target in target_names {
                        match root.get(target) {
                            Some(v) if !v.is_null() => values.push(v.clone()),
                            _ => break,
                        }
                    }
                    if values.len() != target_names.len() {
                        Vec::new()
                    } else {
                        let identity = join_key_values(&values);
                        let store =
                            driftstore_model::store_name(&namespace.name, child_model);
                        self.backend.get(&store, &identity)?.into_iter().collect()
                    }
                }
                _ => Vec::new(),
            };

            for child in children {
                self.collect_cascade(namespace, child_def, &child, queue)?;
                queue.push((child_model.clone(), child));
            }
        }
        Ok(())
    }
}

/// Finds the namespace owning `model` and its definition.
fn resolve<'s>(
    schema: &'s Schema,
    model: &str,
) -> StorageResult<(&'s Namespace, &'s ModelDefinition)> {
    for namespace in schema.namespaces.values() {
        if let Some(definition) = namespace.models.get(model) {
            return Ok((namespace, definition));
        }
    }
    Err(driftstore_model::ModelError::model_not_found(model).into())
}

/// The record's key values in declaration order.
fn key_values(definition: &ModelDefinition, record: &Record) -> StorageResult<Vec<Value>> {
    definition
        .primary_key
        .iter()
        .map(|key| {
            record
                .get(key)
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| {
                    driftstore_model::ModelError::MissingKeyField {
                        model: definition.name.clone(),
                        field: key.clone(),
                    }
                    .into()
                })
        })
        .collect()
}

/// An equality predicate pinning every key field of `record`.
fn key_predicate(definition: &ModelDefinition, record: &Record) -> StorageResult<PredicateGroup> {
    let values = key_values(definition, record)?;
    Ok(fk_predicate(&definition.primary_key, &values))
}

/// An `and` group of equality conditions over field/value pairs.
fn fk_predicate(fields: &[String], values: &[Value]) -> PredicateGroup {
    let conditions = fields
        .iter()
        .zip(values)
        .map(|(field, value)| driftstore_predicate::FieldPredicate {
            field: field.clone(),
            operator: driftstore_predicate::FieldOperator::Eq(value.clone()),
        })
        .collect();
    PredicateGroup::all(conditions)
}

/// Resolves the relationship closure of a record in dependency order.
///
/// Nested relationship objects are lifted out of the root: BELONGS_TO
/// and HAS_ONE objects become FK values on the owning side, HAS_MANY
/// arrays become FK values on each child. The returned items are sorted
/// by the namespace's topological ordering so FK-bearing rows are
/// written after the rows they reference.
fn traverse_closure(
    namespace: &Namespace,
    definition: &ModelDefinition,
    record: Record,
) -> StorageResult<Vec<ClosureItem>> {
    let ordering = namespace.topological_ordering()?;
    let mut items = Vec::new();
    traverse_into(namespace, definition, record, true, &mut items)?;

    let position = |model: &str| {
        ordering
            .iter()
            .position(|m| m == model)
            .unwrap_or(usize::MAX)
    };
    items.sort_by_key(|item| position(&item.model));
    Ok(items)
}

fn traverse_into(
    namespace: &Namespace,
    definition: &ModelDefinition,
    mut record: Record,
    is_root: bool,
    items: &mut Vec<ClosureItem>,
) -> StorageResult<()> {
    let mut nested_children: Vec<(String, Vec<Record>)> = Vec::new();

    for field in &definition.fields {
        let Some(association) = &field.association else {
            continue;
        };
        let FieldType::Model(related_model) = &field.field_type else {
            continue;
        };

        match association {
            ModelAssociation::BelongsTo { target_names }
            | ModelAssociation::HasOne { target_names, .. } => {
                let Some(Value::Object(map)) = record.remove(&field.name) else {
                    continue;
                };
                let related = Record::from_map(map);
                let related_def = namespace.model(related_model)?;
                let related_keys = key_values(related_def, &related)?;
                for (target, value) in target_names.iter().zip(related_keys) {
                    record.set(target.clone(), value);
                }
                traverse_into(namespace, related_def, related, false, items)?;
            }
            ModelAssociation::HasMany { associated_with } => {
                let Some(Value::Array(children)) = record.remove(&field.name) else {
                    continue;
                };
                let root_keys = key_values(definition, &record)?;
                let mut resolved = Vec::with_capacity(children.len());
                for child in children {
                    let Value::Object(map) = child else {
                        continue;
                    };
                    let mut child_record = Record::from_map(map);
                    for (fk, value) in associated_with.iter().zip(&root_keys) {
                        child_record.set(fk.clone(), value.clone());
                    }
                    resolved.push(child_record);
                }
                nested_children.push((related_model.clone(), resolved));
            }
        }
    }

    let identity = record.identifier(definition)?;
    items.push(ClosureItem {
        model: definition.name.clone(),
        record,
        identity,
        is_root,
    });

    for (child_model, children) in nested_children {
        let child_def = namespace.model(&child_model)?;
        for child in children {
            traverse_into(namespace, child_def, child, false, items)?;
        }
    }
    Ok(())
}

/// Applies in-memory sorting and paging.
fn paginate(mut records: Vec<Record>, pagination: &Pagination) -> Vec<Record> {
    for sort in pagination.sort.iter().rev() {
        records.sort_by(|a, b| {
            let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }

    if pagination.limit == 0 {
        return records;
    }
    records
        .into_iter()
        .skip(pagination.page * pagination.limit)
        .take(pagination.limit)
        .collect()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
