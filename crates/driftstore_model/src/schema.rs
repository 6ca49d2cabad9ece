//! Namespaces, schemas, and model ordering.

use crate::definition::ModelDefinition;
use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Namespace holding user-defined application models.
pub const USER_NAMESPACE: &str = "user";

/// Reserved namespace holding internal sync bookkeeping stores.
pub const SYNC_NAMESPACE: &str = "sync";

/// Internal model name for persisted outbox rows.
pub const MUTATION_EVENT_MODEL: &str = "MutationEvent";

/// Internal model name for per-model sync cursors.
pub const MODEL_METADATA_MODEL: &str = "ModelMetadata";

/// Returns the physical store name for a `(namespace, model)` pair.
pub fn store_name(namespace: &str, model: &str) -> String {
    format!("{namespace}_{model}")
}

/// A named group of model definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Models by name. BTreeMap keeps iteration deterministic.
    pub models: BTreeMap<String, ModelDefinition>,
    /// Declared enum types by name, with their allowed values.
    pub enums: BTreeMap<String, Vec<String>>,
    /// Embedded non-model type names.
    pub non_models: BTreeSet<String>,
}

impl Namespace {
    /// Creates a namespace from a list of model definitions.
    pub fn new(name: impl Into<String>, models: Vec<ModelDefinition>) -> Self {
        Self {
            name: name.into(),
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
            enums: BTreeMap::new(),
            non_models: BTreeSet::new(),
        }
    }

    /// Looks up a model definition.
    pub fn model(&self, name: &str) -> ModelResult<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| ModelError::model_not_found(name))
    }

    /// Returns the syncable models in topological order.
    pub fn syncable_models(&self) -> ModelResult<Vec<&ModelDefinition>> {
        Ok(self
            .topological_ordering()?
            .into_iter()
            .filter_map(|name| self.models.get(&name))
            .filter(|def| def.syncable)
            .collect())
    }

    /// Computes a deterministic dependency ordering of the models.
    ///
    /// A model's BELONGS_TO targets sort before it, so FK-bearing
    /// subordinate records can always be written after the rows they
    /// reference. Ties break alphabetically.
    pub fn topological_ordering(&self) -> ModelResult<Vec<String>> {
        let mut ordered = Vec::with_capacity(self.models.len());
        let mut visited = BTreeSet::new();
        let mut in_progress = BTreeSet::new();

        for name in self.models.keys() {
            self.visit(name, &mut visited, &mut in_progress, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
        in_progress: &mut BTreeSet<String>,
        ordered: &mut Vec<String>,
    ) -> ModelResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if !in_progress.insert(name.to_string()) {
            return Err(ModelError::CyclicDependency {
                model: name.to_string(),
            });
        }

        if let Some(def) = self.models.get(name) {
            for parent in def.belongs_to_targets() {
                // Unknown targets are tolerated; schema validation is upstream.
                if self.models.contains_key(parent) {
                    self.visit(parent, visited, in_progress, ordered)?;
                }
            }
            ordered.push(name.to_string());
        }

        in_progress.remove(name);
        visited.insert(name.to_string());
        Ok(())
    }

    /// Returns the physical store names for every model in this namespace.
    pub fn store_names(&self) -> Vec<String> {
        self.models
            .keys()
            .map(|model| store_name(&self.name, model))
            .collect()
    }
}

/// A validated, immutable schema: the full namespace map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Namespaces by name.
    pub namespaces: BTreeMap<String, Namespace>,
}

impl Schema {
    /// Builds a schema from user models, adding the reserved sync
    /// namespace with its two internal stores.
    pub fn new(user_models: Vec<ModelDefinition>) -> Self {
        let user = Namespace::new(USER_NAMESPACE, user_models);
        let sync = Namespace::new(
            SYNC_NAMESPACE,
            vec![
                ModelDefinition::new(MUTATION_EVENT_MODEL, Vec::new()).local_only(),
                ModelDefinition::new(MODEL_METADATA_MODEL, Vec::new()).local_only(),
            ],
        );

        let mut namespaces = BTreeMap::new();
        namespaces.insert(user.name.clone(), user);
        namespaces.insert(sync.name.clone(), sync);
        Self { namespaces }
    }

    /// Looks up a namespace.
    pub fn namespace(&self, name: &str) -> ModelResult<&Namespace> {
        self.namespaces
            .get(name)
            .ok_or_else(|| ModelError::NamespaceNotFound {
                name: name.to_string(),
            })
    }

    /// The user namespace.
    pub fn user(&self) -> &Namespace {
        &self.namespaces[USER_NAMESPACE]
    }

    /// Looks up a model in the user namespace.
    pub fn user_model(&self, name: &str) -> ModelResult<&ModelDefinition> {
        self.user().model(name)
    }

    /// All physical store names across every namespace.
    pub fn store_names(&self) -> Vec<String> {
        self.namespaces
            .values()
            .flat_map(Namespace::store_names)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ModelAssociation, ModelField, ScalarType};

    fn blog_schema() -> Schema {
        let post = ModelDefinition::new(
            "Post",
            vec![
                ModelField::scalar("id", ScalarType::Id),
                ModelField::scalar("title", ScalarType::String),
                ModelField::related(
                    "comments",
                    "Comment",
                    ModelAssociation::HasMany {
                        associated_with: vec!["postId".into()],
                    },
                ),
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
        Schema::new(vec![post, comment])
    }

    #[test]
    fn schema_includes_sync_namespace() {
        let schema = blog_schema();
        let sync = schema.namespace(SYNC_NAMESPACE).unwrap();
        assert!(sync.models.contains_key(MUTATION_EVENT_MODEL));
        assert!(sync.models.contains_key(MODEL_METADATA_MODEL));
        assert!(!sync.models[MUTATION_EVENT_MODEL].syncable);
    }

    #[test]
    fn topological_ordering_puts_parents_first() {
        let schema = blog_schema();
        let order = schema.user().topological_ordering().unwrap();
        let post_pos = order.iter().position(|m| m == "Post").unwrap();
        let comment_pos = order.iter().position(|m| m == "Comment").unwrap();
        assert!(post_pos < comment_pos);
    }

    #[test]
    fn cyclic_dependency_detected() {
        let a = ModelDefinition::new(
            "A",
            vec![ModelField::related(
                "b",
                "B",
                ModelAssociation::BelongsTo {
                    target_names: vec!["bId".into()],
                },
            )],
        );
        let b = ModelDefinition::new(
            "B",
            vec![ModelField::related(
                "a",
                "A",
                ModelAssociation::BelongsTo {
                    target_names: vec!["aId".into()],
                },
            )],
        );
        let ns = Namespace::new("user", vec![a, b]);
        assert!(matches!(
            ns.topological_ordering(),
            Err(ModelError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn store_names_cover_all_namespaces() {
        let schema = blog_schema();
        let names = schema.store_names();
        assert!(names.contains(&"user_Post".to_string()));
        assert!(names.contains(&"sync_MutationEvent".to_string()));
        assert!(names.contains(&"sync_ModelMetadata".to_string()));
    }

    #[test]
    fn syncable_models_filter() {
        let mut schema = blog_schema();
        let draft = ModelDefinition::new(
            "Draft",
            vec![ModelField::scalar("id", ScalarType::Id)],
        )
        .local_only();
        schema
            .namespaces
            .get_mut(USER_NAMESPACE)
            .unwrap()
            .models
            .insert(draft.name.clone(), draft);

        let syncable = schema.user().syncable_models().unwrap();
        assert!(syncable.iter().all(|m| m.name != "Draft"));
    }
}
