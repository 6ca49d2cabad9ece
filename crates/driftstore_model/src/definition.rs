//! Model definitions: fields, associations, and keys.

use serde::{Deserialize, Serialize};

/// Scalar field types supported by model schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    /// Opaque identifier.
    Id,
    /// UTF-8 string.
    String,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Boolean.
    Bool,
    /// ISO-8601 timestamp, stored as a string.
    DateTime,
    /// Arbitrary JSON document.
    Json,
}

/// The type of a model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// A reference to a declared enum.
    Enum(String),
    /// A reference to another model (relationship field).
    Model(String),
    /// A reference to an embedded non-model type.
    NonModel(String),
}

/// A relationship declared on a model field.
///
/// `target_names` are the foreign-key fields on the owning side that
/// carry the related record's key values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelAssociation {
    /// This model owns exactly one related record.
    HasOne {
        /// Field on the related model pointing back at this one.
        associated_with: Vec<String>,
        /// FK fields on this model holding the related key.
        target_names: Vec<String>,
    },
    /// This model owns many related records.
    HasMany {
        /// Field on the related model pointing back at this one.
        associated_with: Vec<String>,
    },
    /// This model is owned by the related record.
    BelongsTo {
        /// FK fields on this model holding the owner's key.
        target_names: Vec<String>,
    },
}

/// A single field in a model definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Whether the field is required.
    pub required: bool,
    /// Whether the field holds an array of values.
    pub is_array: bool,
    /// Relationship metadata, if this is a relationship field.
    pub association: Option<ModelAssociation>,
}

impl ModelField {
    /// Creates a required scalar field.
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Scalar(scalar),
            required: true,
            is_array: false,
            association: None,
        }
    }

    /// Creates an optional scalar field.
    pub fn optional_scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            required: false,
            ..Self::scalar(name, scalar)
        }
    }

    /// Creates a relationship field to another model.
    pub fn related(
        name: impl Into<String>,
        model: impl Into<String>,
        association: ModelAssociation,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Model(model.into()),
            required: false,
            is_array: matches!(association, ModelAssociation::HasMany { .. }),
            association: Some(association),
        }
    }
}

/// Static definition of a model: its fields, key, and sync behavior.
///
/// Immutable after schema load; shared read-only by all components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Model name, unique within a namespace.
    pub name: String,
    /// Pluralized name, used for wire-level list operations.
    pub plural_name: String,
    /// Declared fields.
    pub fields: Vec<ModelField>,
    /// Key fields, in declaration order. Defaults to `["id"]`.
    pub primary_key: Vec<String>,
    /// Whether this model participates in remote sync.
    pub syncable: bool,
}

impl ModelDefinition {
    /// Creates a definition with a single `id` key.
    pub fn new(name: impl Into<String>, fields: Vec<ModelField>) -> Self {
        let name = name.into();
        Self {
            plural_name: format!("{name}s"),
            name,
            fields,
            primary_key: vec!["id".to_string()],
            syncable: true,
        }
    }

    /// Sets a composite primary key.
    pub fn with_primary_key(mut self, key: Vec<String>) -> Self {
        self.primary_key = key;
        self
    }

    /// Marks the model as local-only.
    pub fn local_only(mut self) -> Self {
        self.syncable = false;
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the models this one depends on through BELONGS_TO edges.
    ///
    /// These are the parents that must be written before this model when
    /// persisting a relationship closure.
    pub fn belongs_to_targets(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| matches!(f.association, Some(ModelAssociation::BelongsTo { .. })))
            .filter_map(|f| match &f.field_type {
                FieldType::Model(model) => Some(model.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns relationship fields that cascade on delete.
    ///
    /// HAS_ONE and HAS_MANY children are removed with their parent;
    /// BELONGS_TO parents never are.
    pub fn cascade_fields(&self) -> impl Iterator<Item = &ModelField> {
        self.fields.iter().filter(|f| {
            matches!(
                f.association,
                Some(ModelAssociation::HasOne { .. }) | Some(ModelAssociation::HasMany { .. })
            )
        })
    }
}
