//! # Driftstore Model
//!
//! Static schema metadata for Driftstore: model definitions, fields,
//! relationships, primary keys, and namespaces, plus the [`Record`]
//! value type all other crates operate on.
//!
//! Schema metadata is immutable after load and shared read-only by
//! every component. Records are JSON documents; identity is computed
//! deterministically from a model's declared key fields and is never
//! reassigned after creation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod definition;
mod error;
mod record;
mod schema;

pub use definition::{
    FieldType, ModelAssociation, ModelDefinition, ModelField, ScalarType,
};
pub use error::{ModelError, ModelResult};
pub use record::{join_key_values, Record, PRIMARY_KEY_SEPARATOR};
pub use schema::{
    store_name, Namespace, Schema, MODEL_METADATA_MODEL, MUTATION_EVENT_MODEL, SYNC_NAMESPACE,
    USER_NAMESPACE,
};
