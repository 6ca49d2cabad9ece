//! # Driftstore Storage
//!
//! The storage adapter: a pluggable record persistence abstraction
//! providing CRUD, indexed queries, pagination, and cascading delete
//! over a relational-ish model graph.
//!
//! Backends are interchangeable key-value stores implementing
//! [`StoreBackend`]; the shared [`StorageAdapter`] layer owns
//! relationship traversal, conditional saves, query strategy selection,
//! the change feed, and the exclusive-execution entry point every
//! compound mutation sequence must go through.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod backend;
mod changes;
mod error;
mod indexed;
mod memory;

pub use adapter::{Pagination, SortDirection, SortPredicate, StorageAdapter, WriteOrigin};
pub use backend::{QueryOne, StoreBackend};
pub use changes::{ChangeFeed, OpType, StorageChange};
pub use error::{StorageError, StorageResult};
pub use indexed::IndexedBackend;
pub use memory::MemoryBackend;
