//! # Driftstore Predicate
//!
//! Filter trees and their evaluation.
//!
//! A predicate is a tree of field conditions combined by `and`/`or`/`not`
//! group nodes. Evaluation is a pure boolean function over a [`Record`]:
//! no side effects, deterministic, and safe to call concurrently from
//! any read path.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod group;
mod operator;

pub use group::{FieldPredicate, GroupType, PredicateGroup, PredicateNode};
pub use operator::FieldOperator;
