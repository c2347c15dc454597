//! Core types and traits for ormgraph.
//!
//! This crate provides the foundational abstractions shared by the
//! derive macro and the session engines:
//!
//! - `Entity` trait and `ModelDescriptor` for struct-to-table mapping
//! - `EntityState` change tracking and the per-graph entity cache
//! - `Related` / `RelatedMany` relation slots and type-erased `EntityHandle`s
//! - relationship discovery (`Discoverer`, `Relation`) and the `Schema` registry
//! - the synchronous `Storage` collaborator plus an in-memory implementation

pub mod error;
pub mod field;
pub mod handle;
pub mod identity_map;
pub mod model;
pub mod naming;
pub mod related;
pub mod relationship;
pub mod row;
pub mod schema;
pub mod state;
pub mod storage;
pub mod types;
pub mod validate;
pub mod value;

#[cfg(test)]
mod test_support;

pub use error::{
    Error, FieldValidationError, GraphError, GraphErrorKind, RelationshipError,
    RelationshipErrorKind, Result, StorageError, StorageErrorKind, TypeError, ValidationError,
    ValidationErrorKind,
};
pub use field::{PropertyDescriptor, PropertyKind, TimestampRole};
pub use handle::{DynEntity, EntityHandle, EntityKey, Link, Shared, WeakHandle, share};
pub use identity_map::GraphRef;
pub use model::{Entity, EntityHooks, Hook, ModelDescriptor};
pub use related::{Related, RelatedMany, RelationSlot};
pub use relationship::{Discoverer, ForeignKey, Pivot, Relation, RelationKind, Relations, Side};
pub use row::{FromValue, Row};
pub use schema::{ModelEntry, Schema, SchemaBuilder};
pub use state::{EntityState, LinkSnapshot};
pub use storage::{MemoryStorage, Predicate, Statement, Storage};
pub use types::SqlType;
pub use validate::validate_entity;
pub use value::Value;
