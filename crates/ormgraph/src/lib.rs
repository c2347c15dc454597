//! ormgraph - object graph persistence driven by naming conventions.
//!
//! ormgraph maps plain structs to tables and persists whole graphs of
//! related entities:
//!
//! - Relationships are discovered from property shapes, not declared
//! - Saving walks the live graph, breaking cycles and writing each entity once
//! - Merging folds a detached, partially edited graph into a persisted one
//! - Unloaded relations resolve lazily through a per-graph entity cache
//!
//! # Quick Start
//!
//! ```ignore
//! use ormgraph::prelude::*;
//!
//! #[derive(Entity, Debug, Default)]
//! struct User {
//!     id: i64,
//!     #[entity(required)]
//!     name: String,
//!     cars: RelatedMany<Car>,
//!     state: EntityState,
//! }
//!
//! #[derive(Entity, Debug, Default)]
//! struct Car {
//!     id: i64,
//!     model: String,
//!     user: Related<User>,
//!     state: EntityState,
//! }
//!
//! fn main() -> Result<()> {
//!     let schema = Schema::builder().model::<User>().model::<Car>().build()?;
//!     let db = Database::in_memory(schema);
//!
//!     // Build a graph; the cycle user -> car -> user is fine
//!     let user = share(User { name: "Ada".into(), ..User::default() });
//!     let car = share(Car { model: "T".into(), ..Car::default() });
//!     user.borrow_mut().set_cars(vec![car.clone()]);
//!     car.borrow_mut().set_user(Some(user.clone()));
//!
//!     // One insert per entity, the key column is filled in
//!     db.save(&user)?;
//!
//!     // Lazy loading through a fresh graph
//!     let loaded = db.find::<User>(1)?.unwrap();
//!     let cars = db.load_many::<User, Car>(&loaded, "cars")?;
//!     assert_eq!(cars.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Explicit context**: a [`Database`] value carries storage, schema and
//!   configuration; there is no global state
//! - **Pluggable storage**: anything implementing [`Storage`] can back a
//!   database; [`MemoryStorage`] ships for tests
//! - **Lifecycle hooks**: `before_*` hooks can stop a save or delete
//! - **Validation**: declared constraints are checked before any write

pub use ormgraph_core::{
    // Entity model
    Entity,
    EntityHandle,
    EntityHooks,
    EntityState,
    // Errors
    Error,
    GraphError,
    GraphErrorKind,
    Hook,
    Link,
    LinkSnapshot,
    // Storage
    MemoryStorage,
    ModelDescriptor,
    Predicate,
    PropertyDescriptor,
    PropertyKind,
    Related,
    RelatedMany,
    // Relationships
    Relation,
    RelationKind,
    RelationshipError,
    RelationshipErrorKind,
    Relations,
    Result,
    Row,
    Schema,
    SchemaBuilder,
    Shared,
    SqlType,
    Statement,
    Storage,
    StorageError,
    StorageErrorKind,
    TimestampRole,
    ValidationError,
    ValidationErrorKind,
    Value,
    share,
};

pub use ormgraph_macros::Entity;

pub use ormgraph_session::{Database, DatabaseConfig, LinkTableOp, SaveStatus, system_clock};

/// Prelude module for convenient imports.
///
/// The derive expands to paths under `ormgraph_core`, which the prelude
/// brings into scope.
///
/// ```ignore
/// use ormgraph::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Session
        Database,
        DatabaseConfig,
        // Entity model
        Entity,
        EntityHooks,
        EntityState,
        Error,
        Hook,
        // Storage
        MemoryStorage,
        Related,
        RelatedMany,
        Result,
        SaveStatus,
        Schema,
        Shared,
        Storage,
        Value,
        share,
    };
    pub use ormgraph_core;
}

// ============================================================================
// Prelude Tests
// ============================================================================
//
// The derive must expand with nothing but the prelude in scope.

#[cfg(test)]
mod prelude_tests {
    use super::prelude::*;

    #[derive(Entity, Debug, Default)]
    #[entity(table = "crew")]
    struct Pilot {
        id: i64,
        #[entity(required, max_length = 8)]
        callsign: String,
        ships: RelatedMany<Ship>,
        state: EntityState,
    }

    #[derive(Entity, Debug, Default)]
    struct Ship {
        id: i64,
        name: String,
        pilot: Related<Pilot>,
        state: EntityState,
    }

    fn db() -> Database<MemoryStorage> {
        let schema = Schema::builder()
            .model::<Pilot>()
            .model::<Ship>()
            .build()
            .unwrap();
        Database::in_memory(schema)
    }

    #[test]
    fn derive_uses_table_override() {
        assert_eq!(Pilot::descriptor().table_name, "crew");
        assert_eq!(Ship::descriptor().table_name, "ships");
    }

    #[test]
    fn prelude_covers_a_save() {
        let db = db();
        let pilot = share(Pilot {
            callsign: "mav".to_string(),
            ..Pilot::default()
        });
        let ship = share(Ship {
            name: "hawk".to_string(),
            ..Ship::default()
        });
        pilot.borrow_mut().set_ships(vec![ship.clone()]);
        assert_eq!(db.save(&pilot).unwrap(), SaveStatus::Done);
        assert_eq!(ship.borrow().id, 1);
        let rows = db.storage().rows("ships");
        assert_eq!(rows[0].get_by_name("pilot_id"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn constraint_metadata_reaches_the_descriptor() {
        let callsign = Pilot::descriptor().property_named("callsign").unwrap();
        assert!(callsign.required);
        assert_eq!(callsign.max_length, Some(8));
    }
}
