//! Graph persistence for ormgraph.
//!
//! `ormgraph-session` is the **unit-of-work layer**. A [`Database`] pairs a
//! [`Storage`] collaborator with a discovered [`Schema`] and walks live
//! entity graphs to persist, merge, delete and lazily load them.
//!
//! # Role In The Architecture
//!
//! - **Save**: recursive, cycle-safe insert/update of an entity and
//!   everything reachable through its loaded relation slots.
//! - **Merge**: folds a detached, partially modified graph into a
//!   persisted one without writing anything.
//! - **Lazy loading**: resolves unloaded relation slots through the
//!   per-graph entity cache first and storage second, at most one query
//!   per distinct relation per graph.
//!
//! # Design Philosophy
//!
//! - **Explicit context**: the database is a value passed around, never a
//!   process-wide global.
//! - **Synchronous**: every storage call is a plain blocking call; errors
//!   propagate up the recursive walk unchanged.
//! - **Dispatch on discovered relations**: save and merge look up the
//!   [`Relation`](ormgraph_core::Relation) of each property instead of
//!   inspecting types at run time.
//!
//! # Example
//!
//! ```ignore
//! let schema = Schema::builder().model::<User>().model::<Car>().build()?;
//! let db = Database::new(MemoryStorage::new(), schema);
//!
//! let user = share(User { name: "ada".into(), ..User::default() });
//! let car = share(Car { model: "T".into(), ..Car::default() });
//! user.borrow_mut().set_cars(vec![car.clone()]);
//!
//! db.save(&user)?;
//! assert!(car.borrow().id > 0);
//! ```

pub mod change_tracker;
pub mod delete;
pub mod merge;
pub mod resolve;
pub mod save;

pub use change_tracker::{Snapshot, dirty_columns};
pub use save::LinkTableOp;

use std::cell::RefCell;
use std::rc::Rc;

use ormgraph_core::{
    Entity, EntityHandle, GraphRef, MemoryStorage, Predicate, Result, Schema, Shared, Storage,
};

// ============================================================================
// Configuration
// ============================================================================

/// Default timestamp source: microseconds since the unix epoch.
pub fn system_clock() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

/// Configuration for Database behavior.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Whether unloaded relation slots may query storage.
    pub lazy_load: bool,
    /// Whether save checks declared constraints before writing.
    pub validate_on_save: bool,
    /// Whether save maintains `created_at` / `updated_at` properties.
    pub manage_timestamps: bool,
    /// Timestamp source for managed timestamps.
    pub clock: fn() -> i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            lazy_load: true,
            validate_on_save: true,
            manage_timestamps: true,
            clock: system_clock,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn lazy_load(mut self, value: bool) -> Self {
        self.lazy_load = value;
        self
    }

    #[must_use]
    pub fn validate_on_save(mut self, value: bool) -> Self {
        self.validate_on_save = value;
        self
    }

    #[must_use]
    pub fn manage_timestamps(mut self, value: bool) -> Self {
        self.manage_timestamps = value;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }
}

/// Outcome of a save or delete that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// The operation ran to completion.
    Done,
    /// A `before_*` hook on the root entity returned `Hook::Stop`.
    Stopped,
}

impl SaveStatus {
    pub fn is_done(self) -> bool {
        self == SaveStatus::Done
    }
}

// ============================================================================
// Database
// ============================================================================

/// A storage collaborator plus the schema describing what lives in it.
pub struct Database<S: Storage> {
    storage: S,
    schema: Schema,
    config: DatabaseConfig,
}

impl<S: Storage> Database<S> {
    pub fn new(storage: S, schema: Schema) -> Self {
        Self::with_config(storage, schema, DatabaseConfig::default())
    }

    pub fn with_config(storage: S, schema: Schema, config: DatabaseConfig) -> Self {
        tracing::debug!(
            models = schema.models().count(),
            relations = schema.relations().len(),
            "Database context created"
        );
        Self {
            storage,
            schema,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Load one entity by primary key into a fresh graph.
    #[tracing::instrument(level = "debug", skip(self), fields(model = T::MODEL_NAME))]
    #[allow(clippy::result_large_err)]
    pub fn find<T: Entity>(&self, id: i64) -> Result<Option<Shared<T>>> {
        if id <= 0 {
            return Ok(None);
        }
        let descriptor = T::descriptor();
        let rows = self
            .storage
            .select_rows(&descriptor.table_name, &Predicate::eq(descriptor.primary_key, id))?;
        let Some(row) = rows.first() else {
            tracing::debug!(id, "Row not found");
            return Ok(None);
        };
        let graph = GraphRef::new();
        Ok(Some(attach(&graph, T::from_row(row)?)))
    }

    /// Load every row of `T`; all results share one graph.
    #[tracing::instrument(level = "debug", skip(self), fields(model = T::MODEL_NAME))]
    #[allow(clippy::result_large_err)]
    pub fn all<T: Entity>(&self) -> Result<Vec<Shared<T>>> {
        let descriptor = T::descriptor();
        let rows = self
            .storage
            .select_rows(&descriptor.table_name, &Predicate::All)?;
        let graph = GraphRef::new();
        let entities = rows
            .iter()
            .map(|row| Ok(attach(&graph, T::from_row(row)?)))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(count = entities.len(), "Loaded all rows");
        Ok(entities)
    }
}

impl Database<MemoryStorage> {
    /// An in-memory database, mostly useful in tests. Tables of models
    /// keyed by a column other than `id` allocate keys in that column.
    pub fn in_memory(schema: Schema) -> Self {
        let storage = schema
            .models()
            .filter(|model| model.primary_key != "id")
            .fold(MemoryStorage::new(), |storage, model| {
                storage.with_primary_key(&model.table_name, model.primary_key)
            });
        Self::new(storage, schema)
    }
}

impl<S: Storage> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Share `entity` as a member of `graph`.
fn attach<T: Entity>(graph: &GraphRef, entity: T) -> Shared<T> {
    let shared = Rc::new(RefCell::new(entity));
    graph.adopt(&EntityHandle::new(&shared));
    shared
}

#[cfg(test)]
pub(crate) mod fixtures;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Car, User, database};

    #[test]
    fn find_returns_hydrated_entity() {
        let db = database();
        db.storage()
            .insert("users", &[("name".to_string(), "ada".into())])
            .unwrap();
        let user = db.find::<User>(1).unwrap().unwrap();
        let user = user.borrow();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "ada");
        assert!(user.state.is_hydrated());
        assert!(db.find::<User>(9).unwrap().is_none());
        assert!(db.find::<User>(0).unwrap().is_none());
    }

    #[test]
    fn all_shares_one_graph() {
        let db = database();
        for name in ["a", "b"] {
            db.storage()
                .insert("cars", &[("model".to_string(), name.into())])
                .unwrap();
        }
        let cars = db.all::<Car>().unwrap();
        assert_eq!(cars.len(), 2);
        let g0 = cars[0].borrow().state.graph_ref().unwrap();
        let g1 = cars[1].borrow().state.graph_ref().unwrap();
        assert!(g0.same(&g1));
    }

    #[test]
    fn default_config() {
        let config = DatabaseConfig::default();
        assert!(config.lazy_load && config.validate_on_save && config.manage_timestamps);
        let config = config.lazy_load(false).clock(|| 7);
        assert!(!config.lazy_load);
        assert_eq!((config.clock)(), 7);
    }
}
