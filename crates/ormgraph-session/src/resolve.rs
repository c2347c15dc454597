//! Lazy resolution of relation slots.
//!
//! An unloaded slot is resolved on first access by following the storage
//! location of its key:
//!
//! - a key in the entity's own row is read from the last known record,
//!   then looked up in the graph cache, then queried;
//! - a key in the foreign table (or a pivot table) is queried by the
//!   entity's id;
//! - an entity that was never persisted cannot be queried, so its graph
//!   is scanned for entities whose counterpart slot points back at it.
//!
//! Query results are cached per graph under `"table:predicate"`, so
//! siblings in one graph never repeat a query. Rows pass through the
//! graph's identity map: one `(model, id)` is one live instance. Whatever
//! is found (possibly nothing) is written into the slot and becomes the
//! slot's original snapshot.

use ormgraph_core::{
    Entity, EntityHandle, Error, GraphRef, Link, LinkSnapshot, ModelDescriptor, Predicate,
    Relation, RelationKind, Result, Row, Shared, Storage, Value,
};

use crate::Database;

impl<S: Storage> Database<S> {
    /// Resolve `property` of `entity`, loading it if needed.
    #[allow(clippy::result_large_err)]
    pub fn load<T: Entity>(&self, entity: &Shared<T>, property: &str) -> Result<Link> {
        self.resolve(&EntityHandle::new(entity), property)
    }

    /// Resolve a single-entity relation.
    #[allow(clippy::result_large_err)]
    pub fn load_one<T: Entity, F: Entity>(
        &self,
        entity: &Shared<T>,
        property: &str,
    ) -> Result<Option<Shared<F>>> {
        match self.load(entity, property)? {
            Link::One(None) => Ok(None),
            Link::One(Some(handle)) => downcast::<F>(T::MODEL_NAME, property, &handle).map(Some),
            _ => Err(Error::link_mismatch(
                T::MODEL_NAME,
                property,
                "expected a single-entity relation",
            )),
        }
    }

    /// Resolve a list relation.
    #[allow(clippy::result_large_err)]
    pub fn load_many<T: Entity, F: Entity>(
        &self,
        entity: &Shared<T>,
        property: &str,
    ) -> Result<Vec<Shared<F>>> {
        match self.load(entity, property)? {
            Link::Many(handles) => handles
                .iter()
                .map(|h| downcast::<F>(T::MODEL_NAME, property, h))
                .collect(),
            _ => Err(Error::link_mismatch(
                T::MODEL_NAME,
                property,
                "expected a list relation",
            )),
        }
    }

    /// Resolve a relation slot of a type-erased entity.
    ///
    /// A loaded slot is returned as is, without touching storage. A list
    /// that was only appended to is completed with the stored members.
    #[tracing::instrument(level = "debug", skip(self, handle), fields(model = handle.model_name()))]
    #[allow(clippy::result_large_err)]
    pub fn resolve(&self, handle: &EntityHandle, property: &str) -> Result<Link> {
        let (id, graph, additions) = {
            let mut entity = handle.borrow_mut()?;
            let link = entity
                .read_link(property)
                .ok_or_else(|| Error::unknown_property(handle.model_name(), property))?;
            let id = entity.entity_id();
            let appended = id > 0 && entity.entity_state().is_appended(property);
            if link.is_loaded() && !appended {
                tracing::trace!("Already loaded");
                return Ok(link);
            }
            (id, entity.entity_state_mut().graph(), link.handles().to_vec())
        };
        graph.register(handle);

        let relation = self
            .schema
            .relation(handle.model_name(), property)
            .ok_or_else(|| Error::unknown_property(handle.model_name(), property))?;

        let found = if id > 0 {
            self.lookup(handle, relation, &graph, id)?
        } else {
            scan_graph(handle, relation, &graph)
        };

        let link = if relation.kind.is_list() {
            Link::Many(found)
        } else {
            Link::One(found.into_iter().next())
        };
        let original = LinkSnapshot::of(&link);
        let link = match link {
            Link::Many(mut items) if !additions.is_empty() => {
                for added in additions {
                    let added_id = added.try_id().filter(|i| *i > 0);
                    let present = items
                        .iter()
                        .any(|h| h.ptr_eq(&added) || (added_id.is_some() && h.try_id() == added_id));
                    if !present {
                        items.push(added);
                    }
                }
                Link::Many(items)
            }
            other => other,
        };
        if id > 0 && !self.config.lazy_load {
            // A partial view must not pass for the stored relation on save.
            tracing::debug!(found = link.handles().len(), "Resolved from graph only");
            return Ok(link);
        }
        {
            let mut entity = handle.borrow_mut()?;
            entity.write_link(property, link.clone())?;
            entity
                .entity_state_mut()
                .set_original_link(relation.local_property, original);
        }
        tracing::debug!(found = link.handles().len(), "Resolved relation");
        Ok(link)
    }

    /// Resolution for a persisted entity.
    #[allow(clippy::result_large_err)]
    fn lookup(
        &self,
        handle: &EntityHandle,
        relation: &Relation,
        graph: &GraphRef,
        id: i64,
    ) -> Result<Vec<EntityHandle>> {
        let foreign = self.descriptor(relation.foreign_model)?;

        if relation.stores_key_locally() {
            let column = relation.key_column().unwrap_or_default();
            let key = handle
                .borrow()?
                .entity_state()
                .db_value(column)
                .and_then(Value::as_key);
            let Some(key) = key else {
                return Ok(Vec::new());
            };
            if let Some(found) = graph.find(relation.foreign_model, key) {
                tracing::trace!(key, "Found in graph cache");
                return Ok(vec![found]);
            }
            if !self.config.lazy_load {
                return Ok(Vec::new());
            }
            let rows = self.cached_rows(
                graph,
                &relation.foreign_table,
                &Predicate::eq(foreign.primary_key, key),
            )?;
            return self.materialize(graph, foreign, &rows);
        }

        if !self.config.lazy_load {
            return Ok(scan_graph(handle, relation, graph));
        }

        match (&relation.kind, &relation.pivot) {
            (RelationKind::ManyToMany, Some(pivot)) => {
                let links =
                    self.cached_rows(graph, &pivot.table, &Predicate::eq(&pivot.first_column, id))?;
                let ids: Vec<i64> = links
                    .iter()
                    .filter_map(|r| r.get_by_name(&pivot.second_column).and_then(Value::as_key))
                    .collect();
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let rows = self.cached_rows(
                    graph,
                    &relation.foreign_table,
                    &Predicate::is_in(
                        foreign.primary_key,
                        ids.iter().map(|i| Value::BigInt(*i)).collect(),
                    ),
                )?;
                let entities = self.materialize(graph, foreign, &rows)?;
                // Pivot order, not table order.
                Ok(ids
                    .iter()
                    .filter_map(|i| entities.iter().find(|h| h.try_id() == Some(*i)).cloned())
                    .collect())
            }
            _ => {
                let column = relation.key_column().unwrap_or_default();
                let rows =
                    self.cached_rows(graph, &relation.foreign_table, &Predicate::eq(column, id))?;
                self.materialize(graph, foreign, &rows)
            }
        }
    }

    /// Rows for `(table, filter)`, at most one query per graph.
    #[allow(clippy::result_large_err)]
    pub(crate) fn cached_rows(
        &self,
        graph: &GraphRef,
        table: &str,
        filter: &Predicate,
    ) -> Result<Vec<Row>> {
        let key = format!("{table}:{filter}");
        if let Some(rows) = graph.cached_query(&key) {
            tracing::trace!(key = %key, "Query cache hit");
            return Ok(rows);
        }
        let rows = self.storage.select_rows(table, filter)?;
        tracing::debug!(table, filter = %filter, rows = rows.len(), "Relation query");
        graph.store_query(key, rows.clone());
        Ok(rows)
    }

    /// Turn rows into live entities of `graph`, reusing known instances.
    #[allow(clippy::result_large_err)]
    fn materialize(
        &self,
        graph: &GraphRef,
        model: &'static ModelDescriptor,
        rows: &[Row],
    ) -> Result<Vec<EntityHandle>> {
        rows.iter()
            .map(|row| {
                let known = row
                    .get_by_name(model.primary_key)
                    .and_then(Value::as_key)
                    .and_then(|id| graph.find(model.name, id));
                if let Some(handle) = known {
                    return Ok(handle);
                }
                let handle = self.schema.hydrate(model.name, row)?;
                graph.adopt(&handle);
                Ok(handle)
            })
            .collect()
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn descriptor(&self, model: &'static str) -> Result<&'static ModelDescriptor> {
        self.schema
            .descriptor(model)
            .ok_or_else(|| Error::unregistered(model))
    }
}

/// Graph members whose counterpart slot (or stored key) points back at
/// `handle`.
fn scan_graph(handle: &EntityHandle, relation: &Relation, graph: &GraphRef) -> Vec<EntityHandle> {
    let Some(counterpart) = relation.foreign_property else {
        return Vec::new();
    };
    let id = handle.try_id().filter(|id| *id > 0);
    let remote_column = relation
        .stores_key_remotely()
        .then(|| relation.key_column())
        .flatten();

    let found: Vec<EntityHandle> = graph
        .entities_of(relation.foreign_model)
        .into_iter()
        .filter(|candidate| {
            let Ok(other) = candidate.borrow() else {
                return false;
            };
            let points_back = other
                .read_link(counterpart)
                .is_some_and(|link| link.contains(handle));
            let keyed_back = match (id, remote_column) {
                (Some(id), Some(column)) => other
                    .entity_state()
                    .db_value(column)
                    .and_then(Value::as_key)
                    == Some(id),
                _ => false,
            };
            points_back || keyed_back
        })
        .collect();
    tracing::trace!(found = found.len(), "Scanned graph for back-references");
    found
}

#[allow(clippy::result_large_err)]
fn downcast<F: Entity>(
    owner: &'static str,
    property: &str,
    handle: &EntityHandle,
) -> Result<Shared<F>> {
    handle.downcast::<F>().ok_or_else(|| {
        Error::link_mismatch(
            owner,
            property,
            format!("expected {} but got {}", F::MODEL_NAME, handle.model_name()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseConfig;
    use crate::fixtures::{Car, Tag, User, car, database, schema, user};
    use ormgraph_core::{MemoryStorage, share};
    use std::rc::Rc;

    fn seed(db: &Database<MemoryStorage>) {
        let s = db.storage();
        s.insert("users", &[("name".to_string(), "ada".into())]).unwrap();
        for model in ["a", "b"] {
            s.insert(
                "cars",
                &[
                    ("model".to_string(), model.into()),
                    ("user_id".to_string(), Value::BigInt(1)),
                ],
            )
            .unwrap();
        }
        s.insert("tags", &[("label".to_string(), "red".into())]).unwrap();
        s.insert("tags", &[("label".to_string(), "blue".into())]).unwrap();
        for tag_id in [2_i64, 1] {
            s.insert(
                "cars_tags",
                &[
                    ("car_id".to_string(), Value::BigInt(1)),
                    ("tag_id".to_string(), Value::BigInt(tag_id)),
                ],
            )
            .unwrap();
        }
        s.clear_log();
    }

    #[test]
    fn list_with_remote_key_is_queried_once() {
        let db = database();
        seed(&db);
        let ada = db.find::<User>(1).unwrap().unwrap();
        let cars: Vec<Shared<Car>> = db.load_many(&ada, "cars").unwrap();
        assert_eq!(cars.len(), 2);
        let reads = db.storage().reads();
        db.load_many::<User, Car>(&ada, "cars").unwrap();
        assert_eq!(db.storage().reads(), reads);
        assert!(ada.borrow().cars.is_loaded());
    }

    #[test]
    fn local_key_resolves_through_identity_map() {
        let db = database();
        seed(&db);
        let ada = db.find::<User>(1).unwrap().unwrap();
        let cars: Vec<Shared<Car>> = db.load_many(&ada, "cars").unwrap();

        let reads = db.storage().reads();
        let owner: Shared<User> = db.load_one(&cars[0], "user").unwrap().unwrap();
        assert!(Rc::ptr_eq(&owner, &ada));
        assert_eq!(db.storage().reads(), reads);
    }

    #[test]
    fn many_to_many_keeps_pivot_order() {
        let db = database();
        seed(&db);
        let a = db.find::<Car>(1).unwrap().unwrap();
        let tags: Vec<Shared<Tag>> = db.load_many(&a, "tags").unwrap();
        let labels: Vec<String> = tags.iter().map(|t| t.borrow().label.clone()).collect();
        assert_eq!(labels, vec!["blue", "red"]);
        assert_eq!(
            a.borrow().state.original_link("tags"),
            Some(&LinkSnapshot::Known([1, 2].into_iter().collect()))
        );
    }

    #[test]
    fn missing_relation_resolves_to_empty_and_is_cached() {
        let db = database();
        seed(&db);
        let b = db.find::<Car>(2).unwrap().unwrap();
        assert!(db.load_many::<Car, Tag>(&b, "tags").unwrap().is_empty());
        let reads = db.storage().reads();
        assert!(db.load_many::<Car, Tag>(&b, "tags").unwrap().is_empty());
        assert_eq!(db.storage().reads(), reads);
    }

    #[test]
    fn appended_list_is_completed_from_storage() {
        let db = database();
        seed(&db);
        let ada = db.find::<User>(1).unwrap().unwrap();
        let extra = share(car("c"));
        ada.borrow_mut().cars_mut().push(extra.clone());

        let cars: Vec<Shared<Car>> = db.load_many(&ada, "cars").unwrap();
        assert_eq!(cars.len(), 3);
        assert!(Rc::ptr_eq(&cars[2], &extra));
        assert_eq!(
            ada.borrow().state.original_link("cars"),
            Some(&LinkSnapshot::Known([1, 2].into_iter().collect()))
        );

        db.storage().clear_log();
        db.save(&ada).unwrap();
        assert_eq!(db.storage().statements().len(), 1);
        assert_eq!(db.storage().rows("cars").len(), 3);
    }

    #[test]
    fn transient_entities_scan_their_graph() {
        let db = database();
        let u = share(user("new"));
        let c = share(car("c"));
        c.borrow_mut().set_user(Some(u.clone()));

        let cars: Vec<Shared<Car>> = db.load_many(&u, "cars").unwrap();
        assert_eq!(cars.len(), 1);
        assert!(Rc::ptr_eq(&cars[0], &c));
        assert_eq!(db.storage().reads(), 0);
    }

    #[test]
    fn lazy_loading_can_be_disabled() {
        let db = Database::with_config(
            MemoryStorage::new(),
            schema(),
            DatabaseConfig::default().lazy_load(false),
        );
        seed(&db);
        let ada = db.find::<User>(1).unwrap().unwrap();
        let reads = db.storage().reads();
        assert!(db.load_many::<User, Car>(&ada, "cars").unwrap().is_empty());
        assert_eq!(db.storage().reads(), reads);
        assert!(!ada.borrow().cars.is_loaded());

        db.save(&ada).unwrap();
        assert!(db.storage().statements().is_empty());
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let db = database();
        seed(&db);
        let ada = db.find::<User>(1).unwrap().unwrap();
        assert!(db.load_one::<User, Car>(&ada, "cars").is_err());
        assert!(db.load(&ada, "nope").is_err());
    }
}
