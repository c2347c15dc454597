//! Removing a persisted entity and the references to it.

use ormgraph_core::{
    Entity, EntityHandle, Error, GraphRef, Hook, Link, LinkSnapshot, Predicate, Relation, Result,
    Shared, Storage, Value,
};

use crate::{Database, SaveStatus};

impl<S: Storage> Database<S> {
    /// Delete the row of a persisted entity.
    ///
    /// Pivot rows of many-to-many relations are removed and foreign keys
    /// pointing at the row are cleared first. Live entities in the same
    /// graph drop the deleted entity from their loaded relation slots.
    /// Afterwards the entity is transient again (id 0); saving it inserts
    /// a new row.
    #[allow(clippy::result_large_err)]
    pub fn delete<T: Entity>(&self, entity: &Shared<T>) -> Result<SaveStatus> {
        self.delete_handle(&EntityHandle::new(entity))
    }

    /// Type-erased [`delete`](Self::delete).
    #[tracing::instrument(level = "debug", skip(self, handle), fields(model = handle.model_name()))]
    #[allow(clippy::result_large_err)]
    pub fn delete_handle(&self, handle: &EntityHandle) -> Result<SaveStatus> {
        let model = handle.descriptor();
        let id = handle.id()?;
        if id == 0 {
            return Err(Error::DeleteNonexistent { model: model.name });
        }
        if handle.borrow_mut()?.hooks_mut().before_delete() == Hook::Stop {
            tracing::debug!(id, "Delete stopped by hook");
            return Ok(SaveStatus::Stopped);
        }
        let graph = handle.borrow_mut()?.entity_state_mut().graph();

        for relation in self.schema.relations().for_model(model.name) {
            if let Some(pivot) = &relation.pivot {
                let removed = self
                    .storage
                    .delete(&pivot.table, &Predicate::eq(pivot.first_column.as_str(), id))?;
                graph.invalidate_table(&pivot.table);
                tracing::trace!(pivot = %pivot.table, removed, "Removed pivot rows");
            } else if relation.stores_key_remotely() {
                let column = relation.key_column().unwrap_or_default();
                let detached = self.storage.update(
                    &relation.foreign_table,
                    &[(column.to_string(), Value::Null)],
                    &Predicate::eq(column, id),
                )?;
                graph.invalidate_table(&relation.foreign_table);
                for other in graph.entities_of(relation.foreign_model) {
                    let Ok(mut other) = other.borrow_mut() else {
                        continue;
                    };
                    let state = other.entity_state_mut();
                    if state.db_value(column).and_then(Value::as_key) == Some(id) {
                        state.update_db_record([(column, &Value::Null)]);
                    }
                }
                tracing::trace!(table = %relation.foreign_table, detached, "Cleared foreign keys");
            }
            forget_in_graph(&graph, relation, handle, id)?;
        }

        let removed = self
            .storage
            .delete(&model.table_name, &Predicate::eq(model.primary_key, id))?;
        graph.invalidate_table(&model.table_name);
        if removed == 0 {
            tracing::debug!(id, "No row to delete");
        }

        let mut entity = handle.borrow_mut()?;
        entity.hooks_mut().after_delete();
        entity.assign_id(0);
        tracing::debug!(id, "Deleted");
        Ok(SaveStatus::Done)
    }
}

/// Remove `handle` from the counterpart slots of live entities in `graph`.
#[allow(clippy::result_large_err)]
fn forget_in_graph(
    graph: &GraphRef,
    relation: &Relation,
    handle: &EntityHandle,
    id: i64,
) -> Result<()> {
    let Some(property) = relation.foreign_property else {
        return Ok(());
    };
    for other in graph.entities_of(relation.foreign_model) {
        let Ok(mut other) = other.borrow_mut() else {
            continue;
        };
        let Some(link) = other.read_link(property).filter(|l| l.contains(handle)) else {
            continue;
        };
        let remaining = match link {
            Link::Many(items) => Link::Many(items.into_iter().filter(|h| !h.ptr_eq(handle)).collect()),
            Link::One(_) | Link::Unloaded => Link::One(None),
        };
        other.write_link(property, remaining)?;

        let state = other.entity_state_mut();
        if let Some(LinkSnapshot::Known(mut ids)) = state.original_link(property).cloned() {
            ids.remove(&id);
            state.set_original_link(property, LinkSnapshot::Known(ids));
        }
        tracing::trace!(model = relation.foreign_model, property, "Dropped deleted entity from slot");
    }
    Ok(())
}
