//! Recursive, cycle-safe persistence of entity graphs.
//!
//! Saving an entity writes its own row and walks every loaded relation
//! slot:
//!
//! 1. An entity already visited in this call tree is skipped. Entities
//!    are marked visited *before* anything is recursed into.
//! 2. `before_save` and `before_insert` / `before_update` run; `Stop`
//!    abandons this entity without writing.
//! 3. Relations whose key lives in this row are saved first so their ids
//!    can be written with the row. A target still waiting for its own
//!    insert (an ancestor in the call stack) is patched in afterwards.
//! 4. The row is inserted (id 0) or updated (changed columns only).
//! 5. Relations stored elsewhere are saved, then reconciled: keys in
//!    foreign rows are set or cleared, pivot rows are inserted or deleted
//!    against the slot's original snapshot.
//! 6. The current values become the new original snapshot and the
//!    `after_*` hooks run.
//!
//! Constraint validation runs over the whole reachable graph before the
//! first write, so an invalid graph is never partially written.

use std::collections::{BTreeSet, HashMap, HashSet};

use ormgraph_core::{
    Entity, EntityHandle, EntityKey, Error, GraphRef, Hook, Link, LinkSnapshot, Predicate,
    Relation, Result, Shared, Storage, StorageError, StorageErrorKind, TimestampRole, Value,
    validate_entity,
};

use crate::change_tracker::{Snapshot, dirty_columns};
use crate::{Database, SaveStatus};

// ============================================================================
// Pivot Table Operations
// ============================================================================

/// A pivot-table row to insert or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTableOp {
    /// Insert a link (relationship).
    Link {
        /// Pivot table name.
        table: String,
        /// Column referencing the saved (local) entity.
        local_column: String,
        local_id: i64,
        /// Column referencing the related (remote) entity.
        remote_column: String,
        remote_id: i64,
    },
    /// Delete a link (relationship).
    Unlink {
        table: String,
        local_column: String,
        local_id: i64,
        remote_column: String,
        remote_id: i64,
    },
}

/// Direction-independent identity of a pivot row.
type PivotRow = (String, (String, i64), (String, i64));

impl LinkTableOp {
    /// Create a link operation.
    pub fn link(
        table: impl Into<String>,
        local_column: impl Into<String>,
        local_id: i64,
        remote_column: impl Into<String>,
        remote_id: i64,
    ) -> Self {
        Self::Link {
            table: table.into(),
            local_column: local_column.into(),
            local_id,
            remote_column: remote_column.into(),
            remote_id,
        }
    }

    /// Create an unlink operation.
    pub fn unlink(
        table: impl Into<String>,
        local_column: impl Into<String>,
        local_id: i64,
        remote_column: impl Into<String>,
        remote_id: i64,
    ) -> Self {
        Self::Unlink {
            table: table.into(),
            local_column: local_column.into(),
            local_id,
            remote_column: remote_column.into(),
            remote_id,
        }
    }

    /// Get the table name.
    pub fn table(&self) -> &str {
        match self {
            LinkTableOp::Link { table, .. } | LinkTableOp::Unlink { table, .. } => table,
        }
    }

    /// Check if this is a link (insert) operation.
    pub fn is_link(&self) -> bool {
        matches!(self, LinkTableOp::Link { .. })
    }

    /// Check if this is an unlink (delete) operation.
    pub fn is_unlink(&self) -> bool {
        matches!(self, LinkTableOp::Unlink { .. })
    }

    /// The same row seen from either side compares equal.
    fn row(&self) -> PivotRow {
        let (LinkTableOp::Link {
            table,
            local_column,
            local_id,
            remote_column,
            remote_id,
        }
        | LinkTableOp::Unlink {
            table,
            local_column,
            local_id,
            remote_column,
            remote_id,
        }) = self;
        let a = (local_column.clone(), *local_id);
        let b = (remote_column.clone(), *remote_id);
        if a <= b {
            (table.clone(), a, b)
        } else {
            (table.clone(), b, a)
        }
    }

    /// Execute this link table operation.
    #[tracing::instrument(level = "debug", skip(storage))]
    #[allow(clippy::result_large_err)]
    pub fn execute<S: Storage>(&self, storage: &S) -> Result<()> {
        match self {
            LinkTableOp::Link {
                table,
                local_column,
                local_id,
                remote_column,
                remote_id,
            } => {
                storage.insert(
                    table,
                    &[
                        (local_column.clone(), Value::BigInt(*local_id)),
                        (remote_column.clone(), Value::BigInt(*remote_id)),
                    ],
                )?;
            }
            LinkTableOp::Unlink {
                table,
                local_column,
                local_id,
                remote_column,
                remote_id,
            } => {
                storage.delete(
                    table,
                    &Predicate::and(vec![
                        Predicate::eq(local_column.as_str(), *local_id),
                        Predicate::eq(remote_column.as_str(), *remote_id),
                    ]),
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Save Context
// ============================================================================

/// Work that waits for an entity's insert to learn its id.
enum Pending {
    /// Write the awaited id into `column` of `holder`'s row.
    Key {
        holder: EntityHandle,
        table: String,
        column: String,
    },
    /// Insert a pivot row once the remote side has an id.
    PivotRow {
        table: String,
        local_column: String,
        local_id: i64,
        remote_column: String,
    },
}

/// State of one `save` call tree.
struct SaveContext {
    visited: HashSet<EntityKey>,
    graph: GraphRef,
    now: i64,
    /// Key columns other entities assigned to an entity not yet inserted.
    assigned: HashMap<EntityKey, Vec<(String, Value)>>,
    pending: Vec<(EntityKey, Pending)>,
    pivot_rows: HashSet<PivotRow>,
    writes: usize,
}

impl SaveContext {
    fn wrote(&mut self, table: &str) {
        self.writes += 1;
        self.graph.invalidate_table(table);
    }
}

fn upsert(values: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match values.iter_mut().find(|(c, _)| c == column) {
        Some(slot) => slot.1 = value,
        None => values.push((column.to_string(), value)),
    }
}

fn record<'a>(values: &'a [(String, Value)]) -> impl Iterator<Item = (&'a str, &'a Value)> {
    values.iter().map(|(c, v)| (c.as_str(), v))
}

// ============================================================================
// Save
// ============================================================================

impl<S: Storage> Database<S> {
    /// Persist `entity` and everything reachable through its loaded
    /// relation slots.
    #[allow(clippy::result_large_err)]
    pub fn save<T: Entity>(&self, entity: &Shared<T>) -> Result<SaveStatus> {
        self.save_handle(&EntityHandle::new(entity))
    }

    /// Persist a type-erased entity graph.
    #[tracing::instrument(level = "debug", skip(self, root), fields(model = root.model_name()))]
    #[allow(clippy::result_large_err)]
    pub fn save_handle(&self, root: &EntityHandle) -> Result<SaveStatus> {
        let graph = root.borrow_mut()?.entity_state_mut().graph();
        graph.adopt(root);

        if self.config.validate_on_save {
            validate_graph(root)?;
        }

        let mut cx = SaveContext {
            visited: HashSet::new(),
            graph,
            now: (self.config.clock)(),
            assigned: HashMap::new(),
            pending: Vec::new(),
            pivot_rows: HashSet::new(),
            writes: 0,
        };
        let status = self.save_entity(root, &mut cx)?;
        cx.graph.prune();
        tracing::debug!(
            entities = cx.visited.len(),
            writes = cx.writes,
            status = ?status,
            "Save complete"
        );
        Ok(status)
    }

    #[allow(clippy::result_large_err)]
    fn save_entity(&self, handle: &EntityHandle, cx: &mut SaveContext) -> Result<SaveStatus> {
        if !cx.visited.insert(handle.key()) {
            tracing::trace!(entity = ?handle, "Already visited");
            return Ok(SaveStatus::Done);
        }
        cx.graph.adopt(handle);
        let model = handle.descriptor();

        let inserting = {
            let mut entity = handle.borrow_mut()?;
            let inserting = entity.entity_id() == 0;
            let hooks = entity.hooks_mut();
            let proceed = hooks.before_save() == Hook::Continue
                && if inserting {
                    hooks.before_insert() == Hook::Continue
                } else {
                    hooks.before_update() == Hook::Continue
                };
            if !proceed {
                tracing::debug!(model = model.name, "Save stopped by hook");
                return Ok(SaveStatus::Stopped);
            }
            inserting
        };

        let relations: Vec<&Relation> = self.schema.relations().for_model(model.name).collect();

        // Keys stored in this row: save the referenced entities first.
        let mut keys: Vec<(String, Value)> = Vec::new();
        for relation in relations.iter().filter(|r| r.stores_key_locally()) {
            let column = relation.key_column().unwrap_or_default().to_string();
            let link = handle
                .borrow()?
                .read_link(relation.local_property)
                .unwrap_or_default();
            let value = match link {
                Link::Unloaded => continue,
                Link::One(None) | Link::Many(_) => Value::Null,
                Link::One(Some(target)) => {
                    self.save_entity(&target, cx)?;
                    match target.try_id() {
                        Some(id) if id > 0 => Value::BigInt(id),
                        _ => {
                            tracing::trace!(target = ?target, column = %column, "Key target pending");
                            cx.pending.push((
                                target.key(),
                                Pending::Key {
                                    holder: handle.clone(),
                                    table: model.table_name.clone(),
                                    column: column.clone(),
                                },
                            ));
                            Value::Null
                        }
                    }
                }
            };
            keys.push((column, value));
        }
        for (column, value) in cx.assigned.remove(&handle.key()).unwrap_or_default() {
            upsert(&mut keys, &column, value);
        }

        let values = {
            let mut entity = handle.borrow_mut()?;
            let now = Value::BigInt(cx.now);
            if inserting {
                if self.config.manage_timestamps {
                    for role in [TimestampRole::Created, TimestampRole::Updated] {
                        if let Some(property) = model.timestamp_property(role) {
                            entity.write_column(property, &now)?;
                        }
                    }
                }
                let mut values: Vec<(String, Value)> = model
                    .scalar_properties()
                    .filter(|p| p.name != model.primary_key)
                    .filter_map(|p| entity.read_column(p.name).map(|v| (p.name.to_string(), v)))
                    .collect();
                values.extend(keys);
                values
            } else {
                let mut values: Vec<(String, Value)> = dirty_columns(&*entity)
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect();
                let state = entity.entity_state();
                values.extend(
                    keys.into_iter()
                        .filter(|(c, v)| state.db_value(c).is_none_or(|old| !old.same_as(v))),
                );
                let stamp = model
                    .timestamp_property(TimestampRole::Updated)
                    .filter(|_| self.config.manage_timestamps && !values.is_empty());
                if let Some(property) = stamp {
                    entity.write_column(property, &now)?;
                    upsert(&mut values, property, now);
                }
                values
            }
        };

        let id = if inserting {
            let id = self.storage.insert(&model.table_name, &values)?;
            cx.wrote(&model.table_name);
            let mut entity = handle.borrow_mut()?;
            entity.assign_id(id);
            let key = Value::BigInt(id);
            entity
                .entity_state_mut()
                .update_db_record(record(&values).chain([(model.primary_key, &key)]));
            tracing::debug!(model = model.name, id, columns = values.len(), "Inserted");
            id
        } else {
            let id = handle.id()?;
            if values.is_empty() {
                tracing::trace!(model = model.name, id, "Nothing to update");
            } else {
                let affected = self.storage.update(
                    &model.table_name,
                    &values,
                    &Predicate::eq(model.primary_key, id),
                )?;
                if affected == 0 {
                    return Err(StorageError::new(
                        StorageErrorKind::NotFound,
                        &model.table_name,
                        format!("no {} row with {} = {id}", model.name, model.primary_key),
                    )
                    .into());
                }
                cx.wrote(&model.table_name);
                handle
                    .borrow_mut()?
                    .entity_state_mut()
                    .update_db_record(record(&values));
                tracing::debug!(model = model.name, id, columns = values.len(), "Updated");
            }
            id
        };
        if inserting {
            self.resume_pending(handle, id, cx)?;
        }

        // Relations stored elsewhere: save the targets, then reconcile.
        for relation in relations.iter().filter(|r| !r.stores_key_locally()) {
            let (link, original) = {
                let entity = handle.borrow()?;
                let link = entity
                    .read_link(relation.local_property)
                    .unwrap_or_default();
                let original = if inserting {
                    LinkSnapshot::Known(BTreeSet::new())
                } else {
                    entity
                        .entity_state()
                        .original_link(relation.local_property)
                        .cloned()
                        .unwrap_or(LinkSnapshot::Unknown)
                };
                (link, original)
            };
            if !link.is_loaded() {
                continue;
            }
            if relation.pivot.is_none() {
                // New targets take the key with their insert.
                let column = relation.key_column().unwrap_or_default();
                for target in link.handles().iter().filter(|t| t.try_id() == Some(0)) {
                    cx.assigned
                        .entry(target.key())
                        .or_default()
                        .push((column.to_string(), Value::BigInt(id)));
                }
            }
            for target in link.handles() {
                self.save_entity(target, cx)?;
            }
            let appended = original == LinkSnapshot::Appended;
            if relation.pivot.is_some() {
                self.reconcile_pivot(relation, id, &link, original, cx)?;
            } else {
                self.reconcile_remote_key(relation, id, &link, original, cx)?;
            }
            if appended {
                // The slot holds only the additions; the next access reloads it.
                handle
                    .borrow_mut()?
                    .write_link(relation.local_property, Link::Unloaded)?;
                tracing::trace!(property = relation.local_property, "Unloaded appended list");
            }
        }

        {
            let mut entity = handle.borrow_mut()?;
            let snapshot = Snapshot::take(&*entity);
            snapshot.commit(&mut *entity);
            let hooks = entity.hooks_mut();
            if inserting {
                hooks.after_insert();
            } else {
                hooks.after_update();
            }
            hooks.after_save();
        }
        Ok(SaveStatus::Done)
    }

    /// Run the work that was waiting for `handle` to receive `id`.
    #[allow(clippy::result_large_err)]
    fn resume_pending(&self, handle: &EntityHandle, id: i64, cx: &mut SaveContext) -> Result<()> {
        let key = handle.key();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut cx.pending).into_iter().partition(|(k, _)| *k == key);
        cx.pending = waiting;

        for (_, pending) in ready {
            match pending {
                Pending::Key {
                    holder,
                    table,
                    column,
                } => {
                    let Some(holder_id) = holder.try_id().filter(|i| *i > 0) else {
                        continue;
                    };
                    let value = Value::BigInt(id);
                    let pk = holder.descriptor().primary_key;
                    self.storage.update(
                        &table,
                        &[(column.clone(), value.clone())],
                        &Predicate::eq(pk, holder_id),
                    )?;
                    cx.wrote(&table);
                    holder
                        .borrow_mut()?
                        .entity_state_mut()
                        .update_db_record([(column.as_str(), &value)]);
                    tracing::debug!(table = %table, column = %column, id, "Patched pending key");
                }
                Pending::PivotRow {
                    table,
                    local_column,
                    local_id,
                    remote_column,
                } => {
                    let op = LinkTableOp::link(table, local_column, local_id, remote_column, id);
                    if cx.pivot_rows.insert(op.row()) {
                        op.execute(&self.storage)?;
                        cx.wrote(op.table());
                    }
                }
            }
        }
        Ok(())
    }

    /// Point keys in foreign rows at `id`, clearing them on removed rows.
    #[allow(clippy::result_large_err)]
    fn reconcile_remote_key(
        &self,
        relation: &Relation,
        id: i64,
        link: &Link,
        original: LinkSnapshot,
        cx: &mut SaveContext,
    ) -> Result<()> {
        let column = relation.key_column().unwrap_or_default();
        let table = relation.foreign_table.as_str();
        let foreign = self.descriptor(relation.foreign_model)?;
        let value = Value::BigInt(id);

        let mut current = BTreeSet::new();
        for target in link.handles() {
            match target.try_id().filter(|i| *i > 0) {
                Some(target_id) => {
                    current.insert(target_id);
                    let stored = target.borrow()?.entity_state().db_value(column).cloned();
                    if stored.is_some_and(|v| v.same_as(&value)) {
                        continue;
                    }
                    self.storage.update(
                        table,
                        &[(column.to_string(), value.clone())],
                        &Predicate::eq(foreign.primary_key, target_id),
                    )?;
                    cx.wrote(table);
                    target
                        .borrow_mut()?
                        .entity_state_mut()
                        .update_db_record([(column, &value)]);
                }
                None => cx
                    .assigned
                    .entry(target.key())
                    .or_default()
                    .push((column.to_string(), value.clone())),
            }
        }

        let detach: Vec<i64> = match original {
            LinkSnapshot::Known(ids) => ids.difference(&current).copied().collect(),
            LinkSnapshot::Appended => Vec::new(),
            LinkSnapshot::Unknown => self
                .storage
                .select_rows(table, &Predicate::eq(column, id))?
                .iter()
                .filter_map(|r| r.get_by_name(foreign.primary_key).and_then(Value::as_key))
                .filter(|i| !current.contains(i))
                .collect(),
        };
        if detach.is_empty() {
            return Ok(());
        }
        self.storage.update(
            table,
            &[(column.to_string(), Value::Null)],
            &Predicate::and(vec![
                Predicate::is_in(
                    foreign.primary_key,
                    detach.iter().map(|i| Value::BigInt(*i)).collect(),
                ),
                Predicate::eq(column, id),
            ]),
        )?;
        cx.wrote(table);
        for detached in &detach {
            if let Some(entity) = cx.graph.find(relation.foreign_model, *detached) {
                if let Ok(mut entity) = entity.borrow_mut() {
                    entity
                        .entity_state_mut()
                        .update_db_record([(column, &Value::Null)]);
                }
            }
        }
        tracing::debug!(
            property = relation.local_property,
            detached = detach.len(),
            "Detached removed entities"
        );
        Ok(())
    }

    /// Insert and delete pivot rows so they match the current list.
    #[allow(clippy::result_large_err)]
    fn reconcile_pivot(
        &self,
        relation: &Relation,
        id: i64,
        link: &Link,
        original: LinkSnapshot,
        cx: &mut SaveContext,
    ) -> Result<()> {
        let Some(pivot) = relation.pivot.as_ref() else {
            return Ok(());
        };

        let mut current = BTreeSet::new();
        for target in link.handles() {
            match target.try_id().filter(|i| *i > 0) {
                Some(target_id) => {
                    current.insert(target_id);
                }
                None => cx.pending.push((
                    target.key(),
                    Pending::PivotRow {
                        table: pivot.table.clone(),
                        local_column: pivot.first_column.clone(),
                        local_id: id,
                        remote_column: pivot.second_column.clone(),
                    },
                )),
            }
        }

        let additions_only = original == LinkSnapshot::Appended;
        let previous: BTreeSet<i64> = match original {
            LinkSnapshot::Known(ids) => ids,
            LinkSnapshot::Unknown | LinkSnapshot::Appended => self
                .storage
                .select_rows(&pivot.table, &Predicate::eq(pivot.first_column.as_str(), id))?
                .iter()
                .filter_map(|r| r.get_by_name(&pivot.second_column).and_then(Value::as_key))
                .collect(),
        };

        let ops = current
            .difference(&previous)
            .map(|remote| {
                LinkTableOp::link(
                    &pivot.table,
                    &pivot.first_column,
                    id,
                    &pivot.second_column,
                    *remote,
                )
            })
            .chain(previous.difference(&current).filter(|_| !additions_only).map(|remote| {
                LinkTableOp::unlink(
                    &pivot.table,
                    &pivot.first_column,
                    id,
                    &pivot.second_column,
                    *remote,
                )
            }));

        let mut executed = 0;
        for op in ops {
            if !cx.pivot_rows.insert(op.row()) {
                tracing::trace!(op = ?op, "Pivot row already handled");
                continue;
            }
            op.execute(&self.storage)?;
            cx.wrote(op.table());
            executed += 1;
        }
        if executed > 0 {
            tracing::debug!(
                property = relation.local_property,
                pivot = %pivot.table,
                executed,
                "Reconciled pivot rows"
            );
        }
        Ok(())
    }
}

/// Check declared constraints on every entity a save would write.
#[allow(clippy::result_large_err)]
fn validate_graph(root: &EntityHandle) -> Result<()> {
    let mut seen = HashSet::new();
    let mut queue = vec![root.clone()];
    while let Some(handle) = queue.pop() {
        if !seen.insert(handle.key()) {
            continue;
        }
        let entity = handle.borrow()?;
        if entity.entity_id() == 0 || entity.entity_state().has_changes() {
            validate_entity(&*entity).map_err(Error::from)?;
        }
        for property in entity.model().relation_properties() {
            if let Some(link) = entity.read_link(property.name) {
                queue.extend(link.handles().iter().cloned());
            }
        }
    }
    Ok(())
}
