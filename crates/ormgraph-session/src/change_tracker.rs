//! Change tracking and dirty detection.
//!
//! Every entity records its own modifications in its `EntityState`; this
//! module turns that record into the column deltas a save writes, and
//! builds the snapshot a successful save commits back into the state.

use std::collections::BTreeMap;

use ormgraph_core::{DynEntity, LinkSnapshot, Value};

/// Values an entity holds right after a save.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Every scalar property, including the primary key.
    pub scalars: BTreeMap<&'static str, Value>,
    /// Every loaded relation slot.
    pub links: BTreeMap<&'static str, LinkSnapshot>,
}

impl Snapshot {
    /// Capture the current values of `entity`.
    pub fn take(entity: &dyn DynEntity) -> Self {
        let model = entity.model();
        let scalars = model
            .scalar_properties()
            .filter_map(|p| entity.read_column(p.name).map(|v| (p.name, v)))
            .collect();
        let links = model
            .relation_properties()
            .filter_map(|p| {
                entity
                    .read_link(p.name)
                    .filter(|link| link.is_loaded())
                    .map(|link| (p.name, LinkSnapshot::of(&link)))
            })
            .collect();
        Self { scalars, links }
    }

    /// Replace the entity's original values with this snapshot.
    pub fn commit(self, entity: &mut dyn DynEntity) {
        entity
            .entity_state_mut()
            .commit(self.scalars, self.links);
    }
}

/// Modified scalar columns whose value differs from the last known row.
///
/// The primary key is never part of the delta. A column with no known
/// stored value counts as changed.
#[tracing::instrument(level = "trace", skip(entity), fields(model = entity.model().name))]
pub fn dirty_columns(entity: &dyn DynEntity) -> Vec<(&'static str, Value)> {
    let model = entity.model();
    let state = entity.entity_state();
    let dirty: Vec<(&'static str, Value)> = model
        .scalar_properties()
        .filter(|p| p.name != model.primary_key && state.is_modified(p.name))
        .filter_map(|p| entity.read_column(p.name).map(|v| (p.name, v)))
        .filter(|(name, value)| state.db_value(name) != Some(value))
        .collect();
    tracing::trace!(dirty = dirty.len(), "Computed dirty columns");
    dirty
}
