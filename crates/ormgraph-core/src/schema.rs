//! The model registry.
//!
//! A [`Schema`] is built once per database context: it collects the
//! descriptors of every entity type, runs relationship discovery over
//! them and keeps a type-erased constructor per model so that rows loaded
//! for a relation can be turned into live entities.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::Result;
use crate::error::Error;
use crate::handle::EntityHandle;
use crate::model::{Entity, ModelDescriptor};
use crate::relationship::{Discoverer, Relation, Relations};
use crate::row::Row;

/// Registration record for one model.
#[derive(Clone, Copy)]
pub struct ModelEntry {
    pub descriptor: &'static ModelDescriptor,
    hydrate: fn(&Row) -> Result<EntityHandle>,
}

fn hydrate_as<T: Entity>(row: &Row) -> Result<EntityHandle> {
    let entity = T::from_row(row)?;
    Ok(EntityHandle::new(&Rc::new(RefCell::new(entity))))
}

impl ModelEntry {
    pub fn of<T: Entity>() -> Self {
        Self {
            descriptor: T::descriptor(),
            hydrate: hydrate_as::<T>,
        }
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("model", &self.descriptor.name)
            .field("table", &self.descriptor.table_name)
            .finish()
    }
}

/// Collects models for a [`Schema`].
///
/// # Example
///
/// ```ignore
/// let schema = Schema::builder()
///     .model::<User>()
///     .model::<Car>()
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<ModelEntry>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type; registering it twice is harmless.
    #[must_use]
    pub fn model<T: Entity>(mut self) -> Self {
        if !self.entries.iter().any(|e| e.descriptor.name == T::MODEL_NAME) {
            self.entries.push(ModelEntry::of::<T>());
        }
        self
    }

    /// Run relationship discovery and freeze the registry.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Schema> {
        let descriptors: Vec<&ModelDescriptor> = self.entries.iter().map(|e| e.descriptor).collect();
        let relations = Discoverer::new(&descriptors).discover()?;
        let models = self
            .entries
            .into_iter()
            .map(|e| (e.descriptor.name, e))
            .collect();
        Ok(Schema { models, relations })
    }
}

/// Registered models and their discovered relations.
#[derive(Debug)]
pub struct Schema {
    models: BTreeMap<&'static str, ModelEntry>,
    relations: Relations,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// The canonical relation set.
    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    /// The relation behind `model.property`, seen from that property.
    pub fn relation(&self, model: &str, property: &str) -> Option<&Relation> {
        self.relations.get(model, property)
    }

    pub fn descriptor(&self, model: &str) -> Option<&'static ModelDescriptor> {
        self.models.get(model).map(|e| e.descriptor)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Registered models in name order.
    pub fn models(&self) -> impl Iterator<Item = &'static ModelDescriptor> + '_ {
        self.models.values().map(|e| e.descriptor)
    }

    /// Build a detached, hydrated entity of `model` from a row.
    #[allow(clippy::result_large_err)]
    pub fn hydrate(&self, model: &'static str, row: &Row) -> Result<EntityHandle> {
        let entry = self.models.get(model).ok_or_else(|| Error::unregistered(model))?;
        (entry.hydrate)(row)
    }

    /// The canonical relation set as JSON.
    #[allow(clippy::result_large_err)]
    pub fn relations_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.relations.all())?)
    }
}
