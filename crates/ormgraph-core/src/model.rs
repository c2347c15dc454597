//! Entity trait and model descriptors.
//!
//! A model is a struct whose public fields are mapped to a table. Each
//! model carries a [`ModelDescriptor`], computed once and cached for the
//! process lifetime, and implements [`Entity`] so the save and merge
//! engines can read and write it without knowing its concrete type. Both
//! are normally generated by `#[derive(Entity)]`.

use crate::Result;
use crate::field::{PropertyDescriptor, TimestampRole};
use crate::handle::Link;
use crate::naming;
use crate::row::{FromValue, Row};
use crate::state::EntityState;
use crate::value::Value;

/// Immutable per-type mapping metadata.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Rust type name
    pub name: &'static str,
    /// Table name (explicit override or pluralized snake_case type name)
    pub table_name: String,
    /// Singular form of the table name, used when synthesizing key columns
    pub singular_name: String,
    /// Primary key property (always an `i64` column, 0 = not persisted)
    pub primary_key: &'static str,
    properties: Vec<PropertyDescriptor>,
}

impl ModelDescriptor {
    /// Create a descriptor with the conventional table name.
    pub fn new(name: &'static str, primary_key: &'static str) -> Self {
        Self {
            name,
            table_name: naming::table_name(name),
            singular_name: naming::to_snake_case(name),
            primary_key,
            properties: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn table(mut self, table: &'static str) -> Self {
        self.table_name = table.to_string();
        self.singular_name = naming::singularize(table);
        self
    }

    /// Append a mapped property; declaration order is preserved.
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// All mapped properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property_named(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Scalar columns, including the primary key.
    pub fn scalar_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_scalar())
    }

    /// Single-entity and list-of-entity properties.
    pub fn relation_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_relation())
    }

    /// Relation properties pointing at `target`.
    pub fn relations_to<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = &'a PropertyDescriptor> + 'a {
        self.relation_properties()
            .filter(move |p| p.target() == Some(target))
    }

    /// The property maintaining the given timestamp, if declared.
    pub fn timestamp_property(&self, role: TimestampRole) -> Option<&'static str> {
        self.properties
            .iter()
            .find(|p| p.timestamp == Some(role))
            .map(|p| p.name)
    }

    /// Is `property` a managed timestamp?
    pub fn is_timestamp(&self, property: &str) -> bool {
        self.property_named(property)
            .is_some_and(|p| p.timestamp.is_some())
    }
}

/// Result of a `before_*` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hook {
    /// Proceed with the operation.
    #[default]
    Continue,
    /// Abort the operation without writing; not an error.
    Stop,
}

/// Lifecycle event hooks for entities.
///
/// All methods have default no-op implementations, so you only need to
/// override the ones you care about. Models that implement this trait by
/// hand declare `#[entity(hooks)]` so the derive does not emit an empty
/// implementation.
///
/// # Example
///
/// ```ignore
/// #[derive(Entity, Default)]
/// #[entity(hooks)]
/// struct Invoice {
///     id: i64,
///     locked: bool,
///     state: EntityState,
/// }
///
/// impl EntityHooks for Invoice {
///     fn before_update(&mut self) -> Hook {
///         if self.locked { Hook::Stop } else { Hook::Continue }
///     }
/// }
/// ```
pub trait EntityHooks {
    /// Called before every save, ahead of the insert/update hooks.
    fn before_save(&mut self) -> Hook {
        Hook::Continue
    }

    fn before_insert(&mut self) -> Hook {
        Hook::Continue
    }

    fn before_update(&mut self) -> Hook {
        Hook::Continue
    }

    fn before_delete(&mut self) -> Hook {
        Hook::Continue
    }

    /// Called after a successful save, after the insert/update hook.
    fn after_save(&mut self) {}

    /// The entity already carries its newly allocated id.
    fn after_insert(&mut self) {}

    fn after_update(&mut self) {}

    fn after_delete(&mut self) {}
}

/// A struct mapped to a table.
///
/// Scalar properties are exchanged as [`Value`]s and relation slots as
/// [`Link`]s; `set_column` and `set_link` are raw writes that do not
/// touch change tracking (the generated `set_<field>` setters do).
///
/// # Example
///
/// ```ignore
/// use ormgraph::prelude::*;
///
/// #[derive(Entity, Default)]
/// struct Car {
///     id: i64,
///     #[entity(required)]
///     model: String,
///     owner: Related<User>,
///     state: EntityState,
/// }
/// ```
pub trait Entity: EntityHooks + Sized + 'static {
    /// The Rust type name, used as the model key in relations.
    const MODEL_NAME: &'static str;

    /// Mapping metadata, computed once.
    fn descriptor() -> &'static ModelDescriptor;

    /// A fresh instance with every property at its default.
    fn blank() -> Self;

    fn state(&self) -> &EntityState;

    fn state_mut(&mut self) -> &mut EntityState;

    /// Primary key value; 0 means not yet persisted.
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// Current value of a scalar property.
    fn column(&self, property: &str) -> Option<Value>;

    #[allow(clippy::result_large_err)]
    fn set_column(&mut self, property: &str, value: &Value) -> Result<()>;

    /// Current contents of a relation slot.
    fn link(&self, property: &str) -> Option<Link>;

    #[allow(clippy::result_large_err)]
    fn set_link(&mut self, property: &str, link: Link) -> Result<()>;

    /// Construct a hydrated instance from a storage row.
    ///
    /// Columns missing from the row keep their defaults; relation slots
    /// stay unloaded and resolve lazily.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self> {
        let descriptor = Self::descriptor();
        let mut entity = Self::blank();
        for property in descriptor.scalar_properties() {
            if let Some(value) = row.get_by_name(property.name) {
                if property.name == descriptor.primary_key {
                    entity.set_id(i64::from_value(value)?);
                } else {
                    entity.set_column(property.name, value)?;
                }
            }
        }
        let snapshot = descriptor
            .scalar_properties()
            .filter_map(|p| entity.column(p.name).map(|v| (p.name, v)))
            .collect();
        entity.state_mut().mark_hydrated(row.clone(), snapshot);
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PropertyDescriptor;
    use crate::types::SqlType;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new("TeamMember", "id")
            .property(PropertyDescriptor::scalar("id", SqlType::BigInt))
            .property(PropertyDescriptor::scalar("name", SqlType::Text))
            .property(
                PropertyDescriptor::scalar("touched", SqlType::BigInt)
                    .timestamp(TimestampRole::Updated),
            )
            .property(PropertyDescriptor::entity("team", "Team"))
            .property(PropertyDescriptor::entity_list("mentors", "TeamMember"))
    }

    #[test]
    fn conventional_table_name() {
        let d = descriptor();
        assert_eq!(d.table_name, "team_members");
        assert_eq!(d.singular_name, "team_member");
    }

    #[test]
    fn table_override_singularizes() {
        let d = ModelDescriptor::new("Person", "id").table("staff_people");
        assert_eq!(d.table_name, "staff_people");
        assert_eq!(d.singular_name, "staff_person");
    }

    #[test]
    fn property_partitions_keep_order() {
        let d = descriptor();
        let scalars: Vec<_> = d.scalar_properties().map(|p| p.name).collect();
        let relations: Vec<_> = d.relation_properties().map(|p| p.name).collect();
        assert_eq!(scalars, vec!["id", "name", "touched"]);
        assert_eq!(relations, vec!["team", "mentors"]);
        let to_self: Vec<_> = d.relations_to("TeamMember").map(|p| p.name).collect();
        assert_eq!(to_self, vec!["mentors"]);
    }

    #[test]
    fn timestamp_lookup() {
        let d = descriptor();
        assert_eq!(d.timestamp_property(TimestampRole::Updated), Some("touched"));
        assert_eq!(d.timestamp_property(TimestampRole::Created), None);
        assert!(d.is_timestamp("touched"));
        assert!(!d.is_timestamp("name"));
    }

    struct Quiet;
    impl EntityHooks for Quiet {}

    #[test]
    fn default_hooks_continue() {
        let mut q = Quiet;
        assert_eq!(q.before_save(), Hook::Continue);
        assert_eq!(q.before_insert(), Hook::Continue);
        assert_eq!(q.before_update(), Hook::Continue);
        assert_eq!(q.before_delete(), Hook::Continue);
        q.after_save();
    }
}
