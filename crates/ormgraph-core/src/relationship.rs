//! Relationship discovery.
//!
//! Relationships are not declared, they are inferred from property shapes
//! and naming conventions. Given every registered [`ModelDescriptor`], the
//! [`Discoverer`] classifies each relation property into one of four
//! [`RelationKind`]s, pairs it with its counterpart on the other model, and
//! chooses one canonical set of storage names (foreign key or pivot table)
//! shared by both sides.
//!
//! Kinds are named from the side of the property that declares them:
//!
//! | Local property | Counterpart on foreign model | Kind | Key storage |
//! |---|---|---|---|
//! | list of `F` | list of `L` | `ManyToMany` | pivot table |
//! | list of `F` | single `L` | `ManyToOne` | FK column in the foreign table |
//! | single `F` | list of `L` | `OneToMany` | FK column in the local table |
//! | single `F` | single `L` | `OneToOne` | FK column on one side |
//!
//! # Example
//!
//! ```ignore
//! let relations = Discoverer::new(&[User::descriptor(), Car::descriptor()]).discover()?;
//! let cars = relations.get("User", "cars").unwrap();
//! assert_eq!(cars.kind, RelationKind::ManyToOne);
//! assert_eq!(cars.foreign_key.as_ref().unwrap().column, "user_id");
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::Result;
use crate::error::{RelationshipError, RelationshipErrorKind};
use crate::field::PropertyDescriptor;
use crate::model::ModelDescriptor;
use crate::naming;

/// The four relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RelationKind {
    /// List on both sides, backed by a pivot table.
    ManyToMany,
    /// The local list is referenced by a key in the foreign table.
    ManyToOne,
    /// The local single entity is referenced by a key in the local table.
    OneToMany,
    /// Single on both sides; one of the two tables stores the key.
    OneToOne,
}

impl RelationKind {
    /// The kind as seen from the counterpart property.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            other => other,
        }
    }

    /// Does the local property hold a list?
    pub const fn is_list(self) -> bool {
        matches!(self, RelationKind::ManyToMany | RelationKind::ManyToOne)
    }
}

/// Which side of a relation a piece of storage lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Local,
    Foreign,
}

impl Side {
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Side::Local => Side::Foreign,
            Side::Foreign => Side::Local,
        }
    }
}

/// A foreign key column and the table that stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    /// The side whose table holds the column.
    pub owner: Side,
}

/// A pivot table backing a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pivot {
    pub table: String,
    /// References the local model of the view this pivot belongs to.
    pub first_column: String,
    /// References the foreign model.
    pub second_column: String,
}

/// One discovered relationship, seen from its local property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub local_model: &'static str,
    pub foreign_model: &'static str,
    pub local_property: &'static str,
    /// Always present: one-way relations are rejected during discovery.
    pub foreign_property: Option<&'static str>,
    pub local_table: String,
    pub foreign_table: String,
    pub local_singular: String,
    pub foreign_singular: String,
    pub foreign_key: Option<ForeignKey>,
    pub pivot: Option<Pivot>,
    /// Disambiguator for multiple relations between the same two models.
    pub link_identifier: Option<String>,
}

impl Relation {
    /// The same relation seen from the counterpart property.
    #[must_use]
    pub fn reversed(&self) -> Relation {
        Relation {
            kind: self.kind.reversed(),
            local_model: self.foreign_model,
            foreign_model: self.local_model,
            local_property: self.foreign_property.unwrap_or(self.local_property),
            foreign_property: Some(self.local_property),
            local_table: self.foreign_table.clone(),
            foreign_table: self.local_table.clone(),
            local_singular: self.foreign_singular.clone(),
            foreign_singular: self.local_singular.clone(),
            foreign_key: self.foreign_key.as_ref().map(|fk| ForeignKey {
                table: fk.table.clone(),
                column: fk.column.clone(),
                owner: fk.owner.flipped(),
            }),
            pivot: self.pivot.as_ref().map(|p| Pivot {
                table: p.table.clone(),
                first_column: p.second_column.clone(),
                second_column: p.first_column.clone(),
            }),
            link_identifier: self.link_identifier.clone(),
        }
    }

    /// Is the key column part of the local row?
    pub fn stores_key_locally(&self) -> bool {
        self.foreign_key
            .as_ref()
            .is_some_and(|fk| fk.owner == Side::Local)
    }

    /// Is the key column part of the foreign row?
    pub fn stores_key_remotely(&self) -> bool {
        self.foreign_key
            .as_ref()
            .is_some_and(|fk| fk.owner == Side::Foreign)
    }

    /// The key column name, for key-backed relations.
    pub fn key_column(&self) -> Option<&str> {
        self.foreign_key.as_ref().map(|fk| fk.column.as_str())
    }
}

/// The discovered relation set.
///
/// `all` yields each relation exactly once, from the side it was first
/// discovered on; `get` answers from either property's point of view.
#[derive(Debug, Clone, Default)]
pub struct Relations {
    canonical: Vec<Relation>,
    /// Model name, then property name
    views: BTreeMap<&'static str, BTreeMap<&'static str, Relation>>,
}

impl Relations {
    fn push(&mut self, relation: Relation) {
        for view in [relation.reversed(), relation.clone()] {
            self.views
                .entry(view.local_model)
                .or_default()
                .insert(view.local_property, view);
        }
        self.canonical.push(relation);
    }

    /// Every relation once, in discovery order.
    pub fn all(&self) -> &[Relation] {
        &self.canonical
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    /// The relation behind `model.property`, seen from that property.
    pub fn get(&self, model: &str, property: &str) -> Option<&Relation> {
        self.views.get(model)?.get(property)
    }

    /// Every relation property of `model`, each seen from `model`.
    pub fn for_model<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.views.get(model).into_iter().flat_map(BTreeMap::values)
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// A classified property and its counterpart.
struct Classified<'a> {
    kind: RelationKind,
    foreign: &'a ModelDescriptor,
    counterpart: &'static str,
    identifier: Option<String>,
}

/// Storage names already claimed by discovered relations or models.
#[derive(Default)]
struct TakenNames {
    columns: HashSet<(String, String)>,
    tables: HashSet<String>,
}

/// Classifies relation properties and synthesizes their storage names.
///
/// Discovery is a pure function of the model shapes: models are visited
/// in name order and properties in declaration order, whatever order the
/// descriptors were passed in.
pub struct Discoverer<'a> {
    models: BTreeMap<&'static str, &'a ModelDescriptor>,
}

fn error(
    kind: RelationshipErrorKind,
    model: &ModelDescriptor,
    property: &PropertyDescriptor,
    message: impl Into<String>,
) -> crate::Error {
    RelationshipError::new(kind, model.name, property.name, message).into()
}

impl<'a> Discoverer<'a> {
    pub fn new(models: &[&'a ModelDescriptor]) -> Self {
        Self {
            models: models.iter().map(|m| (m.name, *m)).collect(),
        }
    }

    /// Classify every relation property of every model.
    ///
    /// Fails on the first property that cannot be classified; no partial
    /// result is returned.
    #[tracing::instrument(level = "debug", skip(self), fields(models = self.models.len()))]
    #[allow(clippy::result_large_err)]
    pub fn discover(&self) -> Result<Relations> {
        let mut relations = Relations::default();
        let mut paired: HashMap<(&'static str, &'static str), (&'static str, &'static str)> =
            HashMap::new();
        let mut taken = TakenNames::default();
        for model in self.models.values() {
            taken.tables.insert(model.table_name.clone());
        }

        for model in self.models.values() {
            for property in model.relation_properties() {
                let classified = self.classify(model, property)?;
                let ours = (model.name, property.name);
                let theirs = (classified.foreign.name, classified.counterpart);

                if let Some(existing) = paired.get(&ours) {
                    if *existing != theirs {
                        return Err(error(
                            RelationshipErrorKind::Conflict,
                            model,
                            property,
                            format!(
                                "paired with {}.{} but classifies to {}.{}",
                                existing.0, existing.1, theirs.0, theirs.1
                            ),
                        ));
                    }
                    continue;
                }
                if let Some(claimant) = paired.get(&theirs) {
                    return Err(error(
                        RelationshipErrorKind::Conflict,
                        model,
                        property,
                        format!(
                            "counterpart {}.{} is already paired with {}.{}",
                            theirs.0, theirs.1, claimant.0, claimant.1
                        ),
                    ));
                }

                let relation = self.build(model, property, &classified, &mut taken)?;
                tracing::debug!(
                    model = model.name,
                    property = property.name,
                    kind = ?relation.kind,
                    foreign = relation.foreign_model,
                    counterpart = classified.counterpart,
                    "Discovered relation"
                );
                paired.insert(ours, theirs);
                paired.insert(theirs, ours);
                relations.push(relation);
            }
        }

        tracing::debug!(relations = relations.len(), "Relationship discovery complete");
        Ok(relations)
    }

    #[allow(clippy::result_large_err)]
    fn classify(
        &self,
        local: &ModelDescriptor,
        property: &PropertyDescriptor,
    ) -> Result<Classified<'a>> {
        let target = property.target().unwrap_or_default();
        let Some(foreign) = self.models.get(target).copied() else {
            return Err(error(
                RelationshipErrorKind::UnknownModel,
                local,
                property,
                format!("target model '{target}' is not registered"),
            ));
        };

        let attempts = if property.is_list() {
            [(RelationKind::ManyToMany, true), (RelationKind::ManyToOne, false)]
        } else {
            [(RelationKind::OneToMany, true), (RelationKind::OneToOne, false)]
        };
        let siblings = local
            .relations_to(target)
            .filter(|p| p.is_list() == property.is_list())
            .count();
        let mut unmatched: Option<String> = None;

        for (kind, want_list) in attempts {
            let mut candidates: Vec<&PropertyDescriptor> = foreign
                .relations_to(local.name)
                .filter(|q| q.is_list() == want_list)
                .filter(|q| !(foreign.name == local.name && q.name == property.name))
                .collect();
            let needs_identifier = siblings > 1 || candidates.len() > 1;
            let identifier = || {
                needs_identifier
                    .then(|| naming::link_identifier(property.name, foreign.name))
                    .filter(|ident| !ident.is_empty())
            };
            let found = |q: &PropertyDescriptor, identifier: Option<String>| Classified {
                kind,
                foreign,
                counterpart: q.name,
                identifier,
            };

            if let Some(inverse) = property.inverse {
                if let Some(q) = candidates.iter().find(|q| q.name == inverse) {
                    return Ok(found(*q, identifier()));
                }
                continue;
            }
            if let Some(q) = candidates.iter().find(|q| q.inverse == Some(property.name)) {
                return Ok(found(*q, identifier()));
            }
            // Candidates pointing explicitly at another property are spoken for.
            candidates.retain(|q| q.inverse.is_none());

            match candidates.as_slice() {
                [] => continue,
                [q] if siblings <= 1 => return Ok(found(*q, None)),
                _ => {}
            }

            let ident = naming::link_identifier(property.name, foreign.name);
            let matches: Vec<&&PropertyDescriptor> = candidates
                .iter()
                .filter(|q| naming::contains_identifier(q.name, &ident))
                .collect();
            match matches.as_slice() {
                [q] => return Ok(found(**q, Some(ident))),
                [] => {
                    unmatched = Some(format!(
                        "link identifier '{ident}' matches none of {} on {}",
                        names(&candidates),
                        foreign.name
                    ));
                }
                many => {
                    return Err(error(
                        RelationshipErrorKind::Ambiguous,
                        local,
                        property,
                        format!(
                            "link identifier '{ident}' matches {} properties on {}: {}",
                            many.len(),
                            foreign.name,
                            names(&many.iter().map(|q| **q).collect::<Vec<_>>())
                        ),
                    ));
                }
            }
        }

        Err(match (unmatched, property.inverse) {
            (Some(message), _) => {
                error(RelationshipErrorKind::Ambiguous, local, property, message)
            }
            (None, Some(inverse)) => error(
                RelationshipErrorKind::Unclassified,
                local,
                property,
                format!(
                    "inverse '{inverse}' is not a {} relation property on {}",
                    local.name, foreign.name
                ),
            ),
            (None, None) => error(
                RelationshipErrorKind::Unclassified,
                local,
                property,
                format!(
                    "{} has no property referring back to {}",
                    foreign.name, local.name
                ),
            ),
        })
    }

    #[allow(clippy::result_large_err)]
    fn build(
        &self,
        local: &ModelDescriptor,
        property: &PropertyDescriptor,
        classified: &Classified<'a>,
        taken: &mut TakenNames,
    ) -> Result<Relation> {
        let foreign = classified.foreign;
        let ident = classified.identifier.as_deref();
        let self_referential = local.name == foreign.name;
        let mut relation = Relation {
            kind: classified.kind,
            local_model: local.name,
            foreign_model: foreign.name,
            local_property: property.name,
            foreign_property: Some(classified.counterpart),
            local_table: local.table_name.clone(),
            foreign_table: foreign.table_name.clone(),
            local_singular: local.singular_name.clone(),
            foreign_singular: foreign.singular_name.clone(),
            foreign_key: None,
            pivot: None,
            link_identifier: classified.identifier.clone(),
        };

        // (owner side, holder model, referenced model's singular, holder property)
        let placements: Vec<(Side, &ModelDescriptor, &str, &str)> = match classified.kind {
            RelationKind::ManyToMany => {
                relation.pivot = Some(self.pivot(local, property, foreign, ident, taken)?);
                return Ok(relation);
            }
            RelationKind::ManyToOne => vec![(
                Side::Foreign,
                foreign,
                local.singular_name.as_str(),
                classified.counterpart,
            )],
            RelationKind::OneToMany => vec![(
                Side::Local,
                local,
                foreign.singular_name.as_str(),
                property.name,
            )],
            RelationKind::OneToOne => vec![
                (Side::Local, local, foreign.singular_name.as_str(), property.name),
                (
                    Side::Foreign,
                    foreign,
                    local.singular_name.as_str(),
                    classified.counterpart,
                ),
            ],
        };

        for (owner, holder, referenced, holder_property) in placements {
            let conventional = naming::prefixed(ident, &format!("{referenced}_id"));
            let by_property = format!("{}_id", naming::singularize(holder_property));
            let mut columns = if self_referential {
                vec![by_property, conventional]
            } else {
                vec![conventional, by_property]
            };
            columns.dedup();

            for column in columns {
                let key = (holder.table_name.clone(), column.clone());
                let shadows_scalar = holder.scalar_properties().any(|p| p.name == column);
                if taken.columns.contains(&key) || shadows_scalar {
                    tracing::trace!(table = %key.0, column = %column, "Key column taken");
                    continue;
                }
                taken.columns.insert(key);
                relation.foreign_key = Some(ForeignKey {
                    table: holder.table_name.clone(),
                    column,
                    owner,
                });
                return Ok(relation);
            }
        }

        Err(error(
            RelationshipErrorKind::NameCollision,
            local,
            property,
            "every candidate foreign key column is already in use",
        ))
    }

    #[allow(clippy::result_large_err)]
    fn pivot(
        &self,
        local: &ModelDescriptor,
        property: &PropertyDescriptor,
        foreign: &ModelDescriptor,
        ident: Option<&str>,
        taken: &mut TakenNames,
    ) -> Result<Pivot> {
        let lt = &local.table_name;
        let ft = &foreign.table_name;
        let mut tables = vec![
            naming::prefixed(ident, &format!("{lt}_{ft}")),
            naming::prefixed(ident, &format!("{ft}_{lt}")),
            format!("{lt}_{}", property.name),
        ];
        tables.dedup();

        let Some(table) = tables.into_iter().find(|t| !taken.tables.contains(t)) else {
            return Err(error(
                RelationshipErrorKind::NameCollision,
                local,
                property,
                "every candidate pivot table name is already in use",
            ));
        };
        taken.tables.insert(table.clone());

        let first_column = format!("{}_id", local.singular_name);
        let mut second_column = format!("{}_id", foreign.singular_name);
        if second_column == first_column {
            second_column = format!("{}_id", naming::singularize(property.name));
            if second_column == first_column {
                second_column = format!("related_{}_id", foreign.singular_name);
            }
        }
        Ok(Pivot {
            table,
            first_column,
            second_column,
        })
    }
}

fn names(properties: &[&PropertyDescriptor]) -> String {
    properties
        .iter()
        .map(|p| p.name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::SqlType;

    fn model(name: &'static str) -> ModelDescriptor {
        ModelDescriptor::new(name, "id").property(PropertyDescriptor::scalar("id", SqlType::BigInt))
    }

    fn kind_of(err: &Error) -> RelationshipErrorKind {
        match err {
            Error::UnknownRelationship(e) => e.kind,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn one_list_one_single() {
        let user = model("User").property(PropertyDescriptor::entity_list("cars", "Car"));
        let car = model("Car").property(PropertyDescriptor::entity("user", "User"));
        let relations = Discoverer::new(&[&user, &car]).discover().unwrap();
        assert_eq!(relations.len(), 1);

        // Car sorts first, so the canonical side is Car.user.
        let canonical = &relations.all()[0];
        assert_eq!(canonical.local_property, "user");
        assert_eq!(canonical.kind, RelationKind::OneToMany);
        let fk = canonical.foreign_key.as_ref().unwrap();
        assert_eq!((fk.table.as_str(), fk.column.as_str()), ("cars", "user_id"));
        assert_eq!(fk.owner, Side::Local);

        let cars = relations.get("User", "cars").unwrap();
        assert_eq!(cars.kind, RelationKind::ManyToOne);
        assert!(cars.stores_key_remotely());
        assert_eq!(cars.foreign_property, Some("user"));
    }

    #[test]
    fn views_are_grouped_by_model() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("cars", "Car"))
            .property(PropertyDescriptor::entity("profile", "Profile"));
        let car = model("Car").property(PropertyDescriptor::entity("user", "User"));
        let profile = model("Profile").property(PropertyDescriptor::entity("user", "User"));
        let relations = Discoverer::new(&[&user, &car, &profile]).discover().unwrap();

        let props: Vec<&str> = relations.for_model("User").map(|r| r.local_property).collect();
        assert_eq!(props, vec!["cars", "profile"]);
        assert!(relations.for_model("User").all(|r| r.local_model == "User"));
        assert_eq!(relations.for_model("Nobody").count(), 0);
        assert_eq!(relations.get("Profile", "user").unwrap().foreign_model, "User");
        assert!(relations.get("Car", "profile").is_none());
    }

    #[test]
    fn input_order_does_not_matter() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("old_cars", "Car"))
            .property(PropertyDescriptor::entity_list("new_cars", "Car"))
            .property(PropertyDescriptor::entity_list("tags", "Tag"));
        let car = model("Car")
            .property(PropertyDescriptor::entity("old_user", "User"))
            .property(PropertyDescriptor::entity("new_user", "User"));
        let tag = model("Tag").property(PropertyDescriptor::entity_list("users", "User"));

        let a = Discoverer::new(&[&user, &car, &tag]).discover().unwrap();
        let b = Discoverer::new(&[&tag, &car, &user]).discover().unwrap();
        assert_eq!(a.all(), b.all());
    }

    #[test]
    fn link_identifiers_split_parallel_relations() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("old_cars", "Car"))
            .property(PropertyDescriptor::entity_list("new_cars", "Car"));
        let car = model("Car")
            .property(PropertyDescriptor::entity("old_user", "User"))
            .property(PropertyDescriptor::entity("new_user", "User"));
        let relations = Discoverer::new(&[&user, &car]).discover().unwrap();
        assert_eq!(relations.len(), 2);

        let old = relations.get("User", "old_cars").unwrap();
        let new = relations.get("User", "new_cars").unwrap();
        assert_eq!(old.foreign_property, Some("old_user"));
        assert_eq!(new.foreign_property, Some("new_user"));
        assert_eq!(old.key_column(), Some("old_user_id"));
        assert_eq!(new.key_column(), Some("new_user_id"));
        assert_eq!(old.link_identifier.as_deref(), Some("old"));
    }

    #[test]
    fn missing_counterpart_is_unclassified() {
        let user = model("User").property(PropertyDescriptor::entity_list("cars", "Car"));
        let car = model("Car");
        let err = Discoverer::new(&[&user, &car]).discover().unwrap_err();
        assert_eq!(kind_of(&err), RelationshipErrorKind::Unclassified);
        assert_eq!(err.offending_property(), Some("cars"));
    }

    #[test]
    fn undisambiguated_candidates_fail() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("cars", "Car"))
            .property(PropertyDescriptor::entity_list("bikes", "Car"));
        let car = model("Car")
            .property(PropertyDescriptor::entity("owner", "User"))
            .property(PropertyDescriptor::entity("rider", "User"));
        let err = Discoverer::new(&[&user, &car]).discover().unwrap_err();
        assert_eq!(kind_of(&err), RelationshipErrorKind::Ambiguous);
        assert_eq!(err.offending_property(), Some("owner"));
    }

    #[test]
    fn explicit_inverse_wins() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("cars", "Car"))
            .property(PropertyDescriptor::entity_list("bikes", "Car"));
        let car = model("Car")
            .property(PropertyDescriptor::entity("owner", "User").inverse("cars"))
            .property(PropertyDescriptor::entity("rider", "User").inverse("bikes"));
        let relations = Discoverer::new(&[&user, &car]).discover().unwrap();
        assert_eq!(relations.get("User", "bikes").unwrap().foreign_property, Some("rider"));
        let owner = relations.get("Car", "owner").unwrap().key_column().unwrap();
        let rider = relations.get("Car", "rider").unwrap().key_column().unwrap();
        assert_ne!(owner, rider);
    }

    #[test]
    fn unknown_target_model() {
        let user = model("User").property(PropertyDescriptor::entity("team", "Team"));
        let err = Discoverer::new(&[&user]).discover().unwrap_err();
        assert_eq!(kind_of(&err), RelationshipErrorKind::UnknownModel);
    }

    #[test]
    fn many_to_many_pivot() {
        let post = model("Post").property(PropertyDescriptor::entity_list("tags", "Tag"));
        let tag = model("Tag").property(PropertyDescriptor::entity_list("posts", "Post"));
        let relations = Discoverer::new(&[&post, &tag]).discover().unwrap();
        let tags = relations.get("Post", "tags").unwrap();
        assert_eq!(tags.kind, RelationKind::ManyToMany);
        let pivot = tags.pivot.as_ref().unwrap();
        assert_eq!(pivot.table, "posts_tags");
        assert_eq!(pivot.first_column, "post_id");
        assert_eq!(pivot.second_column, "tag_id");

        let posts = relations.get("Tag", "posts").unwrap().pivot.clone().unwrap();
        assert_eq!(posts.first_column, "tag_id");
    }

    #[test]
    fn parallel_many_to_many_split_by_identifier() {
        let post = model("Post")
            .property(PropertyDescriptor::entity_list("main_tags", "Tag"))
            .property(PropertyDescriptor::entity_list("extra_tags", "Tag"));
        let tag = model("Tag")
            .property(PropertyDescriptor::entity_list("main_posts", "Post"))
            .property(PropertyDescriptor::entity_list("extra_posts", "Post"));
        let archive = model("Archive").table("main_posts_tags");
        let relations = Discoverer::new(&[&post, &tag, &archive]).discover().unwrap();
        assert_eq!(relations.len(), 2);

        let main = relations.get("Post", "main_tags").unwrap();
        assert_eq!(main.foreign_property, Some("main_posts"));
        assert_eq!(main.pivot.as_ref().unwrap().table, "main_tags_posts");
        let extra = relations.get("Post", "extra_tags").unwrap();
        assert_eq!(extra.foreign_property, Some("extra_posts"));
        assert_eq!(extra.pivot.as_ref().unwrap().table, "extra_posts_tags");

        let back = relations.get("Tag", "main_posts").unwrap().pivot.clone().unwrap();
        assert_eq!(back.table, "main_tags_posts");
        assert_eq!(back.first_column, "tag_id");
    }

    #[test]
    fn pivot_name_falls_back_to_property() {
        let post = model("Post").property(PropertyDescriptor::entity_list("labels", "Tag"));
        let tag = model("Tag").property(PropertyDescriptor::entity_list("posts", "Post"));
        let first = model("Legacy").table("posts_tags");
        let second = model("Mirror").table("tags_posts");
        let relations = Discoverer::new(&[&post, &tag, &first, &second]).discover().unwrap();
        let pivot = relations.get("Post", "labels").unwrap().pivot.clone().unwrap();
        assert_eq!(pivot.table, "posts_labels");

        let third = model("Extra").table("posts_labels");
        let err = Discoverer::new(&[&post, &tag, &first, &second, &third])
            .discover()
            .unwrap_err();
        assert_eq!(kind_of(&err), RelationshipErrorKind::NameCollision);
    }

    #[test]
    fn self_referential_tree() {
        let employee = model("Employee")
            .property(PropertyDescriptor::entity("manager", "Employee"))
            .property(PropertyDescriptor::entity_list("reports", "Employee"));
        let relations = Discoverer::new(&[&employee]).discover().unwrap();
        assert_eq!(relations.len(), 1);
        let manager = relations.get("Employee", "manager").unwrap();
        assert_eq!(manager.kind, RelationKind::OneToMany);
        assert_eq!(manager.key_column(), Some("manager_id"));
        assert_eq!(
            relations.get("Employee", "reports").unwrap().kind,
            RelationKind::ManyToOne
        );
    }

    #[test]
    fn self_referential_many_to_many() {
        let user = model("User")
            .property(PropertyDescriptor::entity_list("following", "User"))
            .property(PropertyDescriptor::entity_list("followers", "User").inverse("following"));
        let relations = Discoverer::new(&[&user]).discover().unwrap();
        assert_eq!(relations.len(), 1);
        let pivot = relations.get("User", "following").unwrap().pivot.clone().unwrap();
        assert_eq!(pivot.table, "following_users_users");
        assert_eq!(pivot.first_column, "user_id");
        assert_eq!(pivot.second_column, "following_id");
    }

    #[test]
    fn one_to_one_prefers_local_key() {
        let user = model("User").property(PropertyDescriptor::entity("profile", "Profile"));
        let profile = model("Profile").property(PropertyDescriptor::entity("user", "User"));
        let relations = Discoverer::new(&[&user, &profile]).discover().unwrap();
        let canonical = &relations.all()[0];
        assert_eq!(canonical.local_model, "Profile");
        assert_eq!(canonical.kind, RelationKind::OneToOne);
        assert!(canonical.stores_key_locally());
        assert_eq!(canonical.key_column(), Some("user_id"));
        assert!(relations.get("User", "profile").unwrap().stores_key_remotely());
    }

    #[test]
    fn declared_scalar_shadows_key_column() {
        let user = model("User").property(PropertyDescriptor::entity_list("cars", "Car"));
        let car = model("Car")
            .property(PropertyDescriptor::scalar("user_id", SqlType::Text))
            .property(PropertyDescriptor::entity("driver", "User"));
        let relations = Discoverer::new(&[&user, &car]).discover().unwrap();
        assert_eq!(relations.get("Car", "driver").unwrap().key_column(), Some("driver_id"));
    }

    #[test]
    fn relations_serialize() {
        let post = model("Post").property(PropertyDescriptor::entity_list("tags", "Tag"));
        let tag = model("Tag").property(PropertyDescriptor::entity_list("posts", "Post"));
        let relations = Discoverer::new(&[&post, &tag]).discover().unwrap();
        let json = serde_json::to_value(relations.all()).unwrap();
        assert_eq!(json[0]["kind"], "ManyToMany");
        assert_eq!(json[0]["pivot"]["table"], "posts_tags");
    }
}
