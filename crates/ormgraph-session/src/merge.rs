//! Folding a detached entity graph into a persisted one.
//!
//! Merge copies what the caller changed on `updated` onto `existing` and
//! recurses through relation slots. It never writes to storage: the
//! caller saves the result when persistence is wanted.
//!
//! Only properties in `updated`'s modified set are considered. Primary
//! keys and managed timestamps are never copied. Lists only grow: existing
//! members with no updated counterpart are kept.

use std::collections::HashMap;

use ormgraph_core::{
    Entity, EntityHandle, EntityKey, Error, Link, PropertyKind, Result, Shared, Storage, Value,
};

use crate::Database;

/// Which merge target each `updated` entity was folded into.
#[derive(Default)]
struct MergeContext {
    seen: HashMap<EntityKey, EntityHandle>,
    copied: usize,
}

impl<S: Storage> Database<S> {
    /// Merge `updated` into `existing` and return the merged entity.
    ///
    /// With no `existing` entity, `updated` itself is the result.
    #[allow(clippy::result_large_err)]
    pub fn merge<T: Entity>(
        &self,
        updated: &Shared<T>,
        existing: Option<&Shared<T>>,
    ) -> Result<Shared<T>> {
        let merged = self.merge_handle(
            &EntityHandle::new(updated),
            existing.map(EntityHandle::new),
        )?;
        merged
            .downcast::<T>()
            .ok_or_else(|| Error::Custom(format!("merge produced a non-{} entity", T::MODEL_NAME)))
    }

    /// Type-erased [`merge`](Self::merge).
    #[tracing::instrument(level = "debug", skip_all, fields(model = updated.model_name()))]
    #[allow(clippy::result_large_err)]
    pub fn merge_handle(
        &self,
        updated: &EntityHandle,
        existing: Option<EntityHandle>,
    ) -> Result<EntityHandle> {
        let mut cx = MergeContext::default();
        let merged = self.merge_entity(updated, existing, &mut cx)?;
        if let Some(graph) = merged.borrow()?.entity_state().graph_ref() {
            graph.prune();
        }
        tracing::debug!(
            entities = cx.seen.len(),
            copied = cx.copied,
            "Merge complete"
        );
        Ok(merged)
    }

    #[allow(clippy::result_large_err)]
    fn merge_entity(
        &self,
        updated: &EntityHandle,
        existing: Option<EntityHandle>,
        cx: &mut MergeContext,
    ) -> Result<EntityHandle> {
        if let Some(target) = cx.seen.get(&updated.key()) {
            tracing::trace!(entity = ?updated, "Already merged");
            return Ok(target.clone());
        }
        let Some(existing) = existing.filter(|e| !e.ptr_eq(updated)) else {
            cx.seen.insert(updated.key(), updated.clone());
            return Ok(updated.clone());
        };
        cx.seen.insert(updated.key(), existing.clone());

        let model = updated.descriptor();
        let modified: Vec<&'static str> = updated
            .borrow()?
            .entity_state()
            .modified()
            .iter()
            .copied()
            .filter(|p| *p != model.primary_key && !model.is_timestamp(p))
            .collect();

        for property in modified {
            let Some(descriptor) = model.property_named(property) else {
                continue;
            };
            match descriptor.kind {
                PropertyKind::Scalar(_) => {
                    let value = updated.borrow()?.read_column(property).unwrap_or(Value::Null);
                    let mut target = existing.borrow_mut()?;
                    let current = target.read_column(property).unwrap_or(Value::Null);
                    if current == value {
                        continue;
                    }
                    target.write_column(property, &value)?;
                    target.entity_state_mut().record_assignment(property, current);
                    cx.copied += 1;
                }
                PropertyKind::Entity { .. } => {
                    self.merge_one(updated, &existing, property, cx)?;
                }
                PropertyKind::EntityList { .. } => {
                    self.merge_many(updated, &existing, property, cx)?;
                }
            }
        }
        Ok(existing)
    }

    #[allow(clippy::result_large_err)]
    fn merge_one(
        &self,
        updated: &EntityHandle,
        existing: &EntityHandle,
        property: &'static str,
        cx: &mut MergeContext,
    ) -> Result<()> {
        let link = updated.borrow()?.read_link(property).unwrap_or_default();
        let replacement = match link {
            Link::Unloaded | Link::Many(_) => return Ok(()),
            Link::One(None) => None,
            Link::One(Some(nested)) => {
                let nested_id = nested.id()?;
                if nested_id == 0 {
                    Some(nested)
                } else {
                    let current = self.resolve(existing, property)?;
                    let counterpart = current
                        .handles()
                        .iter()
                        .find(|h| h.try_id() == Some(nested_id))
                        .cloned()
                        .or_else(|| {
                            existing
                                .borrow()
                                .ok()
                                .and_then(|e| e.entity_state().graph_ref())
                                .and_then(|g| g.find(nested.model_name(), nested_id))
                        });
                    let merged = self.merge_entity(&nested, counterpart, cx)?;
                    if current.contains(&merged) {
                        return Ok(());
                    }
                    Some(merged)
                }
            }
        };
        assign_link(existing, property, Link::One(replacement))
    }

    #[allow(clippy::result_large_err)]
    fn merge_many(
        &self,
        updated: &EntityHandle,
        existing: &EntityHandle,
        property: &'static str,
        cx: &mut MergeContext,
    ) -> Result<()> {
        let Some(Link::Many(items)) = updated.borrow()?.read_link(property) else {
            return Ok(());
        };
        let current = self.resolve(existing, property)?;
        let mut list = current.handles().to_vec();
        let before = list.len();
        for item in items {
            let id = item.id()?;
            let counterpart = if id > 0 {
                list.iter().find(|h| h.try_id() == Some(id)).cloned()
            } else {
                None
            };
            let merged = self.merge_entity(&item, counterpart, cx)?;
            if !list.iter().any(|h| h.ptr_eq(&merged)) {
                list.push(merged);
            }
        }
        if list.len() == before {
            return Ok(());
        }
        tracing::trace!(property, added = list.len() - before, "Extended list");
        assign_link(existing, property, Link::Many(list))
    }
}

#[allow(clippy::result_large_err)]
fn assign_link(target: &EntityHandle, property: &'static str, link: Link) -> Result<()> {
    let mut entity = target.borrow_mut()?;
    let old = entity.read_link(property).unwrap_or_default();
    entity.write_link(property, link.clone())?;
    entity
        .entity_state_mut()
        .record_link_assignment(property, &old, &link);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Car, Tag, User, car, database, tag, user};
    use ormgraph_core::share;
    use std::rc::Rc;

    #[test]
    fn missing_existing_returns_updated() {
        let db = database();
        let u = share(user("ada"));
        let merged = db.merge(&u, None).unwrap();
        assert!(Rc::ptr_eq(&merged, &u));
    }

    #[test]
    fn copies_only_modified_scalars() {
        let db = database();
        let existing = share(user("ada"));
        db.save(&existing).unwrap();
        let existing = db.find::<User>(1).unwrap().unwrap();

        let mut patch = User {
            id: 1,
            email: Some("x@y".to_string()),
            updated: 99,
            ..user("ignored")
        };
        patch.set_name("grace".to_string());
        patch.set_updated(5);
        let merged = db.merge(&share(patch), Some(&existing)).unwrap();
        assert!(Rc::ptr_eq(&merged, &existing));

        let u = merged.borrow();
        assert_eq!(u.name, "grace");
        assert_eq!(u.email, None);
        assert_eq!(u.updated, 1_000);
        assert!(u.state.is_modified("name"));
        assert_eq!(db.storage().statements().len(), 1, "merge must not write");
    }

    #[test]
    fn list_members_merge_by_id_and_new_ones_append() {
        let db = database();
        let existing = share(user("ada"));
        let (a, b) = (share(car("a")), share(car("b")));
        existing.borrow_mut().set_cars(vec![a.clone(), b.clone()]);
        db.save(&existing).unwrap();

        let mut renamed = Car { id: a.borrow().id, ..car("a") };
        renamed.set_model("a2".to_string());
        let fresh = share(car("c"));
        let mut patch = User { id: 1, ..user("ada") };
        patch.set_cars(vec![share(renamed), fresh.clone()]);

        db.merge(&share(patch), Some(&existing)).unwrap();
        let cars = existing.borrow().cars.items().to_vec();
        assert_eq!(cars.len(), 3);
        assert!(Rc::ptr_eq(&cars[0], &a));
        assert_eq!(a.borrow().model, "a2");
        assert!(Rc::ptr_eq(&cars[1], &b));
        assert!(Rc::ptr_eq(&cars[2], &fresh));
    }

    #[test]
    fn shared_member_reached_twice_merges_once() {
        let db = database();
        let existing = share(car("t"));
        let x = share(tag("x"));
        existing.borrow_mut().set_tags(vec![x.clone()]);
        db.save(&existing).unwrap();

        let mut patch_tag = Tag { id: x.borrow().id, ..tag("x") };
        patch_tag.set_label("y".to_string());
        let patch_tag = share(patch_tag);
        let mut patch = Car { id: 1, ..car("t") };
        patch.set_tags(vec![patch_tag.clone(), patch_tag]);

        db.merge(&share(patch), Some(&existing)).unwrap();
        let tags = existing.borrow().tags.items().to_vec();
        assert_eq!(tags.len(), 1);
        assert_eq!(x.borrow().label, "y");
    }

    #[test]
    fn singular_with_new_entity_replaces_slot() {
        let db = database();
        let owner = share(user("a"));
        let existing = share(car("t"));
        existing.borrow_mut().set_user(Some(owner));
        db.save(&existing).unwrap();

        let replacement = share(user("b"));
        let mut patch = Car { id: 1, ..car("t") };
        patch.set_user(Some(replacement.clone()));
        db.merge(&share(patch), Some(&existing)).unwrap();
        let current = existing.borrow().user.get().cloned().unwrap();
        assert!(Rc::ptr_eq(&current, &replacement));

        db.save(&existing).unwrap();
        assert_eq!(db.storage().rows("users").len(), 2);
    }

    #[test]
    fn unchanged_round_trip_writes_nothing() {
        let db = database();
        let u = share(user("ada"));
        db.save(&u).unwrap();
        db.storage().clear_log();

        let fresh = db.find::<User>(1).unwrap().unwrap();
        let reloaded = db.find::<User>(1).unwrap().unwrap();
        let merged = db.merge(&reloaded, Some(&fresh)).unwrap();
        assert!(!merged.borrow().state.has_changes());
        db.save(&merged).unwrap();
        assert!(db.storage().statements().is_empty());
    }

    #[test]
    fn merge_forgets_dropped_graph_members() {
        let db = database();
        let owner = share(user("ada"));
        owner.borrow_mut().set_cars(vec![share(car("a")), share(car("b"))]);
        db.save(&owner).unwrap();

        let existing = db.find::<User>(1).unwrap().unwrap();
        db.load_many::<User, Car>(&existing, "cars").unwrap();
        existing.borrow_mut().set_cars(Vec::new());
        let graph = existing.borrow_mut().state.graph();
        assert_eq!(graph.len(), 3);

        let mut patch = User { id: 1, ..user("ada") };
        patch.set_name("grace".to_string());
        db.merge(&share(patch), Some(&existing)).unwrap();
        assert_eq!(graph.len(), 1);
    }
}
