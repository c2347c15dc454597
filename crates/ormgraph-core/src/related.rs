//! Typed relation slots.
//!
//! A relation field on an entity is either a [`Related<T>`] (single
//! entity) or a [`RelatedMany<T>`] (list of entities). Each slot knows
//! whether it was loaded: an unloaded slot is resolved lazily on first
//! access and the result is cached in the slot.

use std::fmt;
use std::rc::Rc;

use crate::Result;
use crate::error::Error;
use crate::handle::{EntityHandle, Link, Shared};
use crate::model::Entity;

/// Conversion between a typed slot and its type-erased [`Link`].
pub trait RelationSlot {
    fn to_link(&self) -> Link;

    #[allow(clippy::result_large_err)]
    fn assign(&mut self, owner: &'static str, property: &str, link: Link) -> Result<()>;
}

fn downcast_one<T: Entity>(
    owner: &'static str,
    property: &str,
    handle: &EntityHandle,
) -> Result<Shared<T>> {
    handle.downcast::<T>().ok_or_else(|| {
        Error::link_mismatch(
            owner,
            property,
            format!(
                "expected {} but got {}",
                T::MODEL_NAME,
                handle.model_name()
            ),
        )
    })
}

/// A single related entity.
///
/// - **Unloaded**: never assigned nor resolved
/// - **Loaded**: resolved or assigned, possibly to nothing
pub struct Related<T> {
    loaded: Option<Option<Shared<T>>>,
}

impl<T: Entity> Related<T> {
    /// A slot that resolves lazily.
    #[must_use]
    pub const fn unloaded() -> Self {
        Self { loaded: None }
    }

    /// A loaded slot that holds nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self { loaded: Some(None) }
    }

    /// A loaded slot holding `entity`.
    #[must_use]
    pub fn new(entity: Shared<T>) -> Self {
        Self {
            loaded: Some(Some(entity)),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// The held entity (None if unloaded or loaded as null).
    #[must_use]
    pub fn get(&self) -> Option<&Shared<T>> {
        self.loaded.as_ref().and_then(Option::as_ref)
    }

    pub fn set(&mut self, entity: Option<Shared<T>>) {
        self.loaded = Some(entity);
    }

    pub fn clear(&mut self) {
        self.loaded = Some(None);
    }
}

impl<T: Entity> RelationSlot for Related<T> {
    fn to_link(&self) -> Link {
        match &self.loaded {
            None => Link::Unloaded,
            Some(entity) => Link::One(entity.as_ref().map(EntityHandle::new)),
        }
    }

    fn assign(&mut self, owner: &'static str, property: &str, link: Link) -> Result<()> {
        self.loaded = match link {
            Link::Unloaded => None,
            Link::One(None) => Some(None),
            Link::One(Some(handle)) => Some(Some(downcast_one::<T>(owner, property, &handle)?)),
            Link::Many(_) => {
                return Err(Error::link_mismatch(
                    owner,
                    property,
                    "cannot assign a list to a single-entity slot",
                ));
            }
        };
        Ok(())
    }
}

impl<T: Entity> Default for Related<T> {
    fn default() -> Self {
        Self::unloaded()
    }
}

impl<T> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            loaded: self.loaded.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loaded {
            None => write!(f, "Related<{}>(unloaded)", T::MODEL_NAME),
            Some(None) => write!(f, "Related<{}>(none)", T::MODEL_NAME),
            Some(Some(entity)) => write!(f, "Related({:?})", EntityHandle::new(entity)),
        }
    }
}

/// A list of related entities.
pub struct RelatedMany<T> {
    loaded: Option<Vec<Shared<T>>>,
}

impl<T: Entity> RelatedMany<T> {
    /// A list that resolves lazily.
    #[must_use]
    pub const fn unloaded() -> Self {
        Self { loaded: None }
    }

    /// A loaded list.
    #[must_use]
    pub fn new(items: Vec<Shared<T>>) -> Self {
        Self {
            loaded: Some(items),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// The loaded items; empty while unloaded.
    #[must_use]
    pub fn items(&self) -> &[Shared<T>] {
        self.loaded.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shared<T>> {
        self.items().iter()
    }

    /// Append an entity.
    ///
    /// On an unloaded list this starts a list of additions: until the list
    /// is resolved or saved it holds only the pushed entities.
    pub fn push(&mut self, entity: Shared<T>) {
        self.loaded.get_or_insert_with(Vec::new).push(entity);
    }

    /// Remove an entity by identity; returns whether it was present.
    pub fn remove(&mut self, entity: &Shared<T>) -> bool {
        let Some(items) = &mut self.loaded else {
            return false;
        };
        let before = items.len();
        items.retain(|e| !Rc::ptr_eq(e, entity));
        items.len() != before
    }

    pub fn set(&mut self, items: Vec<Shared<T>>) {
        self.loaded = Some(items);
    }
}

impl<T: Entity> RelationSlot for RelatedMany<T> {
    fn to_link(&self) -> Link {
        match &self.loaded {
            None => Link::Unloaded,
            Some(items) => Link::Many(items.iter().map(EntityHandle::new).collect()),
        }
    }

    fn assign(&mut self, owner: &'static str, property: &str, link: Link) -> Result<()> {
        self.loaded = match link {
            Link::Unloaded => None,
            Link::Many(handles) => Some(
                handles
                    .iter()
                    .map(|h| downcast_one::<T>(owner, property, h))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Link::One(_) => {
                return Err(Error::link_mismatch(
                    owner,
                    property,
                    "cannot assign a single entity to a list slot",
                ));
            }
        };
        Ok(())
    }
}

impl<T: Entity> Default for RelatedMany<T> {
    fn default() -> Self {
        Self::unloaded()
    }
}

impl<T> Clone for RelatedMany<T> {
    fn clone(&self) -> Self {
        Self {
            loaded: self.loaded.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for RelatedMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loaded {
            None => write!(f, "RelatedMany<{}>(unloaded)", T::MODEL_NAME),
            Some(items) => f
                .debug_list()
                .entries(items.iter().map(EntityHandle::new))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::share;
    use crate::test_support::{Node, node};

    #[test]
    fn related_states() {
        let mut slot: Related<Node> = Related::default();
        assert!(!slot.is_loaded());
        assert!(matches!(slot.to_link(), Link::Unloaded));

        slot.clear();
        assert!(slot.is_loaded());
        assert!(matches!(slot.to_link(), Link::One(None)));

        let a = share(node(1, "a"));
        slot.set(Some(a.clone()));
        assert!(Rc::ptr_eq(slot.get().unwrap(), &a));
    }

    #[test]
    fn assign_round_trips_through_link() {
        let a = share(node(1, "a"));
        let mut list: RelatedMany<Node> = RelatedMany::unloaded();
        list.assign("Node", "children", Link::Many(vec![EntityHandle::new(&a)]))
            .unwrap();
        assert_eq!(list.len(), 1);

        let err = list
            .assign("Node", "children", Link::One(None))
            .unwrap_err();
        assert!(matches!(err, Error::Graph(_)));
    }

    #[test]
    fn push_and_remove_by_identity() {
        let a = share(node(1, "a"));
        let b = share(node(1, "a"));
        let mut list = RelatedMany::new(vec![a.clone()]);
        list.push(b.clone());
        assert_eq!(list.len(), 2);
        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert!(Rc::ptr_eq(&list.items()[0], &b));
    }

    #[test]
    fn debug_does_not_recurse() {
        let parent = share(node(1, "p"));
        let child = share(node(2, "c"));
        child.borrow_mut().parent = Related::new(parent.clone());
        parent.borrow_mut().children = RelatedMany::new(vec![child.clone()]);
        assert_eq!(format!("{:?}", parent.borrow().children), "[Node#2]");
        assert_eq!(format!("{:?}", child.borrow().parent), "Related(Node#1)");
    }
}
