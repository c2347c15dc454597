//! Shared, type-erased entity handles.
//!
//! Entities in a live graph are shared through `Rc<RefCell<T>>`
//! ([`Shared`]). The save and merge engines walk graphs of mixed model
//! types, so they work with [`EntityHandle`], which erases the concrete
//! type but keeps reference identity ([`EntityKey`]) for cycle detection.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::Result;
use crate::error::Error;
use crate::model::{Entity, EntityHooks, ModelDescriptor};
use crate::state::EntityState;
use crate::value::Value;

/// A shared, mutable entity.
pub type Shared<T> = Rc<RefCell<T>>;

/// Wrap an entity for use in a graph.
///
/// The entity is registered in its own graph cache, so related entities
/// assigned later can be found without a query.
pub fn share<T: Entity>(entity: T) -> Shared<T> {
    let shared = Rc::new(RefCell::new(entity));
    let handle = EntityHandle::new(&shared);
    let graph = shared.borrow_mut().state_mut().graph();
    graph.register(&handle);
    shared
}

/// Object-safe view of an [`Entity`].
pub trait DynEntity: Any {
    fn model(&self) -> &'static ModelDescriptor;
    fn entity_state(&self) -> &EntityState;
    fn entity_state_mut(&mut self) -> &mut EntityState;
    fn entity_id(&self) -> i64;
    fn assign_id(&mut self, id: i64);
    fn read_column(&self, property: &str) -> Option<Value>;
    #[allow(clippy::result_large_err)]
    fn write_column(&mut self, property: &str, value: &Value) -> Result<()>;
    fn read_link(&self, property: &str) -> Option<Link>;
    #[allow(clippy::result_large_err)]
    fn write_link(&mut self, property: &str, link: Link) -> Result<()>;
    fn hooks_mut(&mut self) -> &mut dyn EntityHooks;
}

impl<T: Entity> DynEntity for T {
    fn model(&self) -> &'static ModelDescriptor {
        T::descriptor()
    }

    fn entity_state(&self) -> &EntityState {
        Entity::state(self)
    }

    fn entity_state_mut(&mut self) -> &mut EntityState {
        Entity::state_mut(self)
    }

    fn entity_id(&self) -> i64 {
        Entity::id(self)
    }

    fn assign_id(&mut self, id: i64) {
        Entity::set_id(self, id);
    }

    fn read_column(&self, property: &str) -> Option<Value> {
        Entity::column(self, property)
    }

    fn write_column(&mut self, property: &str, value: &Value) -> Result<()> {
        Entity::set_column(self, property, value)
    }

    fn read_link(&self, property: &str) -> Option<Link> {
        Entity::link(self, property)
    }

    fn write_link(&mut self, property: &str, link: Link) -> Result<()> {
        Entity::set_link(self, property, link)
    }

    fn hooks_mut(&mut self) -> &mut dyn EntityHooks {
        self
    }
}

/// Reference identity of a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

/// A type-erased, reference-counted entity.
#[derive(Clone)]
pub struct EntityHandle {
    node: Rc<RefCell<dyn DynEntity>>,
    any: Rc<dyn Any>,
    descriptor: &'static ModelDescriptor,
}

impl EntityHandle {
    pub fn new<T: Entity>(shared: &Shared<T>) -> Self {
        let node: Rc<RefCell<dyn DynEntity>> = shared.clone();
        let any: Rc<dyn Any> = shared.clone();
        Self {
            node,
            any,
            descriptor: T::descriptor(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey(Rc::as_ptr(&self.any).cast::<()>() as usize)
    }

    pub fn descriptor(&self) -> &'static ModelDescriptor {
        self.descriptor
    }

    pub fn model_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        self.key() == other.key()
    }

    #[allow(clippy::result_large_err)]
    pub fn borrow(&self) -> Result<Ref<'_, dyn DynEntity>> {
        self.node
            .try_borrow()
            .map_err(|_| Error::borrowed(self.descriptor.name))
    }

    #[allow(clippy::result_large_err)]
    pub fn borrow_mut(&self) -> Result<RefMut<'_, dyn DynEntity>> {
        self.node
            .try_borrow_mut()
            .map_err(|_| Error::borrowed(self.descriptor.name))
    }

    /// Primary key, or `None` while the entity is mutably borrowed.
    pub fn try_id(&self) -> Option<i64> {
        self.node.try_borrow().ok().map(|e| e.entity_id())
    }

    #[allow(clippy::result_large_err)]
    pub fn id(&self) -> Result<i64> {
        Ok(self.borrow()?.entity_id())
    }

    /// Recover the concrete shared entity.
    pub fn downcast<T: Entity>(&self) -> Option<Shared<T>> {
        Rc::downcast::<RefCell<T>>(self.any.clone()).ok()
    }

    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            node: Rc::downgrade(&self.node),
            any: Rc::downgrade(&self.any),
            descriptor: self.descriptor,
            key: self.key(),
        }
    }
}

impl<T: Entity> From<&Shared<T>> for EntityHandle {
    fn from(shared: &Shared<T>) -> Self {
        EntityHandle::new(shared)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_id() {
            Some(id) => write!(f, "{}#{}", self.descriptor.name, id),
            None => write!(f, "{}#<borrowed>", self.descriptor.name),
        }
    }
}

/// Non-owning counterpart of [`EntityHandle`].
#[derive(Clone)]
pub struct WeakHandle {
    node: Weak<RefCell<dyn DynEntity>>,
    any: Weak<dyn Any>,
    descriptor: &'static ModelDescriptor,
    key: EntityKey,
}

impl WeakHandle {
    pub fn upgrade(&self) -> Option<EntityHandle> {
        Some(EntityHandle {
            node: self.node.upgrade()?,
            any: self.any.upgrade()?,
            descriptor: self.descriptor,
        })
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn model_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakHandle({}, alive={})", self.descriptor.name, self.is_alive())
    }
}

/// Type-erased contents of a relation slot.
#[derive(Debug, Clone, Default)]
pub enum Link {
    /// Never loaded nor assigned; resolve lazily.
    #[default]
    Unloaded,
    /// A singular relation, possibly empty.
    One(Option<EntityHandle>),
    /// A list relation.
    Many(Vec<EntityHandle>),
}

impl Link {
    pub fn is_loaded(&self) -> bool {
        !matches!(self, Link::Unloaded)
    }

    /// Every entity the slot refers to.
    pub fn handles(&self) -> &[EntityHandle] {
        match self {
            Link::Unloaded | Link::One(None) => &[],
            Link::One(Some(h)) => std::slice::from_ref(h),
            Link::Many(items) => items,
        }
    }

    /// Does the slot refer to `handle` (by identity)?
    pub fn contains(&self, handle: &EntityHandle) -> bool {
        self.handles().iter().any(|h| h.ptr_eq(handle))
    }

    /// Ids of the referenced entities that are already persisted.
    pub fn persisted_ids(&self) -> Vec<i64> {
        self.handles()
            .iter()
            .filter_map(EntityHandle::try_id)
            .filter(|id| *id > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Node, node};

    #[test]
    fn identity_survives_erasure() {
        let a = share(node(1, "a"));
        let h1 = EntityHandle::new(&a);
        let h2 = EntityHandle::new(&a.clone());
        assert!(h1.ptr_eq(&h2));
        assert_eq!(h1.key(), h2.key());
        assert_eq!(h1.model_name(), "Node");

        let b = share(node(1, "a"));
        assert!(!h1.ptr_eq(&EntityHandle::new(&b)));
    }

    #[test]
    fn downcast_recovers_shared() {
        let a = share(node(4, "a"));
        let h = EntityHandle::new(&a);
        let back = h.downcast::<Node>().unwrap();
        assert!(Rc::ptr_eq(&a, &back));
    }

    #[test]
    fn borrow_conflicts_are_errors() {
        let a = share(node(2, "a"));
        let h = EntityHandle::new(&a);
        let guard = a.borrow_mut();
        assert!(h.borrow().is_err());
        assert_eq!(h.try_id(), None);
        assert_eq!(format!("{h:?}"), "Node#<borrowed>");
        drop(guard);
        assert_eq!(h.id().unwrap(), 2);
    }

    #[test]
    fn weak_handles_expire() {
        let weak = {
            let a = share(node(3, "a"));
            let weak = EntityHandle::new(&a).downgrade();
            assert!(weak.upgrade().is_some());
            weak
        };
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn link_helpers() {
        let a = share(node(5, "a"));
        let b = share(Node::default());
        let link = Link::Many(vec![EntityHandle::new(&a), EntityHandle::new(&b)]);
        assert!(link.contains(&EntityHandle::new(&b)));
        assert_eq!(link.persisted_ids(), vec![5]);
        assert!(Link::Unloaded.handles().is_empty());
        assert!(!Link::Unloaded.is_loaded());
    }
}
