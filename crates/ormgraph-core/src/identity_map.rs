//! Per-graph entity cache.
//!
//! Every entity reachable from one load, save or merge shares a single
//! [`EntityGraph`]: a weak registry of the live instances (so each row
//! maps to one instance per graph) plus a cache of query results (so
//! each distinct relation query runs at most once per graph). Two
//! independently loaded graphs never share this cache; assigning an
//! entity of one graph into a relation slot of another joins them.
//!
//! # Example
//!
//! ```ignore
//! let graph = GraphRef::new();
//! graph.register(&handle);
//!
//! // Same (model, id) resolves to the same live instance
//! let found = graph.find("User", 1).unwrap();
//! assert!(found.ptr_eq(&handle));
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::handle::{EntityHandle, EntityKey, WeakHandle};
use crate::row::Row;

/// The shared state behind a [`GraphRef`].
#[derive(Default)]
pub struct EntityGraph {
    entries: Vec<WeakHandle>,
    keys: HashSet<EntityKey>,
    queries: HashMap<String, Vec<Row>>,
    /// Set once this graph was folded into another one.
    forward: Option<GraphRef>,
}

/// Shared handle to an [`EntityGraph`].
#[derive(Clone, Default)]
pub struct GraphRef(Rc<RefCell<EntityGraph>>);

impl GraphRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// The graph this one was folded into, or itself.
    pub fn root(&self) -> GraphRef {
        let mut current = self.clone();
        loop {
            let next = current.0.borrow().forward.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    pub fn same(&self, other: &GraphRef) -> bool {
        Rc::ptr_eq(&self.root().0, &other.root().0)
    }

    /// Add a live entity; returns false if it was already present.
    pub fn register(&self, handle: &EntityHandle) -> bool {
        let root = self.root();
        let mut graph = root.0.borrow_mut();
        if !graph.keys.insert(handle.key()) {
            return false;
        }
        graph.entries.push(handle.downgrade());
        true
    }

    /// Register `handle` and make its own graph (if any) part of this one.
    ///
    /// An entity that is mutably borrowed further up the call stack is
    /// registered without touching its state.
    pub fn adopt(&self, handle: &EntityHandle) {
        self.register(handle);
        let Ok(mut entity) = handle.borrow_mut() else {
            return;
        };
        let state = entity.entity_state_mut();
        match state.graph_ref() {
            Some(other) if other.same(self) => {}
            Some(other) => self.join(&other),
            None => state.attach_graph(self.root()),
        }
    }

    /// Fold `other` into this graph; both then resolve to the same root.
    pub fn join(&self, other: &GraphRef) {
        let ours = self.root();
        let theirs = other.root();
        if Rc::ptr_eq(&ours.0, &theirs.0) {
            return;
        }
        let moved = {
            let mut graph = theirs.0.borrow_mut();
            graph.keys.clear();
            (
                std::mem::take(&mut graph.entries),
                std::mem::take(&mut graph.queries),
            )
        };
        {
            let mut graph = ours.0.borrow_mut();
            for weak in moved.0 {
                if weak.is_alive() && graph.keys.insert(weak.key()) {
                    graph.entries.push(weak);
                }
            }
            for (key, rows) in moved.1 {
                graph.queries.entry(key).or_insert(rows);
            }
        }
        theirs.0.borrow_mut().forward = Some(ours.clone());
        tracing::trace!(size = ours.len(), "Joined entity graphs");
    }

    /// Find the live instance of `(model, id)`; id 0 never matches.
    pub fn find(&self, model: &str, id: i64) -> Option<EntityHandle> {
        if id <= 0 {
            return None;
        }
        self.entities()
            .into_iter()
            .find(|h| h.model_name() == model && h.try_id() == Some(id))
    }

    /// Live entities in registration order.
    pub fn entities(&self) -> Vec<EntityHandle> {
        let root = self.root();
        let graph = root.0.borrow();
        graph.entries.iter().filter_map(WeakHandle::upgrade).collect()
    }

    pub fn entities_of(&self, model: &str) -> Vec<EntityHandle> {
        self.entities()
            .into_iter()
            .filter(|h| h.model_name() == model)
            .collect()
    }

    /// Rows cached for a query key.
    pub fn cached_query(&self, key: &str) -> Option<Vec<Row>> {
        self.root().0.borrow().queries.get(key).cloned()
    }

    pub fn store_query(&self, key: String, rows: Vec<Row>) {
        self.root().0.borrow_mut().queries.insert(key, rows);
    }

    /// Drop cached rows for a table after writing to it.
    pub fn invalidate_table(&self, table: &str) {
        let prefix = format!("{table}:");
        self.root()
            .0
            .borrow_mut()
            .queries
            .retain(|key, _| !key.starts_with(&prefix));
    }

    /// Forget dropped entities.
    pub fn prune(&self) {
        let root = self.root();
        let mut graph = root.0.borrow_mut();
        graph.entries.retain(WeakHandle::is_alive);
        let live: HashSet<EntityKey> = graph.entries.iter().map(WeakHandle::key).collect();
        graph.keys = live;
    }

    /// Number of registered entries (including dropped ones not yet pruned).
    pub fn len(&self) -> usize {
        self.root().0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for GraphRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.root();
        let graph = root.0.borrow();
        f.debug_struct("GraphRef")
            .field("entities", &graph.entries.len())
            .field("queries", &graph.queries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::share;
    use crate::model::Entity;
    use crate::test_support::node;

    #[test]
    fn shared_entities_register_themselves() {
        let a = share(node(1, "a"));
        let graph = a.borrow().state().graph_ref().unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.find("Node", 1).is_some());
        assert!(graph.find("Node", 2).is_none());
        assert!(graph.find("Other", 1).is_none());
    }

    #[test]
    fn id_zero_never_matches() {
        let a = share(node(0, "a"));
        let graph = a.borrow().state().graph_ref().unwrap();
        assert!(graph.find("Node", 0).is_none());
    }

    #[test]
    fn adopt_joins_graphs() {
        let a = share(node(1, "a"));
        let b = share(node(2, "b"));
        let ga = a.borrow().state().graph_ref().unwrap();
        let gb = b.borrow().state().graph_ref().unwrap();
        assert!(!ga.same(&gb));

        gb.store_query("nodes:id = 9".to_string(), Vec::new());
        ga.adopt(&EntityHandle::new(&b));

        assert!(ga.same(&gb));
        assert_eq!(ga.entities().len(), 2);
        assert!(gb.find("Node", 1).is_some());
        assert!(ga.cached_query("nodes:id = 9").is_some());
    }

    #[test]
    fn invalidation_is_per_table() {
        let graph = GraphRef::new();
        graph.store_query("nodes:id = 1".to_string(), Vec::new());
        graph.store_query("tags:id = 1".to_string(), Vec::new());
        graph.invalidate_table("nodes");
        assert!(graph.cached_query("nodes:id = 1").is_none());
        assert!(graph.cached_query("tags:id = 1").is_some());
    }

    #[test]
    fn prune_drops_dead_entries() {
        let graph = GraphRef::new();
        {
            let a = share(node(1, "a"));
            graph.register(&EntityHandle::new(&a));
            assert_eq!(graph.entities().len(), 1);
        }
        assert!(graph.entities().is_empty());
        assert_eq!(graph.len(), 1);
        graph.prune();
        assert!(graph.is_empty());
    }
}
