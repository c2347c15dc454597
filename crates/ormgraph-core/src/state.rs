//! Per-instance change tracking.
//!
//! Every entity owns an [`EntityState`]. It records the original value
//! of each property the first time it is assigned, which properties were
//! modified since the last save, whether the instance was hydrated from
//! a row, the last row read or written, and the graph cache the entity
//! belongs to.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::handle::Link;
use crate::identity_map::GraphRef;
use crate::row::Row;
use crate::value::Value;

/// What a relation slot held when it was last loaded or saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSnapshot {
    /// The ids of the persisted entities referenced at snapshot time.
    Known(BTreeSet<i64>),
    /// The slot was never loaded, so storage is the only source of truth.
    Unknown,
    /// The slot was edited in place before it was loaded: its items are
    /// additions to whatever storage holds, and nothing was removed.
    Appended,
}

impl LinkSnapshot {
    pub fn of(link: &Link) -> Self {
        match link {
            Link::Unloaded => LinkSnapshot::Unknown,
            loaded => LinkSnapshot::Known(loaded.persisted_ids().into_iter().collect()),
        }
    }
}

/// Change-tracking state embedded in every entity.
#[derive(Clone, Default)]
pub struct EntityState {
    original: BTreeMap<&'static str, Value>,
    original_links: BTreeMap<&'static str, LinkSnapshot>,
    modified: BTreeSet<&'static str>,
    hydrated: bool,
    db_record: Option<Row>,
    graph: Option<GraphRef>,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the entity was constructed from a storage row.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn is_modified(&self, property: &str) -> bool {
        self.modified.contains(property)
    }

    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty()
    }

    /// Properties assigned since the last successful save.
    pub fn modified(&self) -> &BTreeSet<&'static str> {
        &self.modified
    }

    /// Snapshot of a scalar property.
    pub fn original(&self, property: &str) -> Option<&Value> {
        self.original.get(property)
    }

    pub fn originals(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.original.iter().map(|(k, v)| (*k, v))
    }

    /// Snapshot of a relation slot.
    pub fn original_link(&self, property: &str) -> Option<&LinkSnapshot> {
        self.original_links.get(property)
    }

    /// Last row read from or written to storage.
    pub fn db_record(&self) -> Option<&Row> {
        self.db_record.as_ref()
    }

    /// A column of the last known row.
    pub fn db_value(&self, column: &str) -> Option<&Value> {
        self.db_record.as_ref().and_then(|r| r.get_by_name(column))
    }

    /// Record an assignment to a scalar property.
    ///
    /// `old` is kept as the original only on the first assignment since
    /// the last save.
    pub fn record_assignment(&mut self, property: &'static str, old: Value) {
        self.original.entry(property).or_insert(old);
        self.modified.insert(property);
    }

    /// Record an assignment to a relation slot and fold the newly
    /// referenced entities into this entity's graph cache.
    ///
    /// Replacing a list that was only appended to discards the additions
    /// marker: the new contents replace the stored relation.
    pub fn record_link_assignment(&mut self, property: &'static str, old: &Link, new: &Link) {
        let snapshot = self
            .original_links
            .entry(property)
            .or_insert_with(|| LinkSnapshot::of(old));
        if *snapshot == LinkSnapshot::Appended {
            *snapshot = LinkSnapshot::Unknown;
        }
        self.modified.insert(property);
        let graph = self.graph();
        for handle in new.handles() {
            graph.adopt(handle);
        }
    }

    /// Record an in-place edit of a list slot.
    ///
    /// An unloaded list is snapshotted as [`LinkSnapshot::Appended`], so a
    /// save adds the new members and keeps the stored ones.
    pub fn record_list_edit(&mut self, property: &'static str, current: &Link) {
        let snapshot = match current {
            Link::Unloaded => LinkSnapshot::Appended,
            loaded => LinkSnapshot::of(loaded),
        };
        self.original_links.entry(property).or_insert(snapshot);
        self.modified.insert(property);
        let graph = self.graph();
        for handle in current.handles() {
            graph.adopt(handle);
        }
    }

    /// Is `property` a list that was appended to without being loaded?
    pub fn is_appended(&self, property: &str) -> bool {
        self.original_links.get(property) == Some(&LinkSnapshot::Appended)
    }

    /// Remember what a lazily resolved slot held when it was loaded.
    pub fn set_original_link(&mut self, property: &'static str, snapshot: LinkSnapshot) {
        self.original_links.insert(property, snapshot);
    }

    /// Flag as hydrated from `row` with the given scalar snapshot.
    pub fn mark_hydrated(&mut self, row: Row, snapshot: BTreeMap<&'static str, Value>) {
        self.hydrated = true;
        self.db_record = Some(row);
        self.original = snapshot;
        self.original_links.clear();
        self.modified.clear();
    }

    /// Fold written columns into the last known row.
    pub fn update_db_record<'a, I>(&mut self, columns: I)
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let row = match &self.db_record {
            Some(row) => row.merged(columns),
            None => Row::from_pairs(columns.into_iter().map(|(c, v)| (c, v.clone()))),
        };
        self.db_record = Some(row);
    }

    /// Reset tracking after a successful save.
    pub fn commit(
        &mut self,
        scalars: BTreeMap<&'static str, Value>,
        links: BTreeMap<&'static str, LinkSnapshot>,
    ) {
        self.original = scalars;
        self.original_links = links;
        self.modified.clear();
    }

    /// The graph cache this entity belongs to, creating one if needed.
    pub fn graph(&mut self) -> GraphRef {
        match &self.graph {
            Some(graph) => graph.root(),
            None => {
                let graph = GraphRef::new();
                self.graph = Some(graph.clone());
                graph
            }
        }
    }

    /// The graph cache, if the entity joined one.
    pub fn graph_ref(&self) -> Option<GraphRef> {
        self.graph.as_ref().map(GraphRef::root)
    }

    pub fn attach_graph(&mut self, graph: GraphRef) {
        self.graph = Some(graph);
    }
}

impl fmt::Debug for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("hydrated", &self.hydrated)
            .field("modified", &self.modified)
            .field("original", &self.original)
            .field("in_graph", &self.graph.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_assignment_wins_snapshot() {
        let mut state = EntityState::new();
        state.record_assignment("name", Value::from("a"));
        state.record_assignment("name", Value::from("b"));
        assert_eq!(state.original("name"), Some(&Value::from("a")));
        assert!(state.is_modified("name"));
        assert!(state.has_changes());
    }

    #[test]
    fn hydration_resets_tracking() {
        let mut state = EntityState::new();
        state.record_assignment("name", Value::Null);
        let row = Row::from_pairs([("id", Value::BigInt(3)), ("owner_id", Value::BigInt(9))]);
        let snapshot = BTreeMap::from([("id", Value::BigInt(3))]);
        state.mark_hydrated(row, snapshot);
        assert!(state.is_hydrated());
        assert!(!state.has_changes());
        assert_eq!(state.db_value("owner_id"), Some(&Value::BigInt(9)));
        assert_eq!(state.original("name"), None);
    }

    #[test]
    fn commit_clears_modified() {
        let mut state = EntityState::new();
        state.record_assignment("name", Value::Null);
        state.commit(
            BTreeMap::from([("name", Value::from("x"))]),
            BTreeMap::from([("tags", LinkSnapshot::Known(BTreeSet::from([1, 2])))]),
        );
        assert!(!state.has_changes());
        assert_eq!(state.original("name"), Some(&Value::from("x")));
        assert_eq!(
            state.original_link("tags"),
            Some(&LinkSnapshot::Known(BTreeSet::from([1, 2])))
        );
    }

    #[test]
    fn db_record_updates_merge() {
        let mut state = EntityState::new();
        let id = Value::BigInt(5);
        state.update_db_record([("id", &id)]);
        let fk = Value::BigInt(2);
        state.update_db_record([("team_id", &fk)]);
        assert_eq!(state.db_value("id"), Some(&Value::BigInt(5)));
        assert_eq!(state.db_value("team_id"), Some(&Value::BigInt(2)));
    }

    #[test]
    fn editing_an_unloaded_list_records_additions() {
        let mut state = EntityState::new();
        state.record_list_edit("cars", &Link::Unloaded);
        assert!(state.is_appended("cars"));
        assert!(state.is_modified("cars"));

        state.record_list_edit("cars", &Link::Many(Vec::new()));
        assert!(state.is_appended("cars"));

        state.record_link_assignment("cars", &Link::Unloaded, &Link::Many(Vec::new()));
        assert_eq!(state.original_link("cars"), Some(&LinkSnapshot::Unknown));
    }

    #[test]
    fn loaded_list_edit_snapshots_contents() {
        let mut state = EntityState::new();
        state.record_list_edit("cars", &Link::Many(Vec::new()));
        assert_eq!(
            state.original_link("cars"),
            Some(&LinkSnapshot::Known(BTreeSet::new()))
        );
    }

    #[test]
    fn unloaded_link_snapshot_is_unknown() {
        assert_eq!(LinkSnapshot::of(&Link::Unloaded), LinkSnapshot::Unknown);
        assert_eq!(
            LinkSnapshot::of(&Link::Many(Vec::new())),
            LinkSnapshot::Known(BTreeSet::new())
        );
    }
}
