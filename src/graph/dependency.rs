//! Dependency bookkeeping filled in by the traversal.

use std::collections::{BTreeMap, BTreeSet};

use crate::record::RecordKey;

static EMPTY: BTreeSet<RecordKey> = BTreeSet::new();

/// `key -> keys it depends on`, plus the soft links seen along the way.
///
/// Only edges actually followed are stored; there is no transitive closure
/// and no cycle detection. Cycles are a legal shape here.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    hard: BTreeMap<RecordKey, BTreeSet<RecordKey>>,
    soft: BTreeMap<RecordKey, BTreeSet<RecordKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key with no dependencies yet.
    pub fn add_node(&mut self, key: &RecordKey) {
        if !self.hard.contains_key(key) {
            self.hard.insert(key.clone(), BTreeSet::new());
        }
    }

    /// `from` depends on `to`.
    pub fn add_edge(&mut self, from: &RecordKey, to: &RecordKey) {
        if from == to {
            return;
        }
        self.add_node(to);
        self.hard.entry(from.clone()).or_default().insert(to.clone());
    }

    /// `to` was reached from `from` through a reverse or many-to-many relation.
    pub fn add_soft_edge(&mut self, from: &RecordKey, to: &RecordKey) {
        if from == to {
            return;
        }
        self.add_node(from);
        self.add_node(to);
        self.soft.entry(from.clone()).or_default().insert(to.clone());
    }

    pub fn depends_on(&self, key: &RecordKey) -> &BTreeSet<RecordKey> {
        self.hard.get(key).unwrap_or(&EMPTY)
    }

    pub fn soft_links(&self, key: &RecordKey) -> &BTreeSet<RecordKey> {
        self.soft.get(key).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.hard.contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.hard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hard.is_empty()
    }

    /// Number of hard edges.
    pub fn edge_count(&self) -> usize {
        self.hard.values().map(BTreeSet::len).sum()
    }

    pub fn soft_edge_count(&self) -> usize {
        self.soft.values().map(BTreeSet::len).sum()
    }

    /// Every hard edge as `(dependent, dependency)`, in key order.
    pub fn edges(&self) -> impl Iterator<Item = (&RecordKey, &RecordKey)> {
        self.hard
            .iter()
            .flat_map(|(from, deps)| deps.iter().map(move |to| (from, to)))
    }
}
