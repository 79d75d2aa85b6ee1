//! BFS traversal from a seed set over hard and soft relations.

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;

use crate::graph::DependencyGraph;
use crate::record::{KeyMode, Record, RecordKey};
use crate::store::{RelationError, RelationLookup};

/// What happens to records whose type is excluded or not included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Leave them out of the result but keep walking through them.
    #[default]
    PassThrough,
    /// Leave them out and do not expand their relations.
    Prune,
}

#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    /// Follow relations at all; when false only the seeds are visited.
    pub recursive: bool,
    /// Nodes at this depth are not expanded. `None` is unbounded.
    pub max_depth: Option<usize>,
    /// Cap on rows pulled through one soft relation of one node.
    pub max_fanout: Option<usize>,
    /// Skip reverse and many-to-many relations.
    pub hard_only: bool,
    pub exclude_types: HashSet<String>,
    /// When non-empty, only these types (plus non-excluded seed types) are emitted.
    pub include_types: HashSet<String>,
    pub filter_policy: FilterPolicy,
    pub key_mode: KeyMode,
}

impl TraversalOptions {
    /// Excluded types are never admitted; the seed types bypass only the include list.
    fn admits(&self, type_name: &str, seed_types: &HashSet<String>) -> bool {
        if self.exclude_types.contains(type_name) {
            return false;
        }
        self.include_types.is_empty()
            || self.include_types.contains(type_name)
            || seed_types.contains(type_name)
    }
}

/// Counters describing one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub dequeued: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub dangling: usize,
    pub not_applicable: usize,
    pub store_failures: usize,
    pub max_depth_seen: usize,
}

impl TraversalStats {
    fn absorb(&mut self, err: RelationError, from: &RecordKey) {
        match &err {
            RelationError::NotApplicable(_) => {
                self.not_applicable += 1;
                log::debug!("{}: {}", from, err);
            }
            RelationError::TargetMissing(_) => {
                self.dangling += 1;
                log::warn!("{}: {}", from, err);
            }
            RelationError::Store(_) => {
                self.store_failures += 1;
                log::warn!("{}: {}", from, err);
            }
        }
    }
}

/// Result of one traversal: admitted records in visit order plus the edges followed.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    pub records: Vec<Record>,
    pub graph: DependencyGraph,
    pub stats: TraversalStats,
}

/// Walk outward from `seeds` breadth-first.
///
/// Every node at depth `d` is dequeued before any node at depth `d + 1`.
/// Relation failures never abort the walk; they count as zero related rows.
pub fn traverse<L>(lookup: &L, seeds: Vec<Record>, options: &TraversalOptions) -> Traversal
where
    L: RelationLookup + ?Sized,
{
    let mut out = Traversal::default();
    let mut visited: HashSet<RecordKey> = HashSet::new();
    let mut queue: VecDeque<(Record, usize)> = VecDeque::new();
    let seed_types: HashSet<String> = seeds.iter().map(|s| s.type_name.clone()).collect();
    let mode = options.key_mode;

    log::info!(
        "Traversing from {} seed record(s) (recursive={}, max_depth={:?}, max_fanout={:?})",
        seeds.len(),
        options.recursive,
        options.max_depth,
        options.max_fanout
    );

    for seed in seeds {
        out.graph.add_node(&seed.key(mode));
        queue.push_back((seed, 0));
    }

    while let Some((record, depth)) = queue.pop_front() {
        let key = record.key(mode);
        if !visited.insert(key.clone()) {
            out.stats.duplicates += 1;
            continue;
        }
        out.stats.dequeued += 1;
        out.stats.max_depth_seen = out.stats.max_depth_seen.max(depth);

        let admitted = options.admits(&record.type_name, &seed_types);
        if !admitted {
            out.stats.filtered += 1;
            if options.filter_policy == FilterPolicy::Prune {
                log::debug!("Pruning {} (filtered type)", key);
                continue;
            }
        }

        if !options.recursive {
            if admitted {
                out.records.push(record);
            }
            continue;
        }

        // Nodes at the bound enqueue nothing, but their hard edges are still
        // recorded so that targets reached by other paths stay ordered first.
        let at_bound = options.max_depth.is_some_and(|max| depth >= max);

        if !options.hard_only && !at_bound {
            for relation in lookup.soft_relations(&record.type_name) {
                let related = match lookup.resolve_soft(&record, relation, options.max_fanout) {
                    Ok(rows) => rows,
                    Err(err) => {
                        out.stats.absorb(err, &key);
                        continue;
                    }
                };
                for child in related {
                    let child_key = child.key(mode);
                    if visited.contains(&child_key) {
                        continue;
                    }
                    out.graph.add_soft_edge(&key, &child_key);
                    queue.push_back((child, depth + 1));
                }
            }
        }

        for relation in lookup.hard_relations(&record.type_name) {
            match lookup.resolve_hard(&record, relation) {
                Ok(Some(target)) => {
                    let target_key = target.key(mode);
                    out.graph.add_edge(&key, &target_key);
                    if !at_bound && !visited.contains(&target_key) {
                        queue.push_back((target, depth + 1));
                    }
                }
                Ok(None) => {}
                Err(err) => out.stats.absorb(err, &key),
            }
        }

        if admitted {
            out.records.push(record);
        }
    }

    log::info!(
        "Traversal visited {} record(s), kept {} ({} hard edges, {} dangling references)",
        out.stats.dequeued,
        out.records.len(),
        out.graph.edge_count(),
        out.stats.dangling
    );

    out
}
